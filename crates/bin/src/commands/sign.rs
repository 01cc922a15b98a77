//! Signing and signature verification commands.

use contextdb::Keyring;

use crate::cli::{SignArgs, VerifyArgs};
use crate::output::{OutputFormat, print_json};

/// Run the `sign` command
pub fn sign(args: &SignArgs, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let keyring = Keyring::new(args.seed.seed.as_str());
    let signature = keyring.sign(args.message.as_str());
    let public_key = hex::encode(keyring.sign_public_key());

    match format {
        OutputFormat::Human => {
            println!("Public key:  {public_key}");
            println!("Signature:   {signature}");
        }
        OutputFormat::Json => {
            let value = serde_json::json!({
                "public_key": public_key,
                "signature": signature,
            });
            print_json(&value)?;
        }
    }

    Ok(())
}

/// Run the `verify` command. Exits with an error when the signature is invalid.
pub fn verify(args: &VerifyArgs, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let public_key = hex::decode(args.public_key.trim_start_matches("0x"))?;
    let valid = Keyring::verify_signature(&public_key, args.message.as_str(), &args.signature);

    match format {
        OutputFormat::Human => println!("{}", if valid { "valid" } else { "invalid" }),
        OutputFormat::Json => {
            print_json(&serde_json::json!({ "valid": valid }))?;
        }
    }

    if !valid {
        return Err("signature verification failed".into());
    }
    Ok(())
}
