//! Keyring inspection - public keys and database key fingerprints.

use contextdb::Keyring;
use sha2::{Digest, Sha256};

use crate::cli::KeysArgs;
use crate::output::{OutputFormat, print_json};

/// Run the `keys` command
pub fn run(args: &KeysArgs, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let keyring = Keyring::new(args.seed.seed.as_str());
    let public = keyring.public_keys();

    // Short digest identifying the key without revealing it
    let fingerprint = args.database.as_deref().map(|name| {
        let key = keyring.get_storage_context_key(name);
        let digest = Sha256::digest(key.as_bytes());
        (name, hex::encode(&digest[..8]))
    });

    match format {
        OutputFormat::Human => {
            println!("Sign public key:  {}", public.sign.hex);
            println!("                  {}", public.sign.base58);
            println!("Asym public key:  {}", public.asym.hex);
            println!("                  {}", public.asym.base58);
            if let Some((name, fingerprint)) = &fingerprint {
                println!("Database key:     {fingerprint} ({name})");
            }
        }
        OutputFormat::Json => {
            let mut value = serde_json::to_value(&public)?;
            if let Some((name, fingerprint)) = fingerprint {
                value["database"] = serde_json::json!({
                    "name": name,
                    "fingerprint": fingerprint,
                });
            }
            print_json(&value)?;
        }
    }

    Ok(())
}
