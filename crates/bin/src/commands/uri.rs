//! Database URI parsing command.

use contextdb::DatabaseUri;
use contextdb::database::database_hash;

use crate::cli::UriArgs;
use crate::output::{OutputFormat, print_json};

/// Run the `uri` command
pub fn run(args: &UriArgs, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let uri = DatabaseUri::parse(&args.uri)?;
    let hash = database_hash(&uri.database_name, &uri.did, &uri.context_name);

    match format {
        OutputFormat::Human => {
            println!("Scheme:     {}", uri.scheme);
            println!("DID:        {}", uri.did);
            println!("Context:    {}", uri.context_name);
            println!("Database:   {}", uri.database_name);
            println!("Hash:       {hash}");
        }
        OutputFormat::Json => {
            let value = serde_json::json!({
                "scheme": uri.scheme,
                "did": uri.did,
                "context": uri.context_name,
                "database": uri.database_name,
                "hash": hash,
            });
            print_json(&value)?;
        }
    }

    Ok(())
}
