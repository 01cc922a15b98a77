//! Local replica inspection commands.

use contextdb::Keyring;
use contextdb::replica::{DocCipher, Document, LocalReplica};
use serde_json::Value;

use crate::cli::{DbGetArgs, DbListArgs, ReplicaArgs};
use crate::output::{OutputFormat, print_json, print_table};

type CmdResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Cipher for the replica when a seed was given.
fn cipher(args: &ReplicaArgs) -> Option<DocCipher> {
    let seed = args.seed.as_deref()?;
    let database = args.database.as_deref()?;
    let keyring = Keyring::new(seed);
    Some(DocCipher::new(keyring.get_storage_context_key(database)))
}

fn body(doc: &Document, cipher: Option<&DocCipher>) -> CmdResult<Value> {
    match cipher {
        Some(cipher) => Ok(cipher.decrypt_body(&doc.body)?),
        None => Ok(doc.body.clone()),
    }
}

/// Run the `db list` command
pub async fn list(args: &DbListArgs, format: OutputFormat) -> CmdResult<()> {
    let docs = LocalReplica::load_documents(&args.replica.file).await?;
    let cipher = cipher(&args.replica);

    match format {
        OutputFormat::Human => {
            if docs.is_empty() {
                println!("No documents found.");
                return Ok(());
            }
            let rows = docs
                .iter()
                .map(|doc| {
                    let preview = match body(doc, cipher.as_ref()) {
                        Ok(body) => body.to_string(),
                        Err(e) => format!("<{e}>"),
                    };
                    vec![doc.id.clone(), doc.rev.to_string(), truncate(&preview, 60)]
                })
                .collect::<Vec<_>>();
            print_table(&["ID", "REV", "BODY"], &rows);
        }
        OutputFormat::Json => {
            let mut entries = Vec::with_capacity(docs.len());
            for doc in &docs {
                entries.push(serde_json::json!({
                    "id": doc.id,
                    "rev": doc.rev,
                    "body": body(doc, cipher.as_ref())?,
                }));
            }
            print_json(&entries)?;
        }
    }

    Ok(())
}

/// Run the `db get` command
pub async fn get(args: &DbGetArgs, format: OutputFormat) -> CmdResult<()> {
    let docs = LocalReplica::load_documents(&args.replica.file).await?;
    let doc = docs
        .iter()
        .find(|doc| doc.id == args.id)
        .ok_or_else(|| format!("document '{}' not found", args.id))?;
    let body = body(doc, cipher(&args.replica).as_ref())?;

    match format {
        OutputFormat::Human => {
            println!("ID:    {}", doc.id);
            println!("Rev:   {}", doc.rev);
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        OutputFormat::Json => {
            let value = serde_json::json!({
                "id": doc.id,
                "rev": doc.rev,
                "body": body,
            });
            print_json(&value)?;
        }
    }

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max.saturating_sub(3)).collect();
    format!("{cut}...")
}
