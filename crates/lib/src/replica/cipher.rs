//! Document body encryption for owner-only databases
//!
//! Encrypted documents keep their id and revision in the clear; the body is
//! replaced by `{"ciphertext": "<base64>"}`. Replication only ever moves
//! ciphertext, so neither the server nor the transport sees plaintext.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use super::Replica;
use crate::constants::{KEY_CHECK_DOC_ID, KEY_CHECK_PLAINTEXT};
use crate::database::DatabaseError;
use crate::keyring::{KeyringError, SymKey, crypto};

const CIPHERTEXT_FIELD: &str = "ciphertext";

/// Encrypts and decrypts document bodies with a per-database key.
#[derive(Debug, Clone)]
pub struct DocCipher {
    key: Arc<SymKey>,
}

impl DocCipher {
    pub fn new(key: Arc<SymKey>) -> Self {
        Self { key }
    }

    pub fn encrypt_body(&self, body: &Value) -> Result<Value, KeyringError> {
        let ciphertext = crypto::sym_encrypt(body, &self.key)?;
        Ok(json!({ CIPHERTEXT_FIELD: ciphertext }))
    }

    pub fn decrypt_body(&self, body: &Value) -> Result<Value, KeyringError> {
        let ciphertext = body
            .get(CIPHERTEXT_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| KeyringError::DecryptionFailed {
                reason: "document body is not encrypted".to_string(),
            })?;
        crypto::sym_decrypt(ciphertext, &self.key)
    }

    /// Check that `replica` was encrypted with this key.
    ///
    /// A replica without a key check gets one written. A replica whose key
    /// check does not decrypt belongs to a different key and is refused.
    pub async fn verify_key(&self, replica: &dyn Replica) -> Result<(), DatabaseError> {
        let existing = replica
            .get_local(KEY_CHECK_DOC_ID)
            .await
            .map_err(|e| DatabaseError::Connection {
                reason: format!("failed to read key check: {e}"),
            })?;

        match existing {
            Some(check) => {
                let matches = self
                    .decrypt_body(&check)
                    .is_ok_and(|plaintext| plaintext == Value::from(KEY_CHECK_PLAINTEXT));
                if !matches {
                    return Err(DatabaseError::Connection {
                        reason: format!(
                            "local replica {} is encrypted with a different key",
                            replica.name()
                        ),
                    });
                }
                debug!(replica = replica.name(), "Key check passed");
            }
            None => {
                let check = self
                    .encrypt_body(&Value::from(KEY_CHECK_PLAINTEXT))
                    .map_err(|e| DatabaseError::Connection {
                        reason: format!("failed to create key check: {e}"),
                    })?;
                replica
                    .put_local(KEY_CHECK_DOC_ID, check)
                    .await
                    .map_err(|e| DatabaseError::Connection {
                        reason: format!("failed to write key check: {e}"),
                    })?;
                debug!(replica = replica.name(), "Key check created");
            }
        }
        Ok(())
    }
}
