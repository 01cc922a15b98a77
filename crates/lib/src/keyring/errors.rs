//! Error types for the keyring

use thiserror::Error;

/// Errors that can occur during key derivation, signing, or encryption.
///
/// Decryption failures never carry partial plaintext; the reason string only
/// describes which stage failed.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyringError {
    #[error("Encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    #[error("Decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    #[error("Invalid key: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Invalid key format: {reason}")]
    InvalidKeyFormat { reason: String },

    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },
}

impl KeyringError {
    /// Check if this error is a decryption failure (wrong key or tampered data).
    pub fn is_decryption_error(&self) -> bool {
        matches!(self, KeyringError::DecryptionFailed { .. })
    }

    /// Check if this error is about malformed key material.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            KeyringError::InvalidKeyLength { .. } | KeyringError::InvalidKeyFormat { .. }
        )
    }
}

impl From<KeyringError> for crate::Error {
    fn from(err: KeyringError) -> Self {
        crate::Error::Keyring(err)
    }
}
