//! Identities that can sign messages
//!
//! An [`Account`] is the external identity a storage context is opened for.
//! The library only needs two things from it: its DID and the ability to sign
//! a message. [`LocalAccount`] is an Ed25519 `did:key` identity held in memory.

use std::fmt;

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Multicodec prefix for an Ed25519 public key.
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// A decentralized identifier, e.g. `did:key:z6Mk...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Did(String);

impl Did {
    pub fn new(did: impl Into<String>) -> Self {
        Self(did.into())
    }

    /// `did:key` identifier for an Ed25519 public key.
    pub fn from_ed25519(key: &VerifyingKey) -> Self {
        let mut bytes = Vec::with_capacity(ED25519_MULTICODEC.len() + 32);
        bytes.extend_from_slice(&ED25519_MULTICODEC);
        bytes.extend_from_slice(key.as_bytes());
        Self(format!("did:key:z{}", bs58::encode(bytes).into_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Did {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Did {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Did {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An identity able to sign arbitrary messages.
///
/// Signing is async because real accounts usually sit behind a wallet or an
/// RPC boundary.
#[async_trait]
pub trait Account: Send + Sync {
    fn did(&self) -> &Did;

    /// Sign `message`, returning a hex encoded signature.
    ///
    /// Signatures must be deterministic: keyrings are seeded from them.
    async fn sign(&self, message: &str) -> Result<String>;
}

/// In-memory Ed25519 account identified by a `did:key`.
pub struct LocalAccount {
    did: Did,
    signing_key: SigningKey,
}

impl LocalAccount {
    /// Generate a new random account.
    pub fn generate() -> Self {
        Self::from_signing_key(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Account for a known 32-byte Ed25519 secret.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self::from_signing_key(SigningKey::from_bytes(secret))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        Self {
            did: Did::from_ed25519(&signing_key.verifying_key()),
            signing_key,
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl fmt::Debug for LocalAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalAccount")
            .field("did", &self.did)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Account for LocalAccount {
    fn did(&self) -> &Did {
        &self.did
    }

    async fn sign(&self, message: &str) -> Result<String> {
        Ok(hex::encode(
            self.signing_key.sign(message.as_bytes()).to_bytes(),
        ))
    }
}
