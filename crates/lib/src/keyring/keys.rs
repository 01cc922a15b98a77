//! Key material types for the keyring
//!
//! Every type holding secret bytes zeroizes itself on drop, compares in
//! constant time, and redacts its bytes from `Debug` output.

use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::errors::KeyringError;

/// Length of every secret key produced by the keyring (32 bytes)
pub const KEY_LENGTH: usize = 32;

/// Length of the padded public signing key
pub const SIGN_PUBLIC_KEY_LENGTH: usize = 33;

/// Length of an X25519 public key
pub const ASYM_PUBLIC_KEY_LENGTH: usize = 32;

/// The kind of key derived from a seed.
///
/// The string form is part of the derivation input, so it must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// Ed25519 signing key pair
    Sign,
    /// X25519 key pair used for key agreement
    Asym,
    /// Symmetric key (secret half of an X25519 pair)
    Sym,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Sign => "sign",
            KeyType::Asym => "asym",
            KeyType::Sym => "sym",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Root secret for one identity/context pairing.
///
/// Seeds are kept in their string form (usually the hex signature produced by
/// an account) because the string is what gets hashed during derivation.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Seed(String);

impl Seed {
    pub fn new(seed: impl Into<String>) -> Self {
        Self(seed.into())
    }

    /// Build a seed from raw bytes, using their lowercase hex encoding.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self(hex::encode(bytes.as_ref()))
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Seed {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Seed {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Seed([REDACTED])")
    }
}

macro_rules! secret_key_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Zeroize, ZeroizeOnDrop)]
        pub struct $name([u8; KEY_LENGTH]);

        impl $name {
            pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
                Self(bytes)
            }

            pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyringError> {
                let array: [u8; KEY_LENGTH] =
                    bytes
                        .try_into()
                        .map_err(|_| KeyringError::InvalidKeyLength {
                            expected: KEY_LENGTH,
                            actual: bytes.len(),
                        })?;
                Ok(Self(array))
            }

            /// Parse from a hex string, with or without a `0x` prefix.
            pub fn from_hex(value: &str) -> Result<Self, KeyringError> {
                let value = value.strip_prefix("0x").unwrap_or(value);
                let mut bytes = hex::decode(value).map_err(|e| KeyringError::InvalidKeyFormat {
                    reason: format!("invalid hex: {e}"),
                })?;
                let key = Self::from_slice(&bytes);
                bytes.zeroize();
                key
            }

            pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                self.0.ct_eq(&other.0).into()
            }
        }

        impl Eq for $name {}

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(concat!(stringify!($name), "([REDACTED])"))
            }
        }
    };
}

secret_key_type!(
    /// Symmetric key used for authenticated encryption of documents.
    SymKey
);

secret_key_type!(
    /// Key agreed between two parties with X25519 + HKDF.
    SharedKey
);

/// A derived key pair in raw form, as produced by `Keyring::build_key`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    #[zeroize(skip)]
    key_type: KeyType,
    private_key: [u8; KEY_LENGTH],
    public_key: Vec<u8>,
}

impl KeyPair {
    pub(crate) fn new(key_type: KeyType, private_key: [u8; KEY_LENGTH], public_key: Vec<u8>) -> Self {
        Self {
            key_type,
            private_key,
            public_key,
        }
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn private_key(&self) -> &[u8; KEY_LENGTH] {
        &self.private_key
    }

    /// 33 bytes for `Sign` keys, 32 bytes for `Asym`/`Sym` keys.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.key_type == other.key_type
            && bool::from(self.private_key.ct_eq(&other.private_key))
            && self.public_key == other.public_key
    }
}

impl Eq for KeyPair {}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_type", &self.key_type)
            .field("private_key", &"[REDACTED]")
            .field("public_key", &hex::encode(&self.public_key))
            .finish()
    }
}

/// A key rendered in the three encodings callers commonly need.
///
/// Serialized without the raw bytes, which are restored from hex on load.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(try_from = "EncodedKeyRepr")]
pub struct EncodedKey {
    #[serde(skip)]
    pub raw: Vec<u8>,
    pub hex: String,
    pub base58: String,
}

impl EncodedKey {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            raw: bytes.to_vec(),
            hex: hex::encode(bytes),
            base58: bs58::encode(bytes).into_string(),
        }
    }
}

#[derive(Deserialize)]
struct EncodedKeyRepr {
    hex: String,
}

impl TryFrom<EncodedKeyRepr> for EncodedKey {
    type Error = KeyringError;

    fn try_from(repr: EncodedKeyRepr) -> Result<Self, Self::Error> {
        let raw = hex::decode(&repr.hex).map_err(|e| KeyringError::InvalidKeyFormat {
            reason: format!("invalid hex: {e}"),
        })?;
        Ok(Self::new(&raw))
    }
}

impl fmt::Debug for EncodedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedKey")
            .field("hex", &self.hex)
            .finish_non_exhaustive()
    }
}

/// All keys held by a keyring, private material included.
pub struct KeyringKeys {
    pub sign_private: EncodedKey,
    pub sign_public: EncodedKey,
    pub asym_private: EncodedKey,
    pub asym_public: EncodedKey,
    pub sym_key: EncodedKey,
}

impl fmt::Debug for KeyringKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyringKeys")
            .field("sign_private", &"[REDACTED]")
            .field("sign_public", &self.sign_public)
            .field("asym_private", &"[REDACTED]")
            .field("asym_public", &self.asym_public)
            .field("sym_key", &"[REDACTED]")
            .finish()
    }
}

/// Public half of a keyring, safe to publish in a storage context config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeys {
    pub sign: EncodedKey,
    pub asym: EncodedKey,
}
