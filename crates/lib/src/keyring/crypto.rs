//! Cryptographic primitives for the keyring
//!
//! Provides deterministic key derivation and authenticated encryption using:
//! - SHA-256 over `"{seed}-{key_type}"` as derivation entropy
//! - SLIP-0010 master key derivation for Ed25519 signing keys
//! - X25519 + HKDF-SHA256 for shared keys
//! - AES-256-GCM for symmetric encryption

use std::borrow::Cow;

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, AeadCore, OsRng},
};
use base64ct::{Base64, Encoding};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

use super::errors::KeyringError;
use super::keys::{KEY_LENGTH, KeyType, Seed, SharedKey, SymKey};

/// Nonce length for AES-GCM (12 bytes standard)
pub const NONCE_LENGTH: usize = 12;

/// HMAC key for the SLIP-0010 ed25519 master node
const ED25519_CURVE_KEY: &[u8] = b"ed25519 seed";

/// HKDF info string binding shared keys to this protocol
const SHARED_KEY_INFO: &[u8] = b"contextdb shared key v1";

type HmacSha512 = Hmac<Sha512>;

/// SHA-256 of `"{seed}-{key_type}"`.
pub fn key_digest(seed: &Seed, key_type: KeyType) -> Zeroizing<[u8; KEY_LENGTH]> {
    let mut hasher = Sha256::new();
    hasher.update(seed.expose().as_bytes());
    hasher.update(b"-");
    hasher.update(key_type.as_str().as_bytes());
    Zeroizing::new(hasher.finalize().into())
}

/// SLIP-0010 master private key for ed25519, derived from `entropy`.
///
/// Only the left half of the HMAC output (the key) is returned; the chain code
/// is discarded because no child keys are derived.
pub fn hd_master_key(entropy: &[u8]) -> Zeroizing<[u8; KEY_LENGTH]> {
    let mut mac = <HmacSha512 as Mac>::new_from_slice(ED25519_CURVE_KEY)
        .expect("HMAC accepts keys of any length");
    mac.update(entropy);
    let mut output = mac.finalize().into_bytes();
    let key = pad_key(&output[..KEY_LENGTH]);
    output.as_mut_slice().zeroize();
    key
}

/// Left-pad `key` with zeros to 32 bytes, keeping the trailing bytes if longer.
pub fn pad_key(key: &[u8]) -> Zeroizing<[u8; KEY_LENGTH]> {
    let mut padded = Zeroizing::new([0u8; KEY_LENGTH]);
    let take = key.len().min(KEY_LENGTH);
    padded[KEY_LENGTH - take..].copy_from_slice(&key[key.len() - take..]);
    padded
}

/// Derive a shared key from an X25519 exchange.
pub fn derive_shared_key(
    secret: &StaticSecret,
    peer: &X25519Public,
) -> Result<SharedKey, KeyringError> {
    let exchanged = secret.diffie_hellman(peer);
    let hkdf = Hkdf::<Sha256>::new(None, exchanged.as_bytes());
    let mut okm = Zeroizing::new([0u8; KEY_LENGTH]);
    hkdf.expand(SHARED_KEY_INFO, &mut okm[..])
        .map_err(|e| KeyringError::InvalidKeyFormat {
            reason: format!("Shared key expansion failed: {e}"),
        })?;
    Ok(SharedKey::from_bytes(*okm))
}

/// Encrypt raw bytes with AES-256-GCM, returning `base64(nonce || ciphertext)`.
pub fn encrypt_bytes(plaintext: &[u8], key: &[u8; KEY_LENGTH]) -> Result<String, KeyringError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| KeyringError::EncryptionFailed {
        reason: format!("Failed to create cipher: {e}"),
    })?;

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext =
        cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| KeyringError::EncryptionFailed {
                reason: format!("Encryption failed: {e}"),
            })?;

    let mut combined = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&ciphertext);
    Ok(Base64::encode_string(&combined))
}

/// Decrypt output of [`encrypt_bytes`].
pub fn decrypt_bytes(
    encoded: &str,
    key: &[u8; KEY_LENGTH],
) -> Result<Zeroizing<Vec<u8>>, KeyringError> {
    let combined = Base64::decode_vec(encoded).map_err(|e| KeyringError::DecryptionFailed {
        reason: format!("Invalid base64 payload: {e}"),
    })?;

    if combined.len() < NONCE_LENGTH {
        return Err(KeyringError::DecryptionFailed {
            reason: format!(
                "Payload too short: expected at least {NONCE_LENGTH} bytes, got {}",
                combined.len()
            ),
        });
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LENGTH);

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| KeyringError::DecryptionFailed {
        reason: format!("Failed to create cipher: {e}"),
    })?;

    // Authentication failure covers both a wrong key and tampered data
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| KeyringError::DecryptionFailed {
            reason: "Authentication failed".to_string(),
        })?;

    Ok(Zeroizing::new(plaintext))
}

/// Serialize `data` to JSON and encrypt it with a symmetric key.
pub fn sym_encrypt<T: Serialize + ?Sized>(data: &T, key: &SymKey) -> Result<String, KeyringError> {
    let plaintext = Zeroizing::new(serde_json::to_vec(data).map_err(|e| {
        KeyringError::SerializationFailed {
            reason: e.to_string(),
        }
    })?);
    encrypt_bytes(&plaintext, key.as_bytes())
}

/// Decrypt and deserialize output of [`sym_encrypt`].
pub fn sym_decrypt<T: DeserializeOwned>(encoded: &str, key: &SymKey) -> Result<T, KeyringError> {
    let plaintext = decrypt_bytes(encoded, key.as_bytes())?;
    serde_json::from_slice(&plaintext).map_err(|e| KeyringError::DecryptionFailed {
        reason: format!("Decrypted payload is not valid JSON: {e}"),
    })
}

/// Data that can be signed and verified by a keyring.
///
/// JSON values are signed over their compact serialized form.
pub trait Signable {
    fn signable_bytes(&self) -> Cow<'_, [u8]>;
}

impl Signable for str {
    fn signable_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl Signable for String {
    fn signable_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_bytes())
    }
}

impl Signable for [u8] {
    fn signable_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self)
    }
}

impl Signable for Vec<u8> {
    fn signable_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.as_slice())
    }
}

impl Signable for serde_json::Value {
    fn signable_bytes(&self) -> Cow<'_, [u8]> {
        Cow::Owned(self.to_string().into_bytes())
    }
}
