//! Deterministic key derivation for one identity/context pairing
//!
//! A [`Keyring`] turns a [`Seed`] into three keys:
//! - an Ed25519 signing key pair
//! - an X25519 key pair for key agreement
//! - a symmetric AES-256 key
//!
//! It also derives and memoizes per-database symmetric keys, obtained by
//! signing a consent message naming the database.
//!
//! # Security
//!
//! The seed and every derived secret are zeroized when the keyring is dropped.
//! Secrets never appear in `Debug` output or logs.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

pub mod crypto;
pub mod errors;
pub mod keys;

pub use crypto::Signable;
pub use errors::KeyringError;
pub use keys::{
    EncodedKey, KEY_LENGTH, KeyPair, KeyType, KeyringKeys, PublicKeys, Seed, SharedKey, SymKey,
};

use crate::{Result, constants::database_consent_message};

/// Keys derived once per keyring.
struct KeySet {
    sign: KeyPair,
    asym: KeyPair,
    sym: SymKey,
    signing_key: SigningKey,
    asym_secret: StaticSecret,
}

impl KeySet {
    fn derive(seed: &Seed) -> Self {
        let sign = Keyring::build_key(seed, KeyType::Sign);
        let asym = Keyring::build_key(seed, KeyType::Asym);
        let sym_pair = Keyring::build_key(seed, KeyType::Sym);

        Self {
            signing_key: SigningKey::from_bytes(sign.private_key()),
            asym_secret: StaticSecret::from(*asym.private_key()),
            sym: SymKey::from_bytes(*sym_pair.private_key()),
            sign,
            asym,
        }
    }
}

/// Key derivation and cryptographic operations for one seed.
pub struct Keyring {
    seed: Seed,
    keys: OnceLock<KeySet>,
    /// database name -> derived key
    storage_context_keys: Mutex<HashMap<String, Arc<SymKey>>>,
}

impl Keyring {
    /// Create a keyring. Keys are derived on first use or by [`Keyring::init`].
    pub fn new(seed: impl Into<Seed>) -> Self {
        Self {
            seed: seed.into(),
            keys: OnceLock::new(),
            storage_context_keys: Mutex::new(HashMap::new()),
        }
    }

    /// Derive the key set. Calling this again is a no-op.
    pub fn init(&self) {
        self.keys();
    }

    fn keys(&self) -> &KeySet {
        self.keys.get_or_init(|| {
            debug!("Deriving keyring keys");
            KeySet::derive(&self.seed)
        })
    }

    /// Derive one key pair from `seed`.
    ///
    /// This is a pure function of its inputs: the same seed and type always
    /// produce the same keys.
    pub fn build_key(seed: &Seed, key_type: KeyType) -> KeyPair {
        let entropy = crypto::key_digest(seed, key_type);

        match key_type {
            KeyType::Sign => {
                let private_key = crypto::hd_master_key(&entropy[..]);
                let signing_key = SigningKey::from_bytes(&private_key);
                let mut public_key = Vec::with_capacity(keys::SIGN_PUBLIC_KEY_LENGTH);
                public_key.push(0x00);
                public_key.extend_from_slice(signing_key.verifying_key().as_bytes());
                KeyPair::new(key_type, *private_key, public_key)
            }
            KeyType::Asym | KeyType::Sym => {
                let secret = StaticSecret::from(*entropy);
                let public_key = X25519Public::from(&secret);
                KeyPair::new(key_type, secret.to_bytes(), public_key.as_bytes().to_vec())
            }
        }
    }

    /// All keys, private material included, in raw, hex and base58 form.
    pub fn get_keys(&self) -> KeyringKeys {
        let keys = self.keys();
        KeyringKeys {
            sign_private: EncodedKey::new(keys.sign.private_key()),
            sign_public: EncodedKey::new(keys.sign.public_key()),
            asym_private: EncodedKey::new(keys.asym.private_key()),
            asym_public: EncodedKey::new(keys.asym.public_key()),
            sym_key: EncodedKey::new(keys.sym.as_bytes()),
        }
    }

    /// Public keys only.
    pub fn public_keys(&self) -> PublicKeys {
        let keys = self.keys();
        PublicKeys {
            sign: EncodedKey::new(keys.sign.public_key()),
            asym: EncodedKey::new(keys.asym.public_key()),
        }
    }

    /// 33-byte padded Ed25519 public key.
    pub fn sign_public_key(&self) -> &[u8] {
        self.keys().sign.public_key()
    }

    /// X25519 public key.
    pub fn asym_public_key(&self) -> [u8; KEY_LENGTH] {
        *X25519Public::from(&self.keys().asym_secret).as_bytes()
    }

    /// Detached Ed25519 signature over `data`, hex encoded.
    pub fn sign<D: Signable + ?Sized>(&self, data: &D) -> String {
        let signature = self.keys().signing_key.sign(&data.signable_bytes());
        hex::encode(signature.to_bytes())
    }

    /// Verify a signature made by this keyring.
    pub fn verify_sig<D: Signable + ?Sized>(&self, data: &D, signature: &str) -> bool {
        Self::verify_signature(self.sign_public_key(), data, signature)
    }

    /// Verify a hex signature against a public key (32 bytes, or 33 with the
    /// leading zero byte). Malformed input of any kind yields `false`.
    pub fn verify_signature<D: Signable + ?Sized>(
        public_key: &[u8],
        data: &D,
        signature: &str,
    ) -> bool {
        let raw = match public_key {
            [0x00, rest @ ..] if rest.len() == KEY_LENGTH => rest,
            key => key,
        };
        let Ok(raw) = <[u8; KEY_LENGTH]>::try_from(raw) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&raw) else {
            return false;
        };
        let Ok(sig_bytes) = hex::decode(signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        verifying_key
            .verify(&data.signable_bytes(), &signature)
            .is_ok()
    }

    /// Encrypt `data` with this keyring's symmetric key.
    pub fn sym_encrypt<T: Serialize + ?Sized>(&self, data: &T) -> Result<String> {
        Ok(crypto::sym_encrypt(data, &self.keys().sym)?)
    }

    /// Decrypt output of [`Keyring::sym_encrypt`].
    pub fn sym_decrypt<T: DeserializeOwned>(&self, encoded: &str) -> Result<T> {
        Ok(crypto::sym_decrypt(encoded, &self.keys().sym)?)
    }

    /// Encrypt `data` for a peer using a previously agreed shared key.
    pub fn asym_encrypt<T: Serialize + ?Sized>(&self, data: &T, key: &SharedKey) -> Result<String> {
        let plaintext = serde_json::to_vec(data).map_err(|e| KeyringError::SerializationFailed {
            reason: e.to_string(),
        })?;
        Ok(crypto::encrypt_bytes(&plaintext, key.as_bytes())?)
    }

    /// Decrypt output of [`Keyring::asym_encrypt`].
    pub fn asym_decrypt<T: DeserializeOwned>(&self, encoded: &str, key: &SharedKey) -> Result<T> {
        let plaintext = crypto::decrypt_bytes(encoded, key.as_bytes())?;
        serde_json::from_slice(&plaintext).map_err(|e| {
            KeyringError::DecryptionFailed {
                reason: format!("Decrypted payload is not valid JSON: {e}"),
            }
            .into()
        })
    }

    /// Shared key computed by the initiating side, which holds an ephemeral
    /// private key and knows this keyring's public key.
    pub fn build_shared_key_start(&self, peer_private: &[u8; KEY_LENGTH]) -> Result<SharedKey> {
        let secret = StaticSecret::from(*peer_private);
        let own_public = X25519Public::from(&self.keys().asym_secret);
        Ok(crypto::derive_shared_key(&secret, &own_public)?)
    }

    /// Shared key computed by this keyring from the peer's public key.
    pub fn build_shared_key_end(&self, peer_public: &[u8; KEY_LENGTH]) -> Result<SharedKey> {
        let peer = X25519Public::from(*peer_public);
        Ok(crypto::derive_shared_key(&self.keys().asym_secret, &peer)?)
    }

    /// Symmetric key for the database `name`, derived on first request.
    ///
    /// Repeated calls return the same `Arc`.
    pub fn get_storage_context_key(&self, name: &str) -> Arc<SymKey> {
        let mut cache = self
            .storage_context_keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(key) = cache.get(name) {
            return Arc::clone(key);
        }

        debug!(database = name, "Deriving storage context key");
        let signature = self.sign(database_consent_message(name).as_str());
        let pair = Self::build_key(&Seed::new(signature), KeyType::Sym);
        let key = Arc::new(SymKey::from_bytes(*pair.private_key()));
        cache.insert(name.to_string(), Arc::clone(&key));
        key
    }
}

impl fmt::Debug for Keyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cached = self
            .storage_context_keys
            .lock()
            .map(|cache| cache.len())
            .unwrap_or_default();
        f.debug_struct("Keyring")
            .field("seed", &self.seed)
            .field("initialized", &self.keys.get().is_some())
            .field("storage_context_keys", &cached)
            .finish()
    }
}
