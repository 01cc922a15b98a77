//! Constants used throughout the contextdb library.
//!
//! This module provides central definitions for reserved document ids, consent
//! messages that are signed during key derivation, and addressing defaults.

/// Document ids starting with this prefix are internal to a replica and are
/// never replicated.
pub const RESERVED_ID_PREFIX: &str = "_";

/// Local-only document holding the encryption key check for a replica.
pub const KEY_CHECK_DOC_ID: &str = "_local/key_check";

/// Known plaintext stored (encrypted) in the key check document.
pub const KEY_CHECK_PLAINTEXT: &str = "contextdb key check";

/// Message prefix signed to derive a per-database encryption key.
pub const DATABASE_CONSENT_PREFIX: &str = "Authorized to own database: ";

/// Default scheme for database URIs.
pub const DEFAULT_URI_SCHEME: &str = "contextdb";

/// Engine type of the built-in storage server protocol.
pub const DEFAULT_ENGINE_TYPE: &str = "contextdb:v0";

/// Prefix of hashed remote database names.
pub const DATABASE_HASH_PREFIX: &str = "v";

/// Message an account signs to unlock the keyring of a storage context.
pub fn context_unlock_message(context_name: &str, did: &str) -> String {
    format!("Do you wish to unlock this storage context: \"{context_name}\"?\n\n{did}")
}

/// Message signed by the context keyring to obtain owner credentials.
pub fn context_auth_message(context_name: &str, did: &str) -> String {
    format!("Do you wish to authenticate this storage context: \"{context_name}\"?\n\n{did}")
}

/// Message signed by the keyring to derive the key for `database_name`.
pub fn database_consent_message(database_name: &str) -> String {
    format!("{DATABASE_CONSENT_PREFIX}{database_name}")
}
