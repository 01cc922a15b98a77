//!
//! contextdb: per-identity, per-application databases that stay in sync.
//!
//! An account identified by a DID unlocks a named storage context. Inside it,
//! databases are opened by name, provisioned on a remote storage server on
//! first use, and either encrypted end to end or shared under a permission
//! policy.
//!
//! ## Core Concepts
//!
//! * **Keyring (`keyring::Keyring`)**: Deterministic signing, agreement and symmetric keys derived from a seed, plus memoized per-database keys.
//! * **Permissions (`permissions::PermissionsConfig`)**: Declarative `owner`/`public`/`users` read and write policy; owner-only databases are encrypted.
//! * **Storage context (`context::StorageContext`)**: Unlocks the keyring from an account signature, resolves the context's configuration and opens databases.
//! * **Database engines (`database::DatabaseEngine`)**: Provision, connect and keep one database in sync. Encrypted engines keep a local replica; public engines talk to the server directly.
//! * **Replicas (`replica::Replica`)**: Revisioned document stores with a changes feed, local or remote.
//! * **Sync (`sync::Replicator`)**: One-shot snapshot pulls and continuous bidirectional replication between replicas.
//! * **Servers (`server::StorageServer`)**: The remote side, found through an explicit `server::ServerRegistry`.

pub mod account;
pub mod config;
pub mod constants;
pub mod context;
pub mod database;
pub mod keyring;
pub mod permissions;
pub mod replica;
pub mod server;
pub mod sync;

pub use account::{Account, Did, LocalAccount};
pub use config::{ContextSettings, EngineSettings};
pub use context::{Collaborators, DatabaseUri, StorageContext};
pub use database::{DatabaseEngine, DatabaseOptions, Db, EngineStatus};
pub use keyring::Keyring;
pub use permissions::{PermissionOption, PermissionsConfig};

/// Result type used throughout the contextdb library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the contextdb library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Structured key derivation and encryption errors from the keyring module
    #[error(transparent)]
    Keyring(keyring::KeyringError),

    /// Structured engine errors from the database module
    #[error(transparent)]
    Database(database::DatabaseError),

    /// Structured document store errors from the replica module
    #[error(transparent)]
    Replica(replica::ReplicaError),

    /// Errors reported by a storage server
    #[error(transparent)]
    Server(server::ServerError),

    /// Structured storage context errors from the context module
    #[error(transparent)]
    Context(context::ContextError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
            Error::Config(_) => "config",
            Error::Keyring(_) => "keyring",
            Error::Database(_) => "database",
            Error::Replica(_) => "replica",
            Error::Server(_) => "server",
            Error::Context(_) => "context",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Database(db_err) => db_err.is_not_found(),
            Error::Replica(replica_err) => replica_err.is_not_found(),
            Error::Server(server_err) => server_err.is_not_found(),
            Error::Context(context_err) => context_err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error indicates permission was denied.
    pub fn is_permission_denied(&self) -> bool {
        match self {
            Error::Database(db_err) => db_err.is_permission_denied(),
            Error::Replica(replica_err) => replica_err.is_denied(),
            Error::Server(server_err) => server_err.is_denied(),
            _ => false,
        }
    }

    /// Check if this error is a failed decryption.
    pub fn is_decryption_error(&self) -> bool {
        match self {
            Error::Keyring(keyring_err) => keyring_err.is_decryption_error(),
            _ => false,
        }
    }

    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Database(db_err) => db_err.is_connection_error(),
            _ => false,
        }
    }

    pub fn is_provisioning_error(&self) -> bool {
        match self {
            Error::Database(db_err) => db_err.is_provisioning_error(),
            _ => false,
        }
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        matches!(self, Error::Io(_))
    }
}
