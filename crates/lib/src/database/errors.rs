//! Error types for database engines.

use thiserror::Error;

/// Errors surfaced by [`crate::database::DatabaseEngine`] and [`crate::database::Db`].
///
/// The type is `Clone` so a failed initialization can be replayed to every
/// caller waiting on the same engine.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DatabaseError {
    /// The local or remote replica could not be opened or reached.
    #[error("Connection error: {reason}")]
    Connection { reason: String },

    /// The remote database did not exist and could not be created.
    #[error("Provisioning failed: {reason}")]
    Provisioning { reason: String },

    /// The remote database does not exist and this caller may not create it.
    #[error("Database not found: {name}")]
    NotFound { name: String },

    /// Credentials for the requested access could not be selected.
    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// Write attempted through a read-only handle.
    #[error("Database {name} is read-only")]
    ReadOnly { name: String },

    /// The engine was closed.
    #[error("Database {name} is closed")]
    Closed { name: String },

    /// Document ids starting with the reserved prefix are internal.
    #[error("Invalid document id: {id}")]
    InvalidDocumentId { id: String },

    /// Only the owner can change a database's permissions.
    #[error("Only the owner can update permissions of {name}")]
    NotOwner { name: String },
}

impl DatabaseError {
    /// Default reason reported when the server refuses to create a database.
    pub const PROVISIONING_REASON: &'static str = "user doesn't exist or unable to create database";

    pub fn is_not_found(&self) -> bool {
        matches!(self, DatabaseError::NotFound { .. })
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            DatabaseError::PermissionDenied { .. }
                | DatabaseError::ReadOnly { .. }
                | DatabaseError::NotOwner { .. }
        )
    }

    pub fn is_connection_error(&self) -> bool {
        matches!(self, DatabaseError::Connection { .. })
    }

    pub fn is_provisioning_error(&self) -> bool {
        matches!(self, DatabaseError::Provisioning { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, DatabaseError::Closed { .. })
    }
}

impl From<DatabaseError> for crate::Error {
    fn from(err: DatabaseError) -> Self {
        crate::Error::Database(err)
    }
}
