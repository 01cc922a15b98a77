//! Error types for replicas.

use thiserror::Error;

/// Errors returned by [`crate::replica::Replica`] implementations.
///
/// Replication distinguishes `Denied` (stop, do not retry) from `Unavailable`
/// (transient, retry with backoff).
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplicaError {
    /// The database backing this replica does not exist.
    #[error("Database not found: {name}")]
    NotFound { name: String },

    /// The caller's credentials do not allow the request.
    #[error("Access denied: {reason}")]
    Denied { reason: String },

    /// The replica could not be reached; the request may succeed later.
    #[error("Replica unavailable: {reason}")]
    Unavailable { reason: String },

    /// A write was based on a stale revision.
    #[error("Document update conflict: {id}")]
    Conflict { id: String },

    /// Reading or writing the underlying storage failed.
    #[error("Storage error: {reason}")]
    Storage { reason: String },
}

impl ReplicaError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ReplicaError::NotFound { .. })
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, ReplicaError::Denied { .. })
    }

    /// Whether retrying the same request later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReplicaError::Unavailable { .. })
    }
}

impl From<std::io::Error> for ReplicaError {
    fn from(err: std::io::Error) -> Self {
        ReplicaError::Storage {
            reason: err.to_string(),
        }
    }
}

impl From<ReplicaError> for crate::Error {
    fn from(err: ReplicaError) -> Self {
        crate::Error::Replica(err)
    }
}
