//! Error types reported by storage servers.

use thiserror::Error;

/// Errors returned by [`crate::server::StorageServer`] implementations.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerError {
    #[error("Database not found: {name}")]
    NotFound { name: String },

    #[error("Request denied: {reason}")]
    Denied { reason: String },

    #[error("Server unavailable: {reason}")]
    Unavailable { reason: String },

    /// The server understood the request and refused it.
    #[error("Request rejected: {reason}")]
    Rejected { reason: String },
}

impl ServerError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServerError::NotFound { .. })
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, ServerError::Denied { .. })
    }
}

impl From<ServerError> for crate::Error {
    fn from(err: ServerError) -> Self {
        crate::Error::Server(err)
    }
}
