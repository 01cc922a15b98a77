//! Error types for storage contexts.

use thiserror::Error;

#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// No storage context is linked for this DID and name.
    #[error("Storage context {context_name} not found for {did}")]
    ContextNotFound { did: String, context_name: String },

    /// No server factory is registered for the context's engine type.
    #[error("Unknown storage engine: {engine_type}")]
    UnknownEngine { engine_type: String },

    #[error("Invalid database URI '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    /// The context was logged out and can no longer open databases.
    #[error("Storage context {context_name} is logged out")]
    LoggedOut { context_name: String },

    /// Linking a new storage context failed.
    #[error("Failed to link storage context {context_name}: {reason}")]
    LinkFailed {
        context_name: String,
        reason: String,
    },
}

impl ContextError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ContextError::ContextNotFound { .. })
    }
}

impl From<ContextError> for crate::Error {
    fn from(err: ContextError) -> Self {
        crate::Error::Context(err)
    }
}
