//! Error types for the Terra collaborator boundary.

use thiserror::Error;

use crate::types::RunId;

/// Errors that can occur when talking to an external collaborator.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The location provider hung up before the fix was delivered
    #[error("Location source closed")]
    SourceClosed,

    /// A run with this id has already been stored
    #[error("Duplicate run: {0}")]
    DuplicateRun(RunId),

    /// Backend storage failure
    #[error("Store error: {0}")]
    StoreError(String),
}

impl EnvError {
    /// Creates a store error.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreError(msg.into())
    }
}
