//! Error types for the coordination layer

use std::sync::Arc;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the store client and the coordination components.
///
/// Most call sites never surface these to request handlers: distributed
/// coordination failures are logged and mapped onto a permissive default.
#[derive(Error, Debug)]
pub enum Error {
    /// The coordination store could not be reached
    #[error("Coordination store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store answered, but the stored value did not have the expected shape
    #[error("Coordination store protocol error on {op}: {reason}")]
    StoreProtocol { op: &'static str, reason: String },

    /// JSON encode/decode failure for a stored record
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the failure means "no cross-process coordination right now".
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

/// Failure reported by the delegated work provider.
///
/// Cloneable so a single failure can be handed to every deduplicated awaiter.
#[derive(Error, Debug, Clone)]
#[error("{0:#}")]
pub struct WorkError(Arc<anyhow::Error>);

impl WorkError {
    /// Wrap an opaque provider error.
    pub fn new(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }

    /// Access the underlying error.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for WorkError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err)
    }
}

/// Outcome errors of `get_or_compute`, shared by every deduplicated caller.
#[derive(Error, Debug, Clone)]
pub enum ComputeError {
    /// The delegated work failed; nothing was committed to a cache tier
    #[error("Translation work failed: {0}")]
    Work(#[from] WorkError),

    /// The user already has `limit` translations running
    #[error("Concurrency limit of {limit} translations reached")]
    ConcurrencyLimit { limit: u32 },

    /// The work task panicked or was aborted before producing a result
    #[error("Translation work aborted: {0}")]
    Aborted(String),
}

impl From<tokio::task::JoinError> for ComputeError {
    fn from(err: tokio::task::JoinError) -> Self {
        ComputeError::Aborted(err.to_string())
    }
}
