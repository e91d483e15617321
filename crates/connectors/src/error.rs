use std::{path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested key does not exist in the store.
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The store asked the client to slow down.
    #[error("Request throttled: {0}")]
    Throttled(String),

    /// A call did not finish within its deadline.
    #[error("{op} timed out after {after:?}")]
    Timeout { op: String, after: Duration },

    /// Connection resets, 5xx responses and similar recoverable failures.
    #[error("Transient store error: {0}")]
    Transient(String),

    /// I/O failure on the store side.
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O failure on the local side of a transfer (staging, outbound files).
    #[error("Local I/O error at {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Store configuration error: {0}")]
    Config(String),

    /// A retried call kept failing.
    #[error("Gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn local(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::LocalIo {
            path: path.into(),
            source,
        }
    }

    /// Local filesystem failures are never worth retrying and abort the cycle.
    pub fn is_local(&self) -> bool {
        match self {
            StoreError::LocalIo { .. } => true,
            StoreError::RetriesExhausted { source, .. } => source.is_local(),
            _ => false,
        }
    }

    /// Unwraps retry bookkeeping to the error that was actually observed.
    pub fn root_cause(&self) -> &StoreError {
        match self {
            StoreError::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
