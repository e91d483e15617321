use connectors::error::StoreError;
use engine_config::settings::error::SettingsError;
use engine_processing::error::CoordinatorError;
use thiserror::Error;

/// Top-level errors of a pipeline run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    /// The store could not be reached or configured.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),

    /// Listing kept failing back to back; the last error is attached.
    #[error("{consecutive} consecutive cycles failed, last error: {last}")]
    TooManyFailures { consecutive: usize, last: String },
}
