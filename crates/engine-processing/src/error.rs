use connectors::error::StoreError;
use engine_core::error::{StagingError, StateError};
use model::pagination::cursor::Cursor;
use std::{path::PathBuf, process::ExitStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Staging failed: {0}")]
    Staging(#[from] StagingError),

    #[error("State persistence failed: {0}")]
    State(#[from] StateError),

    /// Listing kept failing after transport retries and nothing was staged.
    #[error("Listing failed at cursor {cursor}: {source}")]
    Listing {
        cursor: Cursor,
        #[source]
        source: StoreError,
    },

    /// A local filesystem error while moving bytes to or from the store.
    #[error("Local transfer failed for {key}: {source}")]
    LocalTransfer {
        key: String,
        #[source]
        source: StoreError,
    },

    /// `upload` has not closed the cycle opened by `next_batch`.
    #[error("A batch cycle is in flight; finish it with upload() first")]
    CycleInFlight,
}

impl CoordinatorError {
    /// Everything except a listing outage is a local or programming fault the
    /// run cannot recover from.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, CoordinatorError::Listing { .. })
    }
}

#[derive(Error, Debug)]
pub enum AsrError {
    #[error("Transcription failed for {path}: {message}")]
    Transcription { path: PathBuf, message: String },

    #[error("No aligner available for language `{0}`")]
    AlignerUnavailable(String),

    #[error("Alignment failed: {0}")]
    Alignment(String),

    #[error("Transcriber I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid transcript: {0}")]
    InvalidTranscript(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Unsupported WAV layout: {0}")]
    Unsupported(String),

    #[error("Audio I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Processing I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Staging error: {0}")]
    Staging(#[from] StagingError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] csv::Error),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Transcription error: {0}")]
    Asr(#[from] AsrError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ProcessingError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProcessingError::Io {
            path: path.into(),
            source,
        }
    }
}
