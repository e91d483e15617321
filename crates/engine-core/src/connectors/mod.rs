use crate::retry::RetryDisposition;
use connectors::error::StoreError;

pub mod lister;
pub mod retrying;

/// Sorts store failures into the ones a second attempt may fix and the ones it
/// cannot.
pub fn classify_store_error(err: &StoreError) -> RetryDisposition {
    match err {
        StoreError::Throttled(_) | StoreError::Timeout { .. } | StoreError::Transient(_) => {
            RetryDisposition::Retry
        }
        StoreError::Io(e) => match e.kind() {
            std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => RetryDisposition::Retry,
            _ => RetryDisposition::Stop,
        },
        StoreError::NotFound(_)
        | StoreError::LocalIo { .. }
        | StoreError::InvalidKey(_)
        | StoreError::Config(_)
        | StoreError::RetriesExhausted { .. }
        | StoreError::Other(_) => RetryDisposition::Stop,
    }
}
