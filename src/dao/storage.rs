use std::error::Error;
use thiserror::Error;

use crate::state::resolver::SubmitRejection;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or failed mid-operation.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The backend cannot perform the operation (e.g. no atomic round resolution).
    #[error("storage operation `{operation}` is not supported by this backend")]
    Unsupported { operation: &'static str },
    /// No room is stored under `code`.
    #[error("room `{code}` not found")]
    RoomNotFound { code: String },
    /// A room with `code` is already stored.
    #[error("room `{code}` already exists")]
    DuplicateRoom { code: String },
    /// The room changed since the write was planned.
    #[error("room `{code}` changed concurrently (expected version {expected}, found {actual})")]
    VersionConflict {
        code: String,
        expected: u64,
        actual: u64,
    },
    /// The store refused a submission after re-reading the room.
    #[error(transparent)]
    Rejected(#[from] SubmitRejection),
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Whether the submission coordinator should retry through the fallback path.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            StorageError::Unsupported { .. } | StorageError::Unavailable { .. }
        )
    }
}
