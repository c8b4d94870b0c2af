use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by record stores regardless of the underlying backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store could not be reached or rejected the request.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The backing table does not exist; readers treat this as an empty result.
    #[error("table `{table}` does not exist")]
    MissingTable { table: String },
    /// A record could not be turned into a row; nothing was written.
    #[error("failed to encode a `{table}` row")]
    Encode {
        table: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Whether this error only means the table has not been provisioned yet.
    pub fn is_missing_table(&self) -> bool {
        matches!(self, StorageError::MissingTable { .. })
    }
}
