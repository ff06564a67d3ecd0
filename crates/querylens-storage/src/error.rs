use thiserror::Error;

use querylens_core::error::QueryLensError;

/// Errors from the durable JSON stores.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl From<StorageError> for QueryLensError {
    fn from(err: StorageError) -> Self {
        QueryLensError::Storage(err.to_string())
    }
}
