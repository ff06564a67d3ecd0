use thiserror::Error;

use querylens_core::error::QueryLensError;
use querylens_storage::StorageError;

/// Errors from the learning engine and the golden query registry.
#[derive(Error, Debug)]
pub enum LearningError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("export error: {0}")]
    Export(String),
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl From<LearningError> for QueryLensError {
    fn from(err: LearningError) -> Self {
        match err {
            LearningError::Validation(msg) => QueryLensError::Validation(msg),
            other => QueryLensError::Storage(other.to_string()),
        }
    }
}

impl From<csv::Error> for LearningError {
    fn from(err: csv::Error) -> Self {
        LearningError::Export(err.to_string())
    }
}
