//! Error types for the streaming chat layer.

use querylens_core::error::QueryLensError;
use querylens_learning::LearningError;
use querylens_storage::StorageError;

/// Errors from the stream coordinator and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("agent error: {0}")]
    Agent(String),
    #[error("execution error: {0}")]
    Execution(String),
    #[error("artifact error: {0}")]
    Artifact(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<QueryLensError> for ChatError {
    fn from(err: QueryLensError) -> Self {
        ChatError::Storage(err.to_string())
    }
}

impl From<StorageError> for ChatError {
    fn from(err: StorageError) -> Self {
        ChatError::Storage(err.to_string())
    }
}

impl From<LearningError> for ChatError {
    fn from(err: LearningError) -> Self {
        ChatError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for ChatError {
    fn from(err: std::io::Error) -> Self {
        ChatError::Artifact(err.to_string())
    }
}

impl From<csv::Error> for ChatError {
    fn from(err: csv::Error) -> Self {
        ChatError::Artifact(err.to_string())
    }
}

impl ChatError {
    /// Whether the error was caused by the request itself rather than a
    /// collaborator.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ChatError::EmptyMessage | ChatError::MessageTooLong(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        let err = ChatError::EmptyMessage;
        assert_eq!(err.to_string(), "message cannot be empty");

        let err = ChatError::MessageTooLong(4000);
        assert_eq!(
            err.to_string(),
            "message exceeds maximum length of 4000 characters"
        );

        let err = ChatError::Agent("connection reset".to_string());
        assert_eq!(err.to_string(), "agent error: connection reset");

        let err = ChatError::Execution("syntax error near FROM".to_string());
        assert_eq!(err.to_string(), "execution error: syntax error near FROM");

        let err = ChatError::Artifact("disk full".to_string());
        assert_eq!(err.to_string(), "artifact error: disk full");

        let err = ChatError::Storage("locked".to_string());
        assert_eq!(err.to_string(), "storage error: locked");
    }

    #[test]
    fn test_from_query_lens_error() {
        let err: ChatError = QueryLensError::Storage("gone".to_string()).into();
        assert!(matches!(err, ChatError::Storage(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_storage_error() {
        let err: ChatError = StorageError::LockPoisoned("conversation store").into();
        assert_eq!(
            err.to_string(),
            "storage error: conversation store lock poisoned"
        );
    }

    #[test]
    fn test_from_io_error_is_artifact() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing dir");
        let err: ChatError = io.into();
        assert!(matches!(err, ChatError::Artifact(_)));
    }

    #[test]
    fn test_client_errors() {
        assert!(ChatError::EmptyMessage.is_client_error());
        assert!(ChatError::MessageTooLong(10).is_client_error());
        assert!(!ChatError::Agent("x".to_string()).is_client_error());
    }
}
