use thiserror::Error;

/// Top-level error type for the QueryLens system.
///
/// Subsystem crates define their own error types and implement
/// `From<QueryLensError>` so that the `?` operator works across crate
/// boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QueryLensError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for QueryLensError {
    fn from(err: toml::de::Error) -> Self {
        QueryLensError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for QueryLensError {
    fn from(err: toml::ser::Error) -> Self {
        QueryLensError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for QueryLensError {
    fn from(err: serde_json::Error) -> Self {
        QueryLensError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for QueryLens operations.
pub type Result<T> = std::result::Result<T, QueryLensError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryLensError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: QueryLensError = io_err.into();
        assert!(matches!(err, QueryLensError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: QueryLensError = json_err.into();
        assert!(matches!(err, QueryLensError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
        let err: QueryLensError = toml_err.into();
        assert!(matches!(err, QueryLensError::Config(_)));
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(QueryLensError, &str)> = vec![
            (
                QueryLensError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                QueryLensError::Validation("question is empty".to_string()),
                "Validation error: question is empty",
            ),
            (
                QueryLensError::Serialization("bad json".to_string()),
                "Serialization error: bad json",
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.to_string(), expected);
        }
    }
}
