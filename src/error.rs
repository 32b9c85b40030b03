use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Malformed filter: {0}")]
    MalformedFilter(String),

    #[error("Document '{0}' not found")]
    DocumentNotFound(String),

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Conflict: {0}")]
    ConflictError(String),

    #[error("Storage engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Engine error {code}: {message}")]
    EngineError { code: i64, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type DbResult<T> = Result<T, DbError>;

impl DbError {
    /// Status the hosting REST framework should answer with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            DbError::MalformedFilter(_) | DbError::InvalidDocument(_) => StatusCode::BAD_REQUEST,
            DbError::DocumentNotFound(_) | DbError::CollectionNotFound(_) => StatusCode::NOT_FOUND,
            DbError::ConflictError(_) => StatusCode::PRECONDITION_FAILED,
            DbError::EngineUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            // Default to 500
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Errors caused by the caller's input. Retrying them cannot succeed.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DbError::MalformedFilter(_)
                | DbError::InvalidDocument(_)
                | DbError::DocumentNotFound(_)
                | DbError::ConflictError(_)
        )
    }
}

impl serde::Serialize for DbError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<reqwest::Error> for DbError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() || err.is_request() {
            DbError::EngineUnavailable(err.to_string())
        } else if err.is_decode() {
            DbError::ProtocolError(err.to_string())
        } else {
            DbError::EngineUnavailable(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DbError::MalformedFilter("unexpected '$' at 4".to_string());
        assert_eq!(err.to_string(), "Malformed filter: unexpected '$' at 4");

        let err = DbError::DocumentNotFound("musicians/1".to_string());
        assert_eq!(err.to_string(), "Document 'musicians/1' not found");

        let err = DbError::CollectionNotFound("albums".to_string());
        assert_eq!(err.to_string(), "Collection 'albums' not found");

        let err = DbError::ConflictError("revision mismatch".to_string());
        assert_eq!(err.to_string(), "Conflict: revision mismatch");

        let err = DbError::EngineUnavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "Storage engine unavailable: connection refused");

        let err = DbError::EngineError {
            code: 1501,
            message: "syntax error".to_string(),
        };
        assert_eq!(err.to_string(), "Engine error 1501: syntax error");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            DbError::MalformedFilter("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            DbError::DocumentNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DbError::ConflictError("x".into()).status_code(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            DbError::EngineUnavailable("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            DbError::ProtocolError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        assert!(DbError::MalformedFilter("x".into()).is_client_error());
        assert!(DbError::ConflictError("x".into()).is_client_error());
        assert!(!DbError::EngineUnavailable("x".into()).is_client_error());
    }

    #[test]
    fn test_error_debug() {
        let err = DbError::CollectionNotFound("test".to_string());
        let debug = format!("{:?}", err);
        assert!(debug.contains("CollectionNotFound"));
    }
}
