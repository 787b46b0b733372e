use thiserror::Error;

/// Unified error type for every facade and backend operation
#[derive(Error, Debug)]
pub enum DataError {
    /// Operation addressed an identifier that does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Caller-supplied record or query is malformed; raised before any native call
    #[error("Validation error: {0}")]
    Validation(String),

    /// The engine rejected a write because of a declared constraint (foreign key, uniqueness)
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Engine unreachable or pool exhausted
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed inside the engine
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Query cannot be expressed for this collection or backend
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Stored or supplied data could not be (de)serialized, e.g. malformed JSON text
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Invalid configuration or catalog
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Operation not supported by this backend
    #[error("Operation not supported: {0}")]
    OperationNotSupported(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DataError {
    /// Create a "not found" error with custom message
    pub fn not_found(msg: impl Into<String>) -> Self {
        DataError::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        DataError::Validation(msg.into())
    }

    /// Create a constraint violation error
    pub fn constraint(msg: impl Into<String>) -> Self {
        DataError::Constraint(msg.into())
    }

    /// Create an invalid query error
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        DataError::InvalidQuery(msg.into())
    }

    /// Create an operation not supported error
    pub fn operation_not_supported(msg: impl Into<String>) -> Self {
        DataError::OperationNotSupported(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        DataError::InvalidConfiguration(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DataError::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, DataError::Validation(_))
    }

    pub fn is_constraint(&self) -> bool {
        matches!(self, DataError::Constraint(_))
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, DataError::ConnectionFailed(_))
    }
}

impl From<serde_json::Error> for DataError {
    fn from(e: serde_json::Error) -> Self {
        DataError::SerializationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_predicates() {
        assert!(DataError::not_found("users/1").is_not_found());
        assert!(DataError::constraint("fk").is_constraint());
        assert!(!DataError::constraint("fk").is_connection());
        assert!(DataError::ConnectionFailed("refused".into()).is_connection());
    }

    #[test]
    fn test_json_error_becomes_serialization_error() {
        let err: DataError = serde_json::from_str::<serde_json::Value>("[1,")
            .unwrap_err()
            .into();
        assert!(matches!(err, DataError::SerializationError(_)));
    }
}
