use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NlqError {
    #[error("{0}")]
    IrrelevantQuery(String),

    #[error("Schema for table '{0}' not found")]
    SchemaNotFound(String),

    #[error("No table has been selected for this session")]
    NoTableSelected,

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("All {attempts} query attempts failed (last error: {})", errors.last().map(String::as_str).unwrap_or("none"))]
    RetriesExhausted { attempts: usize, errors: Vec<String> },

    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Invalid gateway response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Stable, serializable discriminant carried in error envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    IrrelevantQuery,
    SchemaNotFound,
    NoTableSelected,
    ExecutionError,
    RetriesExhausted,
    GatewayUnavailable,
    InvalidResponse,
    Config,
    Internal,
}

impl NlqError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NlqError::IrrelevantQuery(_) => ErrorKind::IrrelevantQuery,
            NlqError::SchemaNotFound(_) => ErrorKind::SchemaNotFound,
            NlqError::NoTableSelected => ErrorKind::NoTableSelected,
            NlqError::Execution(_) => ErrorKind::ExecutionError,
            NlqError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            NlqError::GatewayUnavailable(_) => ErrorKind::GatewayUnavailable,
            NlqError::InvalidResponse(_) | NlqError::Json(_) => ErrorKind::InvalidResponse,
            NlqError::Config(_) | NlqError::Yaml(_) => ErrorKind::Config,
            NlqError::Internal(_) | NlqError::Io(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, NlqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retries_exhausted_message_uses_last_error() {
        let err = NlqError::RetriesExhausted {
            attempts: 2,
            errors: vec!["first".to_string(), "second".to_string()],
        };
        assert_eq!(err.to_string(), "All 2 query attempts failed (last error: second)");
        assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
    }

    #[test]
    fn test_json_errors_are_invalid_responses() {
        let err: NlqError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::InvalidResponse);
    }
}
