use thiserror::Error;

use crate::diary::{ParseEnumError, ValidationError};
use crate::sql::ValueError;

/// Errors that can occur during repository operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("{entity_type} not found: {id}")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },
    #[error("{entity_type} already exists: {id}")]
    AlreadyExists {
        entity_type: &'static str,
        id: String,
    },
    #[error("Constraint violation on {entity_type}: {message}")]
    ConstraintViolation {
        entity_type: &'static str,
        message: String,
    },
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Query failed: {0}")]
    QueryFailed(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl RepositoryError {
    /// Whether the error is a uniqueness conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepositoryError::AlreadyExists { .. })
    }
}

impl From<ValidationError> for RepositoryError {
    fn from(err: ValidationError) -> Self {
        RepositoryError::InvalidData(err.to_string())
    }
}

impl From<ValueError> for RepositoryError {
    fn from(err: ValueError) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<ParseEnumError> for RepositoryError {
    fn from(err: ParseEnumError) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;
