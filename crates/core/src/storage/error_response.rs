//! Structured error bodies for the HTTP handlers built on the repositories.
//!
//! Validation and conflict messages reach the client as they are. Engine
//! failures are reduced to a generic message so SQL text and connection
//! details stay in the logs.

use serde::Serialize;

use super::RepositoryError;

/// Stable, client-facing error class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    /// The record, or one of its unique fields, already exists.
    Conflict,
    /// A range, enumeration or reference check rejected the write.
    ConstraintViolation,
    InvalidData,
    /// The database could not be reached.
    Unavailable,
    Internal,
}

impl ErrorCode {
    pub fn status(&self) -> u16 {
        match self {
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict => 409,
            ErrorCode::ConstraintViolation | ErrorCode::InvalidData => 400,
            ErrorCode::Unavailable => 503,
            ErrorCode::Internal => 500,
        }
    }
}

impl From<&RepositoryError> for ErrorCode {
    fn from(error: &RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound { .. } => ErrorCode::NotFound,
            RepositoryError::AlreadyExists { .. } => ErrorCode::Conflict,
            RepositoryError::ConstraintViolation { .. } => ErrorCode::ConstraintViolation,
            RepositoryError::InvalidData(_) => ErrorCode::InvalidData,
            RepositoryError::ConnectionFailed(_) => ErrorCode::Unavailable,
            RepositoryError::QueryFailed(_) | RepositoryError::Serialization(_) => {
                ErrorCode::Internal
            }
        }
    }
}

/// JSON body of a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub status: u16,
    pub code: ErrorCode,
    /// Entity the error is about (`"Reading"`, `"FoodItem"`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity: Option<&'static str>,
    pub message: String,
}

impl From<&RepositoryError> for ErrorResponse {
    fn from(error: &RepositoryError) -> Self {
        let code = ErrorCode::from(error);
        let (entity, message) = match error {
            RepositoryError::NotFound { entity_type, .. }
            | RepositoryError::AlreadyExists { entity_type, .. }
            | RepositoryError::ConstraintViolation { entity_type, .. } => {
                (Some(*entity_type), error.to_string())
            }
            RepositoryError::InvalidData(message) => (None, message.clone()),
            RepositoryError::ConnectionFailed(_) => {
                (None, "Database temporarily unavailable".to_string())
            }
            RepositoryError::QueryFailed(_) | RepositoryError::Serialization(_) => {
                (None, "Internal storage error".to_string())
            }
        };

        Self {
            status: code.status(),
            code,
            entity,
            message,
        }
    }
}

/// HTTP status for a repository error.
pub fn repository_error_to_status_code(error: &RepositoryError) -> u16 {
    ErrorCode::from(error).status()
}
