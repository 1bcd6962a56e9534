//! sqlx error mapping.
//!
//! Maps `sqlx::Error` to `RepositoryError` from `goutdiary_core::storage`.
//! Constraint failures become semantic variants; repositories relabel them
//! with the entity involved through [`for_entity`].

use goutdiary_core::storage::RepositoryError;
use sqlx::error::ErrorKind;

/// Maps a sqlx error to a RepositoryError.
///
/// # Error Mapping
///
/// - Unique / primary key violations → `RepositoryError::AlreadyExists`
/// - Foreign key, check and not-null violations → `RepositoryError::ConstraintViolation`
/// - Pool, I/O, TLS and configuration errors → `RepositoryError::ConnectionFailed`
/// - Decode errors → `RepositoryError::Serialization`
/// - All other errors → `RepositoryError::QueryFailed`
pub fn map_sqlx_error(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation => RepositoryError::AlreadyExists {
                entity_type: "record",
                id: db.constraint().unwrap_or("unknown").to_string(),
            },
            ErrorKind::ForeignKeyViolation
            | ErrorKind::CheckViolation
            | ErrorKind::NotNullViolation => RepositoryError::ConstraintViolation {
                entity_type: "record",
                message: db.message().to_string(),
            },
            _ => RepositoryError::QueryFailed(err.to_string()),
        },

        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => RepositoryError::ConnectionFailed(err.to_string()),

        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            RepositoryError::Serialization(err.to_string())
        }

        _ => RepositoryError::QueryFailed(err.to_string()),
    }
}

/// Names the entity a constraint error is about.
///
/// Only the variants that carry an entity are touched.
pub fn for_entity(err: RepositoryError, entity_type: &'static str, id: &str) -> RepositoryError {
    match err {
        RepositoryError::AlreadyExists { .. } => RepositoryError::AlreadyExists {
            entity_type,
            id: id.to_string(),
        },
        RepositoryError::NotFound { .. } => RepositoryError::NotFound {
            entity_type,
            id: id.to_string(),
        },
        RepositoryError::ConstraintViolation { message, .. } => {
            RepositoryError::ConstraintViolation {
                entity_type,
                message,
            }
        }
        other => other,
    }
}
