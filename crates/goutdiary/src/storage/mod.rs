//! Storage layer.
//!
//! Backend selection, schema evolution, the one-time SQLite to PostgreSQL
//! migration and the repository implementation shared by both engines.
//!
//! # Usage
//!
//! ```rust,no_run
//! use goutdiary::config::Config;
//! use goutdiary::storage::bootstrap;
//! use goutdiary_core::storage::UserRepository;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let database = bootstrap(&Config::from_env()).await?;
//! let repo = database.repository();
//! let _user = repo.get_or_create_user("device-guid").await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod error;
mod migration;
mod postgres;
mod repository;
mod schema;
mod selector;
mod sqlite;

pub use backend::{count_rows, finish, Backend, BackendKind, Executor, RunResult, Transaction};
pub use error::{for_entity, map_sqlx_error};
pub use migration::{
    migrate_if_needed, MigrationError, MigrationOutcome, MigrationReport, TableReport,
};
pub use postgres::{PostgresBackend, PostgresTransaction};
pub use repository::SqlRepository;
pub use schema::{ensure_schema, SchemaReport};
pub use selector::{bootstrap, initialize, Database};
pub use sqlite::{SqliteBackend, SqliteTransaction};
