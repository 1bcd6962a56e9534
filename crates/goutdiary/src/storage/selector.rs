//! Backend selection at process start.
//!
//! PostgreSQL is preferred when configured and reachable within the probe
//! timeout; otherwise the embedded SQLite file is used. The choice holds for
//! the whole process lifetime.

use std::sync::Arc;

use anyhow::{Context, Result};

use super::backend::{Backend, BackendKind};
use super::migration::{migrate_if_needed, MigrationOutcome};
use super::postgres::PostgresBackend;
use super::repository::SqlRepository;
use super::schema::{ensure_schema, SchemaReport};
use super::sqlite::SqliteBackend;
use crate::config::Config;

/// The storage context handed to everything that reads or writes data.
///
/// Several instances can coexist, each with its own backend.
pub struct Database {
    backend: Arc<dyn Backend>,
    schema: SchemaReport,
    migration: Option<MigrationOutcome>,
}

impl Database {
    pub fn backend(&self) -> Arc<dyn Backend> {
        Arc::clone(&self.backend)
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// A repository over this database.
    pub fn repository(&self) -> SqlRepository {
        SqlRepository::new(self.backend())
    }

    /// What the schema manager changed at startup.
    pub fn schema_report(&self) -> &SchemaReport {
        &self.schema
    }

    /// Outcome of the startup migration, if one was attempted.
    pub fn migration(&self) -> Option<&MigrationOutcome> {
        self.migration.as_ref()
    }

    pub async fn close(&self) {
        self.backend.close().await;
        tracing::info!(backend = %self.backend.describe(), "Database closed");
    }
}

/// Picks and opens the backend, then brings its schema up to date.
///
/// An unreachable preferred backend falls back to SQLite with a warning.
/// Failing to open the chosen backend or to create its tables is fatal.
pub async fn initialize(config: &Config) -> Result<(Arc<dyn Backend>, SchemaReport)> {
    let backend = select(config).await?;

    let schema = ensure_schema(backend.as_ref())
        .await
        .with_context(|| format!("failed to prepare schema on {}", backend.describe()))?;

    tracing::info!(backend = %backend.describe(), "Database initialized");
    Ok((backend, schema))
}

/// [`initialize`], plus the one-time migration when PostgreSQL was chosen.
pub async fn bootstrap(config: &Config) -> Result<Database> {
    let (backend, schema) = initialize(config).await?;

    let migration = if backend.kind() == BackendKind::Postgres {
        let outcome = migrate_if_needed(&config.sqlite_path, backend.as_ref())
            .await
            .context("migration from SQLite failed")?;
        Some(outcome)
    } else {
        None
    };

    Ok(Database {
        backend,
        schema,
        migration,
    })
}

async fn select(config: &Config) -> Result<Arc<dyn Backend>> {
    if let Some(postgres) = &config.postgres {
        match PostgresBackend::probe(postgres).await {
            Ok(()) => {
                tracing::info!(location = %postgres.describe(), "PostgreSQL is available");
                let backend = PostgresBackend::connect(postgres)
                    .await
                    .with_context(|| format!("failed to connect to {}", postgres.describe()))?;
                return Ok(Arc::new(backend));
            }
            Err(err) => {
                tracing::warn!(
                    location = %postgres.describe(),
                    error = %err,
                    "PostgreSQL not available, falling back to SQLite"
                );
            }
        }
    }

    let backend = SqliteBackend::open(&config.sqlite_path)
        .await
        .with_context(|| format!("failed to open {}", config.sqlite_path.display()))?;
    tracing::info!(path = %config.sqlite_path.display(), "Using SQLite");
    Ok(Arc::new(backend))
}
