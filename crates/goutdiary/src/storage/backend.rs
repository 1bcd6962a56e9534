//! Backend abstraction.
//!
//! Repositories, the schema manager and the migration engine talk to either
//! engine through these traits. Statements arrive in logical form
//! ([`Statement`]) and each implementation renders them for its dialect.

use async_trait::async_trait;

use goutdiary_core::sql::{Dialect, Row, SqlValue, Statement};
use goutdiary_core::storage::Result;

/// Which engine is behind a [`Backend`].
pub type BackendKind = Dialect;

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub rows_affected: u64,
    /// The `RETURNING` column of the written row, when one was requested and
    /// the backend supports it.
    pub returned_id: Option<String>,
}

/// Runs statements. Implemented by backends and by open transactions.
#[async_trait]
pub trait Executor: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Every result row.
    async fn all(&self, statement: &Statement) -> Result<Vec<Row>>;

    /// The first result row, if any.
    async fn get(&self, statement: &Statement) -> Result<Option<Row>>;

    /// A statement without result rows.
    async fn run(&self, statement: &Statement) -> Result<RunResult>;

    /// Raw SQL without parameters. May contain several statements.
    async fn exec(&self, sql: &str) -> Result<()>;

    /// Free-form query with positional parameters.
    async fn query(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        self.all(&Statement::new(sql).bind_all(params)).await
    }
}

/// An open transaction. Dropping it without committing rolls it back.
#[async_trait]
pub trait Transaction: Executor {
    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;

    async fn savepoint(&self, name: &str) -> Result<()> {
        self.exec(&format!("SAVEPOINT {name}")).await
    }

    async fn release_savepoint(&self, name: &str) -> Result<()> {
        self.exec(&format!("RELEASE SAVEPOINT {name}")).await
    }

    async fn rollback_to_savepoint(&self, name: &str) -> Result<()> {
        self.exec(&format!("ROLLBACK TO SAVEPOINT {name}")).await
    }
}

/// A connected database.
#[async_trait]
pub trait Backend: Executor {
    fn kind(&self) -> BackendKind {
        self.dialect()
    }

    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    /// Live column names of `table`, empty when the table does not exist.
    async fn table_columns(&self, table: &str) -> Result<Vec<String>>;

    async fn table_exists(&self, table: &str) -> Result<bool> {
        Ok(!self.table_columns(table).await?.is_empty())
    }

    /// Closes every connection. Further use fails.
    async fn close(&self);
}

/// Commits on success and rolls back on failure.
///
/// A failed rollback is logged; the original error is returned.
pub async fn finish<T>(tx: Box<dyn Transaction>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

/// `SELECT COUNT(*)` over `table`.
pub async fn count_rows<E>(executor: &E, table: &str) -> Result<i64>
where
    E: Executor + ?Sized,
{
    let row = executor
        .get(&Statement::new(format!("SELECT COUNT(*) AS count FROM {table}")))
        .await?;
    match row {
        Some(row) => Ok(row.int("count")?),
        None => Ok(0),
    }
}
