//! Embedded SQLite backend.
//!
//! One file, one connection: the pool is capped at a single connection so
//! connection-scoped pragmas (foreign keys) apply to every statement and
//! writers serialize naturally. Timestamps are stored as canonical text and
//! booleans as `0`/`1`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Column, Row as _, Sqlite, TypeInfo, ValueRef};
use tokio::sync::Mutex;

use goutdiary_core::sql::{format_timestamp, Dialect, Row, SqlValue, Statement, ValueKind};
use goutdiary_core::storage::{RepositoryError, Result};

use super::backend::{Backend, Executor, RunResult, Transaction};
use super::error::map_sqlx_error;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite implementation of [`Backend`].
pub struct SqliteBackend {
    pool: SqlitePool,
    location: String,
}

impl SqliteBackend {
    /// Opens (creating if needed) the database file at `path`.
    ///
    /// Missing parent directories are created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                RepositoryError::ConnectionFailed(format!(
                    "cannot create directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        Self::connect(options, path.display().to_string()).await
    }

    /// Opens an existing database file without write access.
    pub async fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .foreign_keys(false);

        Self::connect(options, path.display().to_string()).await
    }

    /// Private in-memory database. Lives as long as the backend.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| RepositoryError::ConnectionFailed(e.to_string()))?
            .foreign_keys(true);

        Self::connect(options, ":memory:".to_string()).await
    }

    async fn connect(options: SqliteConnectOptions, location: String) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| {
                RepositoryError::ConnectionFailed(format!("cannot open {location}: {e}"))
            })?;

        tracing::debug!(location = %location, "Opened SQLite database");

        Ok(Self { pool, location })
    }

    /// The database file, or `None` for in-memory databases.
    pub fn path(&self) -> Option<PathBuf> {
        (self.location != ":memory:").then(|| PathBuf::from(&self.location))
    }
}

#[async_trait]
impl Executor for SqliteBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn all(&self, statement: &Statement) -> Result<Vec<Row>> {
        let sql = statement.render(Dialect::Sqlite);
        let rows = build_query(&sql, statement)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(decode_row).collect()
    }

    async fn get(&self, statement: &Statement) -> Result<Option<Row>> {
        let sql = statement.render(Dialect::Sqlite);
        let row = build_query(&sql, statement)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn run(&self, statement: &Statement) -> Result<RunResult> {
        let sql = statement.render(Dialect::Sqlite);
        let result = build_query(&sql, statement)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(RunResult {
            rows_affected: result.rows_affected(),
            returned_id: None,
        })
    }

    async fn exec(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.location)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(SqliteTransaction {
            tx: Mutex::new(Some(tx)),
        }))
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let rows = self
            .all(&Statement::new("SELECT name FROM pragma_table_info(?)").bind(table))
            .await?;
        rows.iter()
            .map(|row| row.text("name").map_err(RepositoryError::from))
            .collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// An open SQLite transaction.
pub struct SqliteTransaction {
    tx: Mutex<Option<sqlx::Transaction<'static, Sqlite>>>,
}

fn finished() -> RepositoryError {
    RepositoryError::QueryFailed("transaction already finished".to_string())
}

#[async_trait]
impl Executor for SqliteTransaction {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn all(&self, statement: &Statement) -> Result<Vec<Row>> {
        let sql = statement.render(Dialect::Sqlite);
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        let rows = build_query(&sql, statement)
            .fetch_all(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(decode_row).collect()
    }

    async fn get(&self, statement: &Statement) -> Result<Option<Row>> {
        let sql = statement.render(Dialect::Sqlite);
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        let row = build_query(&sql, statement)
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn run(&self, statement: &Statement) -> Result<RunResult> {
        let sql = statement.render(Dialect::Sqlite);
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        let result = build_query(&sql, statement)
            .execute(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        Ok(RunResult {
            rows_affected: result.rows_affected(),
            returned_id: None,
        })
    }

    async fn exec(&self, sql: &str) -> Result<()> {
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        sqlx::Executor::execute(&mut **tx, sqlx::raw_sql(sql))
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        tx.rollback().await.map_err(map_sqlx_error)
    }
}

fn build_query<'q>(sql: &'q str, statement: &Statement) -> SqliteQuery<'q> {
    statement
        .params()
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &SqlValue) -> SqliteQuery<'q> {
    match value {
        SqlValue::Null(ValueKind::Bool) => query.bind(None::<bool>),
        SqlValue::Null(ValueKind::Int) => query.bind(None::<i64>),
        SqlValue::Null(ValueKind::Real) => query.bind(None::<f64>),
        SqlValue::Null(ValueKind::Text | ValueKind::Timestamp) => query.bind(None::<String>),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Real(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Timestamp(ts) => query.bind(format_timestamp(ts)),
    }
}

/// Decodes by storage class, not declared type: SQLite columns hold
/// whatever was written into them.
fn decode_row(row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index).map_err(map_sqlx_error)?;
        let value = if raw.is_null() {
            SqlValue::Null(ValueKind::Text)
        } else {
            let storage_class = raw.type_info().name().to_ascii_uppercase();
            match storage_class.as_str() {
                "INTEGER" | "BOOLEAN" => {
                    SqlValue::Int(row.try_get_unchecked::<i64, _>(index).map_err(map_sqlx_error)?)
                }
                "REAL" | "NUMERIC" => {
                    SqlValue::Real(row.try_get_unchecked::<f64, _>(index).map_err(map_sqlx_error)?)
                }
                "BLOB" => {
                    let bytes = row
                        .try_get_unchecked::<Vec<u8>, _>(index)
                        .map_err(map_sqlx_error)?;
                    SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
                }
                _ => SqlValue::Text(
                    row.try_get_unchecked::<String, _>(index)
                        .map_err(map_sqlx_error)?,
                ),
            }
        };
        out.push(column.name(), value);
    }
    Ok(out)
}
