//! PostgreSQL backend.
//!
//! Pooled client connections. Booleans and timestamps travel as native
//! `BOOLEAN` / `TIMESTAMPTZ` values; NULL parameters are bound with their
//! type so the server never has to guess.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, ConnectOptions, Connection, Postgres, Row as _, TypeInfo, ValueRef};
use tokio::sync::Mutex;

use goutdiary_core::sql::{Dialect, Row, SqlValue, Statement, ValueKind};
use goutdiary_core::storage::{RepositoryError, Result};

use super::backend::{Backend, Executor, RunResult, Transaction};
use super::error::map_sqlx_error;
use crate::config::PostgresConfig;

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// PostgreSQL implementation of [`Backend`].
pub struct PostgresBackend {
    pool: PgPool,
    location: String,
}

fn connect_options(config: &PostgresConfig) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.user)
        .password(&config.password)
}

impl PostgresBackend {
    /// Checks that the server accepts a connection within the probe timeout.
    pub async fn probe(config: &PostgresConfig) -> Result<()> {
        let options = connect_options(config);
        let attempt = async {
            let mut conn = options.connect().await.map_err(map_sqlx_error)?;
            conn.ping().await.map_err(map_sqlx_error)?;
            conn.close().await.map_err(map_sqlx_error)
        };

        tokio::time::timeout(config.probe_timeout, attempt)
            .await
            .map_err(|_| {
                RepositoryError::ConnectionFailed(format!(
                    "no answer from {} within {:?}",
                    config.describe(),
                    config.probe_timeout
                ))
            })?
    }

    /// Opens the connection pool.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .connect_with(connect_options(config))
            .await
            .map_err(map_sqlx_error)?;

        tracing::debug!(
            location = %config.describe(),
            max_connections = config.max_connections,
            "Opened PostgreSQL pool"
        );

        Ok(Self {
            pool,
            location: config.describe(),
        })
    }

    /// Opens a small pool from a connection URL.
    pub async fn connect_url(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(map_sqlx_error)?;

        Ok(Self {
            pool,
            location: "TEST_DATABASE_URL".to_string(),
        })
    }
}

#[async_trait]
impl Executor for PostgresBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn all(&self, statement: &Statement) -> Result<Vec<Row>> {
        let sql = statement.render(Dialect::Postgres);
        let rows = build_query(&sql, statement)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(decode_row).collect()
    }

    async fn get(&self, statement: &Statement) -> Result<Option<Row>> {
        let sql = statement.render(Dialect::Postgres);
        let row = build_query(&sql, statement)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn run(&self, statement: &Statement) -> Result<RunResult> {
        let sql = statement.render(Dialect::Postgres);
        let query = build_query(&sql, statement);
        if statement.returning_column().is_some() {
            let row = query
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
            returned(row)
        } else {
            let result = query.execute(&self.pool).await.map_err(map_sqlx_error)?;
            Ok(RunResult {
                rows_affected: result.rows_affected(),
                returned_id: None,
            })
        }
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
impl Backend for PostgresBackend {
    fn describe(&self) -> String {
        format!("postgres:{}", self.location)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await.map_err(map_sqlx_error)?;
        Ok(Box::new(PostgresTransaction {
            tx: Mutex::new(Some(tx)),
        }))
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let rows = self
            .all(
                &Statement::new(
                    "SELECT CAST(column_name AS TEXT) AS column_name \
                     FROM information_schema.columns \
                     WHERE table_schema = current_schema() AND table_name = ? \
                     ORDER BY ordinal_position",
                )
                .bind(table),
            )
            .await?;
        rows.iter()
            .map(|row| row.text("column_name").map_err(RepositoryError::from))
            .collect()
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// An open PostgreSQL transaction.
pub struct PostgresTransaction {
    tx: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
}

fn finished() -> RepositoryError {
    RepositoryError::QueryFailed("transaction already finished".to_string())
}

#[async_trait]
impl Executor for PostgresTransaction {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn all(&self, statement: &Statement) -> Result<Vec<Row>> {
        let sql = statement.render(Dialect::Postgres);
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        let rows = build_query(&sql, statement)
            .fetch_all(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        rows.iter().map(decode_row).collect()
    }

    async fn get(&self, statement: &Statement) -> Result<Option<Row>> {
        let sql = statement.render(Dialect::Postgres);
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        let row = build_query(&sql, statement)
            .fetch_optional(&mut **tx)
            .await
            .map_err(map_sqlx_error)?;
        row.as_ref().map(decode_row).transpose()
    }

    async fn run(&self, statement: &Statement) -> Result<RunResult> {
        let sql = statement.render(Dialect::Postgres);
        let mut guard = self.tx.lock().await;
        let tx = guard.as_mut().ok_or_else(finished)?;
        let query = build_query(&sql, statement);
        if statement.returning_column().is_some() {
            let row = query
                .fetch_optional(&mut **tx)
                .await
                .map_err(map_sqlx_error)?;
            returned(row)
        } else {
            let result = query.execute(&mut **tx).await.map_err(map_sqlx_error)?;
            Ok(RunResult {
                rows_affected: result.rows_affected(),
                returned_id: None,
            })
        }
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
impl Transaction for PostgresTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        tx.commit().await.map_err(map_sqlx_error)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let tx = self.tx.lock().await.take().ok_or_else(finished)?;
        tx.rollback().await.map_err(map_sqlx_error)
    }
}

/// A `RETURNING` row, or none when the insert was skipped.
fn returned(row: Option<PgRow>) -> Result<RunResult> {
    match row {
        Some(row) => {
            let decoded = decode_row(&row)?;
            let id = decoded
                .iter()
                .next()
                .map(|(column, _)| decoded.opt_text(column))
                .transpose()?
                .flatten();
            Ok(RunResult {
                rows_affected: 1,
                returned_id: id,
            })
        }
        None => Ok(RunResult::default()),
    }
}

fn build_query<'q>(sql: &'q str, statement: &Statement) -> PgQuery<'q> {
    statement
        .params()
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

fn bind_value<'q>(query: PgQuery<'q>, value: &SqlValue) -> PgQuery<'q> {
    match value {
        SqlValue::Null(ValueKind::Bool) => query.bind(None::<bool>),
        SqlValue::Null(ValueKind::Int) => query.bind(None::<i64>),
        SqlValue::Null(ValueKind::Real) => query.bind(None::<f64>),
        SqlValue::Null(ValueKind::Text) => query.bind(None::<String>),
        SqlValue::Null(ValueKind::Timestamp) => query.bind(None::<DateTime<Utc>>),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(i) => query.bind(*i),
        SqlValue::Real(f) => query.bind(*f),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Timestamp(ts) => query.bind(*ts),
    }
}

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index).map_err(map_sqlx_error)?;
        let type_name = raw.type_info().name().to_string();
        let is_null = raw.is_null();
        let kind = match type_name.as_str() {
            "BOOL" => ValueKind::Bool,
            "INT2" | "INT4" | "INT8" => ValueKind::Int,
            "FLOAT4" | "FLOAT8" => ValueKind::Real,
            "TIMESTAMPTZ" | "TIMESTAMP" | "DATE" => ValueKind::Timestamp,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" | "UNKNOWN" => ValueKind::Text,
            other => {
                return Err(RepositoryError::QueryFailed(format!(
                    "column {} has unsupported type {other}",
                    column.name()
                )))
            }
        };

        let value = if is_null {
            SqlValue::Null(kind)
        } else {
            decode_value(row, index, &type_name).map_err(map_sqlx_error)?
        };
        out.push(column.name(), value);
    }
    Ok(out)
}

fn decode_value(
    row: &PgRow,
    index: usize,
    type_name: &str,
) -> std::result::Result<SqlValue, sqlx::Error> {
    Ok(match type_name {
        "BOOL" => SqlValue::Bool(row.try_get_unchecked::<bool, _>(index)?),
        "INT2" => SqlValue::Int(i64::from(row.try_get_unchecked::<i16, _>(index)?)),
        "INT4" => SqlValue::Int(i64::from(row.try_get_unchecked::<i32, _>(index)?)),
        "INT8" => SqlValue::Int(row.try_get_unchecked::<i64, _>(index)?),
        "FLOAT4" => SqlValue::Real(f64::from(row.try_get_unchecked::<f32, _>(index)?)),
        "FLOAT8" => SqlValue::Real(row.try_get_unchecked::<f64, _>(index)?),
        "TIMESTAMPTZ" => SqlValue::Timestamp(row.try_get_unchecked::<DateTime<Utc>, _>(index)?),
        "TIMESTAMP" => SqlValue::Timestamp(
            row.try_get_unchecked::<NaiveDateTime, _>(index)?
                .and_utc(),
        ),
        "DATE" => SqlValue::Timestamp(
            row.try_get_unchecked::<NaiveDate, _>(index)?
                .and_time(chrono::NaiveTime::MIN)
                .and_utc(),
        ),
        _ => SqlValue::Text(row.try_get_unchecked::<String, _>(index)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn test_backend() -> Option<PostgresBackend> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        Some(PostgresBackend::connect_url(&url).await.unwrap())
    }

    #[tokio::test]
    async fn test_probe_unreachable_host_fails() {
        let mut config = PostgresConfig::new("127.0.0.1");
        config.port = 1;
        config.probe_timeout = std::time::Duration::from_millis(500);

        let result = PostgresBackend::probe(&config).await;

        assert!(matches!(result, Err(RepositoryError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_native_types_round_trip() {
        let Some(backend) = test_backend().await else {
            return;
        };
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();

        let row = backend
            .get(
                &Statement::new(
                    "SELECT CAST(? AS BOOLEAN) AS flag, CAST(? AS REAL) AS score, \
                     CAST(? AS TIMESTAMPTZ) AS seen, CAST(? AS TEXT) AS missing",
                )
                .bind(true)
                .bind(6.5)
                .bind(ts)
                .bind(None::<String>),
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(row.get("flag"), Some(&SqlValue::Bool(true)));
        assert_eq!(row.real("score").unwrap(), 6.5);
        assert_eq!(row.timestamp("seen").unwrap(), ts);
        assert_eq!(row.get("missing"), Some(&SqlValue::Null(ValueKind::Text)));
    }

    #[tokio::test]
    async fn test_returning_reports_id() {
        let Some(backend) = test_backend().await else {
            return;
        };
        let tx = backend.begin().await.unwrap();
        tx.exec("CREATE TEMP TABLE returning_probe (id TEXT PRIMARY KEY)")
            .await
            .unwrap();
        let stmt = Statement::new(
            "INSERT INTO returning_probe (id) VALUES (?) ON CONFLICT DO NOTHING",
        )
        .bind("r1")
        .returning("id");
        let first = tx.run(&stmt).await.unwrap();
        let second = tx.run(&stmt).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(first.returned_id.as_deref(), Some("r1"));
        assert_eq!(second, RunResult::default());
    }
}
