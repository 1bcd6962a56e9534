//! Schema manager.
//!
//! Brings any reachable database to the target schema without losing rows:
//! missing tables are created, missing columns are added, a legacy `users`
//! table is rebuilt with a correlation identifier, timestamp text on SQLite
//! is brought to one shape, and indexes are created best-effort. Only
//! failing to create a table is fatal.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use goutdiary_core::sql::schema::{
    self, needs_legacy_user_rebuild, ColumnDef, ColumnType, IndexDef, TableDef,
};
use goutdiary_core::sql::{insert_sql, Dialect, OnConflict, Row, SqlValue, Statement, ValueKind};
use goutdiary_core::storage::Result;

use super::backend::{finish, Backend, Executor, Transaction};

/// What [`ensure_schema`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    pub created_tables: Vec<&'static str>,
    /// `table.column` for every column added to an existing table.
    pub added_columns: Vec<String>,
    /// Rows carried over when a legacy `users` table was rebuilt.
    pub rebuilt_users: Option<u64>,
    /// Timestamp values rewritten into the stored text form.
    pub normalized_timestamps: u64,
    /// Evolution steps that failed and were skipped.
    pub skipped: Vec<String>,
}

impl SchemaReport {
    pub fn is_unchanged(&self) -> bool {
        self.created_tables.is_empty()
            && self.added_columns.is_empty()
            && self.rebuilt_users.is_none()
            && self.normalized_timestamps == 0
            && self.skipped.is_empty()
    }
}

/// Brings `backend` to the target schema. Safe to run on every start.
pub async fn ensure_schema(backend: &dyn Backend) -> Result<SchemaReport> {
    let dialect = backend.dialect();
    let mut report = SchemaReport::default();

    for table in schema::tables() {
        let live = backend.table_columns(table.name).await?;

        if table.name == schema::USERS && needs_legacy_user_rebuild(&live) {
            match rebuild_legacy_users(backend, &table, &live).await {
                Ok(rows) => {
                    info!(rows, "Rebuilt legacy users table");
                    report.rebuilt_users = Some(rows);
                    continue;
                }
                Err(err) => {
                    warn!(error = %err, "Legacy users rebuild failed, keeping old table");
                    report.skipped.push(format!("rebuild {}", table.name));
                }
            }
        }

        if live.is_empty() {
            backend.exec(&table.create_sql(dialect)).await?;
            debug!(table = table.name, "Created table");
            report.created_tables.push(table.name);
            continue;
        }

        for column in table.missing_columns(&live) {
            let label = format!("{}.{}", table.name, column.name);
            match backend.exec(&column.add_column_sql(table.name, dialect)).await {
                Ok(()) => {
                    info!(column = %label, "Added column");
                    report.added_columns.push(label);
                }
                Err(err) => {
                    warn!(column = %label, error = %err, "Could not add column, skipping");
                    report.skipped.push(format!("add {label}"));
                }
            }
        }
    }

    for table in schema::tables() {
        match normalize_timestamps(backend, &table).await {
            Ok(0) => {}
            Ok(rows) => {
                info!(table = table.name, rows, "Normalized legacy timestamps");
                report.normalized_timestamps += rows;
            }
            Err(err) => {
                warn!(table = table.name, error = %err, "Could not normalize timestamps, skipping");
                report.skipped.push(format!("normalize {}", table.name));
            }
        }
    }

    for index in schema::indexes() {
        if let Err(step) = create_index(backend, &index).await {
            report.skipped.push(step);
        }
    }

    Ok(report)
}

/// Rewrites every timestamp column of `table` that the dialect stores as
/// text. Values the engine cannot parse are left as they are.
async fn normalize_timestamps(backend: &dyn Backend, table: &TableDef) -> Result<u64> {
    let live = backend.table_columns(table.name).await?;
    let mut rewritten = 0;

    for column in table.columns.iter().filter(|c| c.ty == ColumnType::Timestamp) {
        if !live.iter().any(|l| l.eq_ignore_ascii_case(column.name)) {
            continue;
        }
        let Some(sql) = backend.dialect().normalize_timestamps_sql(table.name, column.name) else {
            return Ok(0);
        };
        rewritten += backend.run(&Statement::new(sql)).await?.rows_affected;
    }

    Ok(rewritten)
}

async fn create_index(backend: &dyn Backend, index: &IndexDef) -> std::result::Result<(), String> {
    let err = match backend.exec(&index.create_sql()).await {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };

    if let Some(plain) = index.without_predicate() {
        match backend.exec(&plain.create_sql()).await {
            Ok(()) => {
                warn!(
                    index = index.name,
                    error = %err,
                    "Partial index rejected, created without predicate"
                );
                return Ok(());
            }
            Err(retry_err) => {
                warn!(index = index.name, error = %retry_err, "Could not create index, skipping");
                return Err(format!("index {}", index.name));
            }
        }
    }

    warn!(index = index.name, error = %err, "Could not create index, skipping");
    Err(format!("index {}", index.name))
}

async fn rebuild_legacy_users(
    backend: &dyn Backend,
    table: &TableDef,
    live: &[String],
) -> Result<u64> {
    match backend.dialect() {
        Dialect::Sqlite => rebuild_by_copy(backend, table, live).await,
        Dialect::Postgres => backfill_in_place(backend, table, live).await,
    }
}

/// Drops and recreates the table, carrying every shared column over.
///
/// Foreign keys are off meanwhile so the drop does not cascade into the
/// rows that reference users.
async fn rebuild_by_copy(backend: &dyn Backend, table: &TableDef, live: &[String]) -> Result<u64> {
    let dialect = backend.dialect();
    let rows = backend
        .all(&Statement::new(format!("SELECT * FROM {}", table.name)))
        .await?;
    let shared: Vec<&ColumnDef> = table
        .columns
        .iter()
        .filter(|c| live.iter().any(|l| l.eq_ignore_ascii_case(c.name)))
        .collect();

    if let Some(pragma) = dialect.foreign_keys_pragma(false) {
        backend.exec(pragma).await?;
    }

    let result = match backend.begin().await {
        Ok(tx) => {
            let copied = copy_users(&*tx, table, &shared, &rows).await;
            finish(tx, copied).await
        }
        Err(err) => Err(err),
    };

    if let Some(pragma) = dialect.foreign_keys_pragma(true) {
        if let Err(err) = backend.exec(pragma).await {
            warn!(error = %err, "Could not re-enable foreign keys");
        }
    }

    result
}

async fn copy_users(
    tx: &dyn Transaction,
    table: &TableDef,
    shared: &[&ColumnDef],
    rows: &[Row],
) -> Result<u64> {
    let dialect = tx.dialect();
    tx.exec(&dialect.drop_table(table.name)).await?;
    tx.exec(&table.create_sql(dialect)).await?;

    let mut columns: Vec<&str> = shared.iter().map(|c| c.name).collect();
    for required in ["guid", "created_at"] {
        if !columns.contains(&required) {
            columns.push(required);
        }
    }
    let sql = insert_sql(table.name, &columns, OnConflict::Fail);

    let mut copied = 0;
    for row in rows {
        let values = columns.iter().map(|column| match (*column, row.get(column)) {
            ("guid", None | Some(SqlValue::Null(_))) => SqlValue::Text(Uuid::new_v4().to_string()),
            ("created_at", None | Some(SqlValue::Null(_))) => SqlValue::Timestamp(Utc::now()),
            (_, Some(value)) => value.clone(),
            (_, None) => SqlValue::Null(ValueKind::Text),
        });
        tx.run(&Statement::new(sql.as_str()).bind_all(values)).await?;
        copied += 1;
    }
    Ok(copied)
}

/// Adds the missing columns and fills in a guid for every row.
///
/// Dropping the table would take the child tables' foreign keys with it.
async fn backfill_in_place(
    backend: &dyn Backend,
    table: &TableDef,
    live: &[String],
) -> Result<u64> {
    let tx = backend.begin().await?;
    let result = backfill_guids(&*tx, table, live).await;
    finish(tx, result).await
}

async fn backfill_guids(tx: &dyn Transaction, table: &TableDef, live: &[String]) -> Result<u64> {
    let dialect = tx.dialect();
    for column in table.missing_columns(live) {
        tx.exec(&column.add_column_sql(table.name, dialect)).await?;
    }

    let rows = tx
        .all(&Statement::new(format!(
            "SELECT id FROM {} WHERE guid IS NULL",
            table.name
        )))
        .await?;
    for row in &rows {
        tx.run(
            &Statement::new(format!("UPDATE {} SET guid = ? WHERE id = ?", table.name))
                .bind(Uuid::new_v4().to_string())
                .bind(row.text("id")?),
        )
        .await?;
    }

    tx.exec(&format!(
        "ALTER TABLE {} ALTER COLUMN guid SET NOT NULL",
        table.name
    ))
    .await?;
    tx.exec(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {0}_guid_key ON {0}(guid)",
        table.name
    ))
    .await?;

    Ok(rows.len() as u64)
}
