//! One-time migration from the embedded database file into a freshly
//! selected PostgreSQL backend.
//!
//! Runs inside one target transaction. Each row is inserted under its own
//! savepoint with `ON CONFLICT DO NOTHING`, so a bad row is logged and
//! skipped without poisoning the transaction, and a repeated run skips rows
//! that already made it. On success the source file is renamed with a
//! `.migrated` suffix; on failure nothing changes on either side.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use goutdiary_core::sql::schema::{self, ColumnDef, ColumnType, TableDef};
use goutdiary_core::sql::{insert_sql, OnConflict, Row, SqlValue, Statement};
use goutdiary_core::storage::RepositoryError;

use super::backend::{count_rows, Backend, Executor, Transaction};
use super::sqlite::SqliteBackend;

const ARCHIVE_SUFFIX: &str = ".migrated";
const ROW_SAVEPOINT: &str = "migrate_row";

/// Errors that abort the whole migration.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Cannot open source database {path}: {source}")]
    OpenSource {
        path: PathBuf,
        source: RepositoryError,
    },
    #[error("Source database has no {0} table")]
    MissingTable(&'static str),
    #[error("Migration failed: {0}")]
    Repository(#[from] RepositoryError),
    #[error("Cannot archive {path}: {source}")]
    Archive {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Row counts for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: &'static str,
    /// Rows read from the source.
    pub read: usize,
    pub copied: usize,
    /// Rows already present on the target.
    pub existing: usize,
    /// Rows whose parent did not make it across.
    pub orphaned: usize,
    /// Rows that failed to convert or insert.
    pub failed: usize,
}

impl TableReport {
    fn new(table: &'static str, read: usize) -> Self {
        Self {
            table,
            read,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub tables: Vec<TableReport>,
    /// Optional tables the source did not have.
    pub missing_tables: Vec<&'static str>,
    /// Where the source file was moved.
    pub archived_to: Option<PathBuf>,
}

impl MigrationReport {
    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|t| t.table == name)
    }

    pub fn copied(&self, name: &str) -> usize {
        self.table(name).map(|t| t.copied).unwrap_or(0)
    }

    pub fn orphaned_components(&self) -> usize {
        self.table(schema::MEAL_COMPONENTS)
            .map(|t| t.orphaned)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No source file at the configured path.
    NoSource,
    /// The target already has users; migrating again would duplicate data.
    TargetNotEmpty,
    Completed(MigrationReport),
}

/// Copies the embedded database at `source_path` into `target` when the
/// target holds no users yet.
pub async fn migrate_if_needed(
    source_path: &Path,
    target: &dyn Backend,
) -> Result<MigrationOutcome, MigrationError> {
    if !source_path.exists() {
        info!(path = %source_path.display(), "No SQLite database found, skipping migration");
        return Ok(MigrationOutcome::NoSource);
    }

    let users = count_rows(target, schema::USERS).await?;
    if users > 0 {
        info!(users, "Target already contains data, skipping migration");
        return Ok(MigrationOutcome::TargetNotEmpty);
    }

    let source = SqliteBackend::open_read_only(source_path)
        .await
        .map_err(|source| MigrationError::OpenSource {
            path: source_path.to_path_buf(),
            source,
        })?;

    info!(
        source = %source.describe(),
        target = %target.describe(),
        "Starting migration"
    );

    let outcome = match target.begin().await {
        Ok(tx) => {
            let copied = copy_all(&source, &*tx).await;
            match copied {
                Ok(report) => tx
                    .commit()
                    .await
                    .map(|()| report)
                    .map_err(MigrationError::from),
                Err(err) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!(error = %rollback_err, "Rollback failed");
                    }
                    Err(err)
                }
            }
        }
        Err(err) => Err(err.into()),
    };
    source.close().await;

    let mut report = outcome?;
    let archived = archive(source_path)?;
    info!(archived_to = %archived.display(), "Migration completed");
    report.archived_to = Some(archived);

    Ok(MigrationOutcome::Completed(report))
}

/// Tables in copy order, with whether the source may lack them.
fn plan() -> Vec<(TableDef, bool)> {
    vec![
        (schema::users_table(), false),
        (schema::readings_table(), false),
        (schema::meals_table(), false),
        (schema::meal_components_table(), false),
        (schema::food_items_table(), false),
        (schema::analysis_results_table(), true),
        (schema::api_keys_table(), true),
    ]
}

async fn copy_all(
    source: &SqliteBackend,
    tx: &dyn Transaction,
) -> Result<MigrationReport, MigrationError> {
    let mut report = MigrationReport::default();
    let mut meal_ids = HashMap::new();

    for (table, optional) in plan() {
        if !source.table_exists(table.name).await? {
            if optional {
                warn!(table = table.name, "Source table missing, skipping");
                report.missing_tables.push(table.name);
                continue;
            }
            return Err(MigrationError::MissingTable(table.name));
        }

        let rows = source
            .all(&Statement::new(format!("SELECT * FROM {}", table.name)))
            .await?;
        info!(table = table.name, rows = rows.len(), "Migrating table");

        let mut tally = TableReport::new(table.name, rows.len());
        for row in &rows {
            copy_row(tx, &table, row, &mut meal_ids, &mut tally).await?;
        }

        if tally.orphaned > 0 || tally.failed > 0 {
            warn!(
                table = table.name,
                orphaned = tally.orphaned,
                failed = tally.failed,
                "Some rows were not migrated"
            );
        }
        report.tables.push(tally);
    }

    Ok(report)
}

/// Copies one row. Only savepoint failures are returned as errors.
async fn copy_row(
    tx: &dyn Transaction,
    table: &TableDef,
    row: &Row,
    meal_ids: &mut HashMap<String, String>,
    tally: &mut TableReport,
) -> Result<(), MigrationError> {
    let source_id = row.opt_text("id").ok().flatten().unwrap_or_default();

    let statement = match build_insert(table, row, meal_ids) {
        Ok(Some(statement)) => statement,
        Ok(None) => {
            warn!(table = table.name, id = %source_id, "Parent row missing, skipping");
            tally.orphaned += 1;
            return Ok(());
        }
        Err(err) => {
            warn!(table = table.name, id = %source_id, error = %err, "Row cannot be converted, skipping");
            tally.failed += 1;
            return Ok(());
        }
    };

    tx.savepoint(ROW_SAVEPOINT).await?;
    match tx.run(&statement).await {
        Ok(result) => {
            tx.release_savepoint(ROW_SAVEPOINT).await?;
            if result.rows_affected == 0 {
                tally.existing += 1;
            } else {
                tally.copied += 1;
            }
            if table.name == schema::MEALS {
                let target_id = result.returned_id.unwrap_or_else(|| source_id.clone());
                meal_ids.insert(source_id, target_id);
            }
        }
        Err(err) => {
            tx.rollback_to_savepoint(ROW_SAVEPOINT).await?;
            tx.release_savepoint(ROW_SAVEPOINT).await?;
            warn!(table = table.name, id = %source_id, error = %err, "Row failed, skipping");
            tally.failed += 1;
        }
    }

    Ok(())
}

/// The target insert for a source row, or `None` for an orphaned component.
fn build_insert(
    table: &TableDef,
    row: &Row,
    meal_ids: &HashMap<String, String>,
) -> Result<Option<Statement>, RepositoryError> {
    let mut columns = Vec::new();
    let mut values = Vec::new();

    for column in &table.columns {
        let Some(mut value) = convert(row, column)? else {
            continue;
        };

        if table.name == schema::MEAL_COMPONENTS && column.name == "meal_id" {
            let source_meal = row.text("meal_id")?;
            match meal_ids.get(&source_meal) {
                Some(target_meal) => value = SqlValue::Text(target_meal.clone()),
                None => return Ok(None),
            }
        }
        if table.name == schema::USERS && column.name == "guid" && value.is_null() {
            value = SqlValue::Text(Uuid::new_v4().to_string());
        }

        columns.push(column.name);
        values.push(value);
    }

    if table.name == schema::USERS && !columns.contains(&"guid") {
        columns.push("guid");
        values.push(SqlValue::Text(Uuid::new_v4().to_string()));
    }

    let mut statement =
        Statement::new(insert_sql(table.name, &columns, OnConflict::DoNothing)).bind_all(values);
    if table.name == schema::MEALS {
        statement = statement.returning("id");
    }
    Ok(Some(statement))
}

/// Converts a source value to the target column's type.
///
/// `None` leaves the column out so the target default applies.
fn convert(row: &Row, column: &ColumnDef) -> Result<Option<SqlValue>, RepositoryError> {
    let Some(raw) = row.get(column.name) else {
        return Ok(None);
    };

    let blank = matches!(raw, SqlValue::Text(s) if s.trim().is_empty())
        && column.ty != ColumnType::Text;
    if raw.is_null() || blank {
        return Ok(match column.default {
            Some(_) => None,
            None => Some(SqlValue::Null(column.ty.value_kind())),
        });
    }

    let name = column.name;
    Ok(Some(match column.ty {
        ColumnType::Text => row.opt_text(name)?.into(),
        ColumnType::Integer => row.opt_int(name)?.into(),
        ColumnType::Real => row.opt_real(name)?.into(),
        ColumnType::Boolean => row.flag(name)?.into(),
        ColumnType::Timestamp => row.opt_timestamp(name)?.into(),
    }))
}

/// Renames the source file (and any WAL sidecars) with the archive suffix.
fn archive(path: &Path) -> Result<PathBuf, MigrationError> {
    let archived = with_suffix(path, ARCHIVE_SUFFIX);
    std::fs::rename(path, &archived).map_err(|source| MigrationError::Archive {
        path: path.to_path_buf(),
        source,
    })?;

    for sidecar in ["-wal", "-shm"] {
        let from = with_suffix(path, sidecar);
        if from.exists() {
            let to = with_suffix(&archived, sidecar);
            if let Err(err) = std::fs::rename(&from, &to) {
                warn!(path = %from.display(), error = %err, "Could not archive sidecar file");
            }
        }
    }

    Ok(archived)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::ensure_schema;
    use goutdiary_core::sql::Dialect;

    async fn source_with_data(path: &Path) {
        let source = SqliteBackend::open(path).await.unwrap();
        ensure_schema(&source).await.unwrap();
        source
            .exec(
                "INSERT INTO users (id, guid, username, password_hash, is_admin)
                     VALUES ('u1', 'g1', 'alice', 'hash', 1);
                 INSERT INTO uric_acid_values (id, user_id, timestamp, value, gout_attack)
                     VALUES ('r1', 'u1', '2024-01-01 08:00:00', 5.5, 1);
                 INSERT INTO meals (id, user_id, timestamp, meal_type, total_purin, total_uric_acid, total_calories, total_protein)
                     VALUES ('m1', 'u1', '2024-01-01T12:00:00.000Z', 'LUNCH', 120, 300, 650, 31.5);
                 INSERT INTO meal_components (id, meal_id, food_item_name, estimated_weight, purin, uric_acid, calories, protein)
                     VALUES ('c1', 'm1', 'Lentils', 200, 120, 300, 650, 31.5);
                 INSERT INTO food_items (id, user_id, name, purin_per_100g, uric_acid_per_100g, calories_per_100g, protein_percentage, category)
                     VALUES ('f1', 'u1', 'Lentils', 60, 150, 325, 15.75, 'legumes');
                 INSERT INTO analysis_results (id, user_id, analysis_date, data_period_start, data_period_end, insights, confidence_score)
                     VALUES ('a1', 'u1', '2024-02-01', '2024-01-01', '2024-01-31', '[]', 0.8);
                 INSERT INTO api_keys (id, key_hash, name, can_read_own_uric_acid, created_by, is_active)
                     VALUES ('k1', 'abc123', 'watch', 1, 'u1', 1);
                 PRAGMA foreign_keys = OFF;
                 INSERT INTO meal_components (id, meal_id, food_item_name, estimated_weight, purin, uric_acid, calories, protein)
                     VALUES ('c2', 'ghost', 'Sardines', 100, 345, 800, 210, 24.0);
                 PRAGMA foreign_keys = ON;",
            )
            .await
            .unwrap();
        source.close().await;
    }

    async fn empty_target() -> SqliteBackend {
        let target = SqliteBackend::open_in_memory().await.unwrap();
        ensure_schema(&target).await.unwrap();
        target
    }

    #[tokio::test]
    async fn test_migrates_every_table_and_archives_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harnsaeure.db");
        source_with_data(&path).await;
        let target = empty_target().await;

        let outcome = migrate_if_needed(&path, &target).await.unwrap();

        let MigrationOutcome::Completed(report) = outcome else {
            panic!("expected a completed migration, got {outcome:?}");
        };
        assert_eq!(report.copied(schema::USERS), 1);
        assert_eq!(report.copied(schema::READINGS), 1);
        assert_eq!(report.copied(schema::MEALS), 1);
        assert_eq!(report.copied(schema::MEAL_COMPONENTS), 1);
        assert_eq!(report.orphaned_components(), 1);
        assert_eq!(report.copied(schema::FOOD_ITEMS), 1);
        assert_eq!(report.copied(schema::ANALYSIS_RESULTS), 1);
        assert_eq!(report.copied(schema::API_KEYS), 1);
        assert!(report.missing_tables.is_empty());

        assert!(!path.exists());
        assert_eq!(report.archived_to, Some(dir.path().join("harnsaeure.db.migrated")));
        assert!(dir.path().join("harnsaeure.db.migrated").exists());

        let reading = target
            .get(&Statement::new("SELECT * FROM uric_acid_values WHERE id = ?").bind("r1"))
            .await
            .unwrap()
            .unwrap();
        assert!(reading.flag("gout_attack").unwrap());
        assert!(!reading.flag("normal").unwrap());
        assert_eq!(
            reading.timestamp("timestamp").unwrap().to_rfc3339(),
            "2024-01-01T08:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_target_with_users_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harnsaeure.db");
        source_with_data(&path).await;
        let target = empty_target().await;
        target
            .exec("INSERT INTO users (id, guid) VALUES ('existing', 'g-existing')")
            .await
            .unwrap();

        let outcome = migrate_if_needed(&path, &target).await.unwrap();

        assert_eq!(outcome, MigrationOutcome::TargetNotEmpty);
        assert!(path.exists());
        assert_eq!(count_rows(&target, schema::READINGS).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = empty_target().await;

        let outcome = migrate_if_needed(&dir.path().join("absent.db"), &target)
            .await
            .unwrap();

        assert_eq!(outcome, MigrationOutcome::NoSource);
    }

    #[tokio::test]
    async fn test_optional_tables_may_be_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.db");
        let source = SqliteBackend::open(&path).await.unwrap();
        for (table, optional) in plan() {
            if !optional {
                source.exec(&table.create_sql(Dialect::Sqlite)).await.unwrap();
            }
        }
        source
            .exec("INSERT INTO users (id, guid) VALUES ('u1', 'g1')")
            .await
            .unwrap();
        source.close().await;
        let target = empty_target().await;

        let outcome = migrate_if_needed(&path, &target).await.unwrap();

        let MigrationOutcome::Completed(report) = outcome else {
            panic!("expected a completed migration, got {outcome:?}");
        };
        assert_eq!(
            report.missing_tables,
            vec![schema::ANALYSIS_RESULTS, schema::API_KEYS]
        );
        assert_eq!(report.copied(schema::USERS), 1);
    }

    #[tokio::test]
    async fn test_engine_failure_rolls_back_and_keeps_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.db");
        let source = SqliteBackend::open(&path).await.unwrap();
        source
            .exec(&schema::users_table().create_sql(Dialect::Sqlite))
            .await
            .unwrap();
        source
            .exec("INSERT INTO users (id, guid) VALUES ('u1', 'g1')")
            .await
            .unwrap();
        source.close().await;
        let target = empty_target().await;

        let result = migrate_if_needed(&path, &target).await;

        assert!(matches!(
            result,
            Err(MigrationError::MissingTable(schema::READINGS))
        ));
        assert!(path.exists());
        assert_eq!(count_rows(&target, schema::USERS).await.unwrap(), 0);
    }

    #[test]
    fn test_legacy_user_row_gets_a_guid() {
        let row = Row::new()
            .with("id", "u1")
            .with("email", "a@example.com")
            .with("created_at", None::<String>);

        let statement = build_insert(&schema::users_table(), &row, &HashMap::new())
            .unwrap()
            .unwrap();

        assert_eq!(
            statement.sql(),
            "INSERT INTO users (id, email, guid) VALUES (?, ?, ?) ON CONFLICT DO NOTHING"
        );
        assert!(matches!(&statement.params()[2], SqlValue::Text(g) if g.len() == 36));
    }

    #[test]
    fn test_boolean_and_timestamp_conversion() {
        let row = Row::new()
            .with("id", "k1")
            .with("key_hash", "h")
            .with("name", "watch")
            .with("can_read_own_meals", "true")
            .with("is_active", None::<i64>)
            .with("last_used_at", "2024-03-01 10:00:00");

        let statement = build_insert(&schema::api_keys_table(), &row, &HashMap::new())
            .unwrap()
            .unwrap();

        assert_eq!(
            statement.sql(),
            "INSERT INTO api_keys (id, key_hash, name, can_read_own_meals, last_used_at) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT DO NOTHING"
        );
        assert_eq!(statement.params()[3], SqlValue::Bool(true));
        assert!(matches!(statement.params()[4], SqlValue::Timestamp(_)));
    }
}
