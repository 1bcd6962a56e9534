//! SQL dialect strategy.
//!
//! Statements are written once in a logical form: `?` positional placeholders,
//! generic column types and booleans carried as typed values. A [`Dialect`]
//! renders that form for one backend. Pure functions, no I/O.

use std::fmt;

use super::schema::ColumnType;

/// `strftime` format producing the text form timestamps are stored in on
/// SQLite, matching [`format_timestamp`](super::format_timestamp).
pub const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%fZ";

/// `GLOB` pattern matching timestamps already in the stored text form.
const STORED_TIMESTAMP_GLOB: &str =
    "[0-9][0-9][0-9][0-9]-[0-9][0-9]-[0-9][0-9]T[0-9][0-9]:[0-9][0-9]:[0-9][0-9].[0-9][0-9][0-9]Z";

/// The SQL dialect spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Embedded single-file engine.
    Sqlite,
    /// Client/server engine.
    Postgres,
}

impl Dialect {
    /// Short lowercase name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
        }
    }

    /// Rewrites `?` placeholders into the backend's positional form.
    ///
    /// SQLite keeps `?`. PostgreSQL uses `$1, $2, ...`. Question marks inside
    /// single-quoted literals or double-quoted identifiers are left alone.
    pub fn translate_placeholders(&self, sql: &str) -> String {
        match self {
            Dialect::Sqlite => sql.to_string(),
            Dialect::Postgres => {
                let mut out = String::with_capacity(sql.len() + 8);
                let mut index = 0;
                scan_placeholders(sql, |segment| match segment {
                    Segment::Text(text) => out.push_str(text),
                    Segment::Placeholder => {
                        index += 1;
                        out.push('$');
                        out.push_str(&index.to_string());
                    }
                });
                out
            }
        }
    }

    /// Renders a generic column type.
    pub fn column_type(&self, ty: ColumnType) -> &'static str {
        match (self, ty) {
            (_, ColumnType::Text) => "TEXT",
            (_, ColumnType::Integer) => "INTEGER",
            (Dialect::Sqlite, ColumnType::Real) => "REAL",
            (Dialect::Postgres, ColumnType::Real) => "DOUBLE PRECISION",
            (Dialect::Sqlite, ColumnType::Boolean) => "INTEGER",
            (Dialect::Postgres, ColumnType::Boolean) => "BOOLEAN",
            (Dialect::Sqlite, ColumnType::Timestamp) => "DATETIME",
            (Dialect::Postgres, ColumnType::Timestamp) => "TIMESTAMPTZ",
        }
    }

    /// Boolean literal for DDL defaults and inline predicates.
    pub fn bool_literal(&self, value: bool) -> &'static str {
        match (self, value) {
            (Dialect::Sqlite, true) => "1",
            (Dialect::Sqlite, false) => "0",
            (Dialect::Postgres, true) => "TRUE",
            (Dialect::Postgres, false) => "FALSE",
        }
    }

    /// Whether inserts need a `RETURNING` clause to hand back generated keys.
    ///
    /// SQLite reports the last inserted rowid through the driver instead.
    pub fn requires_returning(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }

    /// Appends `RETURNING <column>` to an insert when the dialect needs it.
    pub fn with_returning(&self, sql: &str, column: &str) -> String {
        let trimmed = sql.trim_end().trim_end_matches(';');
        if self.requires_returning()
            && is_insert(trimmed)
            && !trimmed.to_ascii_uppercase().contains(" RETURNING ")
        {
            format!("{trimmed} RETURNING {column}")
        } else {
            trimmed.to_string()
        }
    }

    /// Default expression for "now" in a timestamp column.
    ///
    /// SQLite keeps timestamps as text, so its default writes the same fixed
    /// width form the application binds.
    pub fn current_timestamp(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "(strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            Dialect::Postgres => "CURRENT_TIMESTAMP",
        }
    }

    /// Rewrites timestamp text in `table.column` that is not in the stored
    /// form (`2024-05-01 10:00:00`, offsets, missing milliseconds). Text
    /// comparison and ordering on SQLite are only chronological once every
    /// row has the same shape. `None` where timestamps are native values.
    pub fn normalize_timestamps_sql(&self, table: &str, column: &str) -> Option<String> {
        match self {
            Dialect::Sqlite => Some(format!(
                "UPDATE {table} SET {column} = strftime('{SQLITE_TIMESTAMP_FORMAT}', {column}) \
                 WHERE typeof({column}) = 'text' \
                 AND {column} NOT GLOB '{STORED_TIMESTAMP_GLOB}' \
                 AND strftime('{SQLITE_TIMESTAMP_FORMAT}', {column}) IS NOT NULL"
            )),
            Dialect::Postgres => None,
        }
    }

    /// Value to use in `LIMIT` when only an `OFFSET` is wanted.
    pub fn unbounded_limit(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "-1",
            Dialect::Postgres => "ALL",
        }
    }

    /// Drops a table, ignoring dependents where the backend needs to be told.
    pub fn drop_table(&self, table: &str) -> String {
        match self {
            Dialect::Sqlite => format!("DROP TABLE IF EXISTS {table}"),
            Dialect::Postgres => format!("DROP TABLE IF EXISTS {table} CASCADE"),
        }
    }

    /// Statement toggling foreign-key enforcement, if the backend has one.
    pub fn foreign_keys_pragma(&self, enabled: bool) -> Option<&'static str> {
        match (self, enabled) {
            (Dialect::Sqlite, true) => Some("PRAGMA foreign_keys = ON"),
            (Dialect::Sqlite, false) => Some("PRAGMA foreign_keys = OFF"),
            (Dialect::Postgres, _) => None,
        }
    }

    /// Whether `ALTER TABLE ... ADD COLUMN` accepts constraints and
    /// non-constant defaults.
    pub fn supports_rich_add_column(&self) -> bool {
        matches!(self, Dialect::Postgres)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Counts the `?` placeholders outside quoted sections.
pub fn placeholder_count(sql: &str) -> usize {
    let mut count = 0;
    scan_placeholders(sql, |segment| {
        if matches!(segment, Segment::Placeholder) {
            count += 1;
        }
    });
    count
}

fn is_insert(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("insert"))
}

enum Segment<'a> {
    Text(&'a str),
    Placeholder,
}

fn scan_placeholders<'a>(sql: &'a str, mut visit: impl FnMut(Segment<'a>)) {
    let mut in_single = false;
    let mut in_double = false;
    let mut start = 0;

    for (i, c) in sql.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '?' if !in_single && !in_double => {
                visit(Segment::Text(&sql[start..i]));
                visit(Segment::Placeholder);
                start = i + 1;
            }
            _ => {}
        }
    }
    visit(Segment::Text(&sql[start..]));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_keeps_question_marks() {
        let sql = "SELECT * FROM users WHERE id = ? AND guid = ?";
        assert_eq!(Dialect::Sqlite.translate_placeholders(sql), sql);
    }

    #[test]
    fn test_postgres_numbers_placeholders() {
        let sql = "UPDATE meals SET name = ?, total_purin = ? WHERE id = ?";
        assert_eq!(
            Dialect::Postgres.translate_placeholders(sql),
            "UPDATE meals SET name = $1, total_purin = $2 WHERE id = $3"
        );
    }

    #[test]
    fn test_postgres_skips_quoted_question_marks() {
        let sql = "SELECT '?' AS q, \"what?\" FROM t WHERE a = ? AND b = 'it''s ?'";
        assert_eq!(
            Dialect::Postgres.translate_placeholders(sql),
            "SELECT '?' AS q, \"what?\" FROM t WHERE a = $1 AND b = 'it''s ?'"
        );
    }

    #[test]
    fn test_placeholder_count() {
        assert_eq!(placeholder_count("INSERT INTO t VALUES (?, ?, '?')"), 2);
        assert_eq!(placeholder_count("SELECT 1"), 0);
    }

    #[test]
    fn test_column_types() {
        assert_eq!(Dialect::Sqlite.column_type(ColumnType::Boolean), "INTEGER");
        assert_eq!(Dialect::Postgres.column_type(ColumnType::Boolean), "BOOLEAN");
        assert_eq!(Dialect::Sqlite.column_type(ColumnType::Timestamp), "DATETIME");
        assert_eq!(
            Dialect::Postgres.column_type(ColumnType::Timestamp),
            "TIMESTAMPTZ"
        );
        assert_eq!(
            Dialect::Postgres.column_type(ColumnType::Real),
            "DOUBLE PRECISION"
        );
    }

    #[test]
    fn test_bool_literals() {
        assert_eq!(Dialect::Sqlite.bool_literal(true), "1");
        assert_eq!(Dialect::Postgres.bool_literal(false), "FALSE");
    }

    #[test]
    fn test_returning_only_on_postgres_inserts() {
        let insert = "INSERT INTO meals (id) VALUES (?) ON CONFLICT DO NOTHING";
        assert_eq!(
            Dialect::Postgres.with_returning(insert, "id"),
            "INSERT INTO meals (id) VALUES (?) ON CONFLICT DO NOTHING RETURNING id"
        );
        assert_eq!(Dialect::Sqlite.with_returning(insert, "id"), insert);

        let update = "UPDATE meals SET name = ? WHERE id = ?";
        assert_eq!(Dialect::Postgres.with_returning(update, "id"), update);
    }

    #[test]
    fn test_returning_not_duplicated() {
        let insert = "INSERT INTO meals (id) VALUES (?) RETURNING id";
        assert_eq!(Dialect::Postgres.with_returning(insert, "id"), insert);
    }

    #[test]
    fn test_unbounded_limit_and_drop() {
        assert_eq!(Dialect::Sqlite.unbounded_limit(), "-1");
        assert_eq!(Dialect::Postgres.unbounded_limit(), "ALL");
        assert_eq!(
            Dialect::Postgres.drop_table("users"),
            "DROP TABLE IF EXISTS users CASCADE"
        );
        assert_eq!(Dialect::Sqlite.foreign_keys_pragma(true), Some("PRAGMA foreign_keys = ON"));
        assert_eq!(Dialect::Postgres.foreign_keys_pragma(false), None);
    }

    #[test]
    fn test_timestamp_normalization_only_on_sqlite() {
        let sql = Dialect::Sqlite
            .normalize_timestamps_sql("meals", "timestamp")
            .unwrap();

        assert!(sql.starts_with(
            "UPDATE meals SET timestamp = strftime('%Y-%m-%dT%H:%M:%fZ', timestamp)"
        ));
        assert!(sql.contains("typeof(timestamp) = 'text'"));
        assert!(sql.contains("NOT GLOB '[0-9][0-9][0-9][0-9]-"));
        assert_eq!(Dialect::Postgres.normalize_timestamps_sql("meals", "timestamp"), None);
        assert_eq!(Dialect::Postgres.current_timestamp(), "CURRENT_TIMESTAMP");
    }
}
