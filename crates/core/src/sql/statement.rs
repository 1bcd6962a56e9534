//! Logical statements: SQL text in `?` form plus typed parameters.

use super::dialect::Dialect;
use super::value::SqlValue;

/// A statement in logical form, rendered per backend by [`Dialect`].
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<SqlValue>,
    returning: Option<String>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            returning: None,
        }
    }

    /// Binds the next positional parameter.
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Binds several parameters in order.
    pub fn bind_all(mut self, values: impl IntoIterator<Item = SqlValue>) -> Self {
        self.params.extend(values);
        self
    }

    /// Asks the backend to report this column of the inserted row.
    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.returning = Some(column.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn returning_column(&self) -> Option<&str> {
        self.returning.as_deref()
    }

    /// SQL text ready to send to a backend speaking `dialect`.
    pub fn render(&self, dialect: Dialect) -> String {
        let sql = match &self.returning {
            Some(column) => dialect.with_returning(&self.sql, column),
            None => self.sql.clone(),
        };
        dialect.translate_placeholders(&sql)
    }
}

impl From<&str> for Statement {
    fn from(sql: &str) -> Self {
        Statement::new(sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

/// What an insert does when it hits a uniqueness conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Surface the constraint violation.
    Fail,
    /// Skip the row silently.
    DoNothing,
    /// Skip the row only when it collides on these columns; any other
    /// uniqueness violation still fails.
    DoNothingOn(&'static [&'static str]),
}

/// Builds `INSERT INTO table (a, b) VALUES (?, ?)`.
pub fn insert_sql(table: &str, columns: &[&str], on_conflict: OnConflict) -> String {
    let placeholders = vec!["?"; columns.len()].join(", ");
    let mut sql = format!(
        "INSERT INTO {table} ({}) VALUES ({placeholders})",
        columns.join(", ")
    );
    match on_conflict {
        OnConflict::Fail => {}
        OnConflict::DoNothing => sql.push_str(" ON CONFLICT DO NOTHING"),
        OnConflict::DoNothingOn(target) => {
            sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", target.join(", ")));
        }
    }
    sql
}

/// Builds `UPDATE table SET a = ?, b = ? WHERE key = ?`.
pub fn update_sql(table: &str, columns: &[&str], key: &str) -> String {
    let assignments = columns
        .iter()
        .map(|c| format!("{c} = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("UPDATE {table} SET {assignments} WHERE {key} = ?")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::value::ValueKind;

    #[test]
    fn test_render_postgres_with_returning() {
        let stmt = Statement::new(insert_sql("meals", &["id", "name"], OnConflict::DoNothing))
            .bind("m1")
            .bind(None::<String>)
            .returning("id");

        assert_eq!(
            stmt.render(Dialect::Postgres),
            "INSERT INTO meals (id, name) VALUES ($1, $2) ON CONFLICT DO NOTHING RETURNING id"
        );
        assert_eq!(
            stmt.render(Dialect::Sqlite),
            "INSERT INTO meals (id, name) VALUES (?, ?) ON CONFLICT DO NOTHING"
        );
        assert_eq!(stmt.params()[1], SqlValue::Null(ValueKind::Text));
    }

    #[test]
    fn test_update_sql() {
        assert_eq!(
            update_sql("meals", &["name", "total_purin"], "id"),
            "UPDATE meals SET name = ?, total_purin = ? WHERE id = ?"
        );
    }

    #[test]
    fn test_insert_sql_fail_on_conflict() {
        assert_eq!(
            insert_sql("users", &["id"], OnConflict::Fail),
            "INSERT INTO users (id) VALUES (?)"
        );
    }

    #[test]
    fn test_insert_sql_targeted_do_nothing() {
        assert_eq!(
            insert_sql("users", &["id", "guid"], OnConflict::DoNothingOn(&["guid"])),
            "INSERT INTO users (id, guid) VALUES (?, ?) ON CONFLICT (guid) DO NOTHING"
        );
    }
}
