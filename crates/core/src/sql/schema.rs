//! Target schema as typed data.
//!
//! Table, column, constraint and index definitions for every entity, plus
//! the pure helpers the schema manager uses to decide what to create, add or
//! rebuild. Rendering goes through [`Dialect`]; no I/O happens here.

use super::dialect::Dialect;
use super::value::ValueKind;

/// Generic column type, rendered per dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
    Timestamp,
}

impl ColumnType {
    /// Type tag used to bind a NULL into a column of this type.
    pub fn value_kind(&self) -> ValueKind {
        match self {
            ColumnType::Text => ValueKind::Text,
            ColumnType::Integer => ValueKind::Int,
            ColumnType::Real => ValueKind::Real,
            ColumnType::Boolean => ValueKind::Bool,
            ColumnType::Timestamp => ValueKind::Timestamp,
        }
    }
}

/// Column default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    Bool(bool),
    CurrentTimestamp,
}

impl DefaultValue {
    fn render(&self, dialect: Dialect) -> &'static str {
        match self {
            DefaultValue::Bool(b) => dialect.bool_literal(*b),
            DefaultValue::CurrentTimestamp => dialect.current_timestamp(),
        }
    }

    /// Whether SQLite accepts this default in `ALTER TABLE ADD COLUMN`.
    fn is_constant(&self) -> bool {
        matches!(self, DefaultValue::Bool(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub primary_key: bool,
    pub unique: bool,
    pub not_null: bool,
    pub default: Option<DefaultValue>,
    pub check: Option<&'static str>,
}

impl ColumnDef {
    pub fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            primary_key: false,
            unique: false,
            not_null: false,
            default: None,
            check: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn default(mut self, value: DefaultValue) -> Self {
        self.default = Some(value);
        self
    }

    pub fn check(mut self, expr: &'static str) -> Self {
        self.check = Some(expr);
        self
    }

    /// Column definition as it appears inside `CREATE TABLE`.
    pub fn definition_sql(&self, dialect: Dialect) -> String {
        let mut sql = format!("{} {}", self.name, dialect.column_type(self.ty));
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default.render(dialect));
        }
        if let Some(check) = self.check {
            sql.push_str(&format!(" CHECK({check})"));
        }
        sql
    }

    /// `ALTER TABLE ... ADD COLUMN` for this column on an existing table.
    ///
    /// Uniqueness is dropped (partial indexes carry it), and `NOT NULL`
    /// survives only alongside a default. SQLite additionally loses
    /// non-constant defaults.
    pub fn add_column_sql(&self, table: &str, dialect: Dialect) -> String {
        let default = self
            .default
            .filter(|d| dialect.supports_rich_add_column() || d.is_constant());

        let mut sql = match dialect {
            Dialect::Sqlite => format!("ALTER TABLE {table} ADD COLUMN {}", self.name),
            Dialect::Postgres => {
                format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {}", self.name)
            }
        };
        sql.push(' ');
        sql.push_str(dialect.column_type(self.ty));
        if self.not_null && default.is_some() {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = default {
            sql.push_str(" DEFAULT ");
            sql.push_str(default.render(dialect));
        }
        if let Some(check) = self.check {
            sql.push_str(&format!(" CHECK({check})"));
        }
        sql
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDelete {
    Cascade,
    SetNull,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: &'static str,
    pub on_delete: OnDelete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: Vec<ColumnDef>,
    pub foreign_keys: Vec<ForeignKey>,
    pub unique: Vec<Vec<&'static str>>,
}

impl TableDef {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            columns: Vec::new(),
            foreign_keys: Vec::new(),
            unique: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Adds `FOREIGN KEY (column) REFERENCES table(id)`.
    pub fn references(
        mut self,
        column: &'static str,
        references: &'static str,
        on_delete: OnDelete,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            column,
            references,
            on_delete,
        });
        self
    }

    pub fn unique_together(mut self, columns: &[&'static str]) -> Self {
        self.unique.push(columns.to_vec());
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// `CREATE TABLE IF NOT EXISTS` with the full target column set.
    pub fn create_sql(&self, dialect: Dialect) -> String {
        let mut parts: Vec<String> = self
            .columns
            .iter()
            .map(|c| c.definition_sql(dialect))
            .collect();

        for fk in &self.foreign_keys {
            let action = match fk.on_delete {
                OnDelete::Cascade => "CASCADE",
                OnDelete::SetNull => "SET NULL",
            };
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}(id) ON DELETE {action}",
                fk.column, fk.references
            ));
        }

        for columns in &self.unique {
            parts.push(format!("UNIQUE({})", columns.join(", ")));
        }

        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            self.name,
            parts.join(",\n    ")
        )
    }

    /// Target columns the live table lacks, in declaration order.
    pub fn missing_columns(&self, live: &[String]) -> Vec<&ColumnDef> {
        self.columns
            .iter()
            .filter(|c| !live.iter().any(|l| l.eq_ignore_ascii_case(c.name)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub table: &'static str,
    pub columns: Vec<&'static str>,
    pub unique: bool,
    pub predicate: Option<&'static str>,
}

impl IndexDef {
    pub fn new(name: &'static str, table: &'static str, columns: &[&'static str]) -> Self {
        Self {
            name,
            table,
            columns: columns.to_vec(),
            unique: false,
            predicate: None,
        }
    }

    /// Unique index over the rows matching `predicate`.
    pub fn unique_where(mut self, predicate: &'static str) -> Self {
        self.unique = true;
        self.predicate = Some(predicate);
        self
    }

    pub fn create_sql(&self) -> String {
        let mut sql = format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {}({})",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            self.table,
            self.columns.join(", ")
        );
        if let Some(predicate) = self.predicate {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }
        sql
    }

    /// The same index without its predicate, for backends that reject
    /// partial indexes.
    pub fn without_predicate(&self) -> Option<IndexDef> {
        self.predicate.map(|_| IndexDef {
            predicate: None,
            ..self.clone()
        })
    }
}

pub const USERS: &str = "users";
pub const READINGS: &str = "uric_acid_values";
pub const MEALS: &str = "meals";
pub const MEAL_COMPONENTS: &str = "meal_components";
pub const FOOD_ITEMS: &str = "food_items";
pub const ANALYSIS_RESULTS: &str = "analysis_results";
pub const API_KEYS: &str = "api_keys";

/// Columns whose absence marks a legacy, unkeyed `users` table.
pub const LEGACY_USER_MARKERS: &[&str] = &["guid", "gender", "birth_year"];

/// Whether an existing `users` table predates the correlation identifier.
pub fn needs_legacy_user_rebuild(live_columns: &[String]) -> bool {
    !live_columns.is_empty()
        && LEGACY_USER_MARKERS
            .iter()
            .any(|m| !live_columns.iter().any(|c| c.eq_ignore_ascii_case(m)))
}

fn flag(name: &'static str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Boolean).default(DefaultValue::Bool(false))
}

fn created_at() -> ColumnDef {
    ColumnDef::new("created_at", ColumnType::Timestamp).default(DefaultValue::CurrentTimestamp)
}

fn updated_at() -> ColumnDef {
    ColumnDef::new("updated_at", ColumnType::Timestamp).default(DefaultValue::CurrentTimestamp)
}

fn id() -> ColumnDef {
    ColumnDef::new("id", ColumnType::Text).primary_key()
}

fn owner() -> ColumnDef {
    ColumnDef::new("user_id", ColumnType::Text).not_null()
}

fn non_negative_int(name: &'static str, check: &'static str) -> ColumnDef {
    ColumnDef::new(name, ColumnType::Integer).not_null().check(check)
}

pub fn users_table() -> TableDef {
    TableDef::new(USERS)
        .column(id())
        .column(ColumnDef::new("guid", ColumnType::Text).unique().not_null())
        .column(
            ColumnDef::new("gender", ColumnType::Text)
                .check("gender IN ('MALE', 'FEMALE', 'DIVERSE')"),
        )
        .column(
            ColumnDef::new("birth_year", ColumnType::Integer)
                .check("birth_year >= 1900 AND birth_year <= 2100"),
        )
        .column(ColumnDef::new("last_backup_timestamp", ColumnType::Timestamp))
        .column(ColumnDef::new("email", ColumnType::Text))
        .column(ColumnDef::new("google_id", ColumnType::Text))
        .column(ColumnDef::new("username", ColumnType::Text))
        .column(ColumnDef::new("password_hash", ColumnType::Text))
        .column(flag("is_admin"))
        .column(created_at())
        .column(updated_at())
}

pub fn readings_table() -> TableDef {
    TableDef::new(READINGS)
        .column(id())
        .column(owner())
        .column(ColumnDef::new("timestamp", ColumnType::Timestamp).not_null())
        .column(
            ColumnDef::new("value", ColumnType::Real)
                .not_null()
                .check("value >= 0 AND value <= 20"),
        )
        .column(flag("normal"))
        .column(flag("much_meat"))
        .column(flag("much_sport"))
        .column(flag("much_sugar"))
        .column(flag("much_alcohol"))
        .column(flag("fasten"))
        .column(flag("gout_attack"))
        .column(ColumnDef::new("notes", ColumnType::Text))
        .column(created_at())
        .column(ColumnDef::new("updated_at", ColumnType::Timestamp))
        .references("user_id", USERS, OnDelete::Cascade)
}

pub fn meals_table() -> TableDef {
    TableDef::new(MEALS)
        .column(id())
        .column(owner())
        .column(ColumnDef::new("timestamp", ColumnType::Timestamp).not_null())
        .column(
            ColumnDef::new("meal_type", ColumnType::Text)
                .not_null()
                .check("meal_type IN ('BREAKFAST', 'LUNCH', 'DINNER', 'SNACK')"),
        )
        .column(ColumnDef::new("name", ColumnType::Text))
        .column(non_negative_int("total_purin", "total_purin >= 0"))
        .column(non_negative_int("total_uric_acid", "total_uric_acid >= 0"))
        .column(non_negative_int("total_calories", "total_calories >= 0"))
        .column(
            ColumnDef::new("total_protein", ColumnType::Real)
                .not_null()
                .check("total_protein >= 0"),
        )
        .column(ColumnDef::new("thumbnail_path", ColumnType::Text))
        .column(created_at())
        .column(ColumnDef::new("updated_at", ColumnType::Timestamp))
        .references("user_id", USERS, OnDelete::Cascade)
}

pub fn meal_components_table() -> TableDef {
    TableDef::new(MEAL_COMPONENTS)
        .column(id())
        .column(ColumnDef::new("meal_id", ColumnType::Text).not_null())
        .column(ColumnDef::new("food_item_name", ColumnType::Text).not_null())
        .column(non_negative_int("estimated_weight", "estimated_weight >= 0"))
        .column(non_negative_int("purin", "purin >= 0"))
        .column(non_negative_int("uric_acid", "uric_acid >= 0"))
        .column(non_negative_int("calories", "calories >= 0"))
        .column(
            ColumnDef::new("protein", ColumnType::Real)
                .not_null()
                .check("protein >= 0"),
        )
        .column(created_at())
        .references("meal_id", MEALS, OnDelete::Cascade)
}

pub fn food_items_table() -> TableDef {
    TableDef::new(FOOD_ITEMS)
        .column(id())
        .column(owner())
        .column(ColumnDef::new("name", ColumnType::Text).not_null())
        .column(non_negative_int("purin_per_100g", "purin_per_100g >= 0"))
        .column(non_negative_int("uric_acid_per_100g", "uric_acid_per_100g >= 0"))
        .column(non_negative_int("calories_per_100g", "calories_per_100g >= 0"))
        .column(
            ColumnDef::new("protein_percentage", ColumnType::Real)
                .not_null()
                .check("protein_percentage >= 0"),
        )
        .column(ColumnDef::new("category", ColumnType::Text).not_null())
        .column(ColumnDef::new("image_path", ColumnType::Text))
        .column(ColumnDef::new("thumbnail_path", ColumnType::Text))
        .column(created_at())
        .column(updated_at())
        .references("user_id", USERS, OnDelete::Cascade)
        .unique_together(&["user_id", "name"])
}

pub fn analysis_results_table() -> TableDef {
    TableDef::new(ANALYSIS_RESULTS)
        .column(id())
        .column(owner())
        .column(ColumnDef::new("analysis_date", ColumnType::Timestamp).not_null())
        .column(ColumnDef::new("data_period_start", ColumnType::Timestamp).not_null())
        .column(ColumnDef::new("data_period_end", ColumnType::Timestamp).not_null())
        .column(ColumnDef::new("insights", ColumnType::Text))
        .column(ColumnDef::new("recommendations", ColumnType::Text))
        .column(
            ColumnDef::new("confidence_score", ColumnType::Real)
                .check("confidence_score >= 0 AND confidence_score <= 1"),
        )
        .column(created_at())
        .references("user_id", USERS, OnDelete::Cascade)
}

pub fn api_keys_table() -> TableDef {
    TableDef::new(API_KEYS)
        .column(id())
        .column(ColumnDef::new("key_hash", ColumnType::Text).unique().not_null())
        .column(ColumnDef::new("name", ColumnType::Text).not_null())
        .column(ColumnDef::new("description", ColumnType::Text))
        .column(flag("can_read_own_uric_acid"))
        .column(flag("can_write_own_uric_acid"))
        .column(flag("can_read_own_meals"))
        .column(flag("can_write_own_meals"))
        .column(flag("can_read_all_uric_acid"))
        .column(flag("can_read_all_meals"))
        .column(ColumnDef::new("created_by", ColumnType::Text))
        .column(created_at())
        .column(ColumnDef::new("last_used_at", ColumnType::Timestamp))
        .column(
            ColumnDef::new("is_active", ColumnType::Boolean).default(DefaultValue::Bool(true)),
        )
        .references("created_by", USERS, OnDelete::SetNull)
}

/// Every table, parents before children.
pub fn tables() -> Vec<TableDef> {
    vec![
        users_table(),
        readings_table(),
        meals_table(),
        meal_components_table(),
        analysis_results_table(),
        api_keys_table(),
        food_items_table(),
    ]
}

/// Every index, created after all columns exist.
pub fn indexes() -> Vec<IndexDef> {
    vec![
        IndexDef::new("idx_users_guid", USERS, &["guid"]),
        IndexDef::new("idx_users_email", USERS, &["email"]),
        IndexDef::new("idx_users_google_id", USERS, &["google_id"])
            .unique_where("google_id IS NOT NULL"),
        IndexDef::new("idx_users_username", USERS, &["username"])
            .unique_where("username IS NOT NULL"),
        IndexDef::new(
            "idx_uric_acid_user_timestamp",
            READINGS,
            &["user_id", "timestamp"],
        ),
        IndexDef::new("idx_meals_user_timestamp", MEALS, &["user_id", "timestamp"]),
        IndexDef::new("idx_meal_components_meal_id", MEAL_COMPONENTS, &["meal_id"]),
        IndexDef::new("idx_food_items_user_id", FOOD_ITEMS, &["user_id"]),
        IndexDef::new("idx_food_items_user_name", FOOD_ITEMS, &["user_id", "name"]),
        IndexDef::new(
            "idx_analysis_user_date",
            ANALYSIS_RESULTS,
            &["user_id", "analysis_date"],
        ),
        IndexDef::new("idx_api_keys_key_hash", API_KEYS, &["key_hash"]),
        IndexDef::new("idx_api_keys_is_active", API_KEYS, &["is_active"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn live(columns: &[&str]) -> Vec<String> {
        columns.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_users_table_sqlite() {
        let sql = users_table().create_sql(Dialect::Sqlite);
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS users"));
        assert!(sql.contains("guid TEXT UNIQUE NOT NULL"));
        assert!(sql.contains("gender TEXT CHECK(gender IN ('MALE', 'FEMALE', 'DIVERSE'))"));
        assert!(sql.contains("birth_year INTEGER CHECK(birth_year >= 1900 AND birth_year <= 2100)"));
        assert!(sql.contains("is_admin INTEGER DEFAULT 0"));
        assert!(sql.contains(
            "created_at DATETIME DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))"
        ));
    }

    #[test]
    fn test_readings_table_postgres() {
        let sql = readings_table().create_sql(Dialect::Postgres);
        assert!(sql.contains("timestamp TIMESTAMPTZ NOT NULL"));
        assert!(sql.contains("value DOUBLE PRECISION NOT NULL CHECK(value >= 0 AND value <= 20)"));
        assert!(sql.contains("gout_attack BOOLEAN DEFAULT FALSE"));
        assert!(sql.contains("FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE"));
    }

    #[test]
    fn test_food_items_natural_key() {
        let sql = food_items_table().create_sql(Dialect::Sqlite);
        assert!(sql.contains("UNIQUE(user_id, name)"));
    }

    #[test]
    fn test_api_keys_creator_set_null() {
        let sql = api_keys_table().create_sql(Dialect::Postgres);
        assert!(sql.contains("key_hash TEXT UNIQUE NOT NULL"));
        assert!(sql.contains("is_active BOOLEAN DEFAULT TRUE"));
        assert!(sql.contains("FOREIGN KEY (created_by) REFERENCES users(id) ON DELETE SET NULL"));
    }

    #[test]
    fn test_meals_check_meal_type() {
        let sql = meals_table().create_sql(Dialect::Sqlite);
        assert!(sql.contains("meal_type IN ('BREAKFAST', 'LUNCH', 'DINNER', 'SNACK')"));
        assert!(sql.contains("total_protein REAL NOT NULL CHECK(total_protein >= 0)"));
    }

    #[test]
    fn test_add_column_sqlite_strips_non_constant_default() {
        let users = users_table();
        let updated = users.find_column("updated_at").unwrap();
        assert_eq!(
            updated.add_column_sql("users", Dialect::Sqlite),
            "ALTER TABLE users ADD COLUMN updated_at DATETIME"
        );
        assert_eq!(
            updated.add_column_sql("users", Dialect::Postgres),
            "ALTER TABLE users ADD COLUMN IF NOT EXISTS updated_at TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP"
        );
        let is_admin = users.find_column("is_admin").unwrap();
        assert_eq!(
            is_admin.add_column_sql("users", Dialect::Sqlite),
            "ALTER TABLE users ADD COLUMN is_admin INTEGER DEFAULT 0"
        );
    }

    #[test]
    fn test_add_column_drops_unique_and_bare_not_null() {
        let users = users_table();
        let guid = users.find_column("guid").unwrap();
        assert_eq!(
            guid.add_column_sql("users", Dialect::Sqlite),
            "ALTER TABLE users ADD COLUMN guid TEXT"
        );
    }

    #[test]
    fn test_missing_columns() {
        let table = meals_table();
        let missing = table.missing_columns(&live(&[
            "id",
            "user_id",
            "timestamp",
            "meal_type",
            "name",
            "total_purin",
            "total_uric_acid",
            "total_calories",
            "total_protein",
            "created_at",
        ]));
        let names: Vec<_> = missing.iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["thumbnail_path", "updated_at"]);
    }

    #[test]
    fn test_legacy_user_detection() {
        assert!(needs_legacy_user_rebuild(&live(&["id", "created_at"])));
        assert!(needs_legacy_user_rebuild(&live(&["id", "guid", "created_at"])));
        assert!(!needs_legacy_user_rebuild(&live(&[
            "id",
            "guid",
            "gender",
            "birth_year"
        ])));
        assert!(!needs_legacy_user_rebuild(&[]));
    }

    #[test]
    fn test_partial_index_fallback() {
        let idx = indexes()
            .into_iter()
            .find(|i| i.name == "idx_users_google_id")
            .unwrap();
        assert_eq!(
            idx.create_sql(),
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_google_id ON users(google_id) WHERE google_id IS NOT NULL"
        );
        assert_eq!(
            idx.without_predicate().unwrap().create_sql(),
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_google_id ON users(google_id)"
        );
        let plain = IndexDef::new("idx_users_email", USERS, &["email"]);
        assert!(plain.without_predicate().is_none());
    }

    #[test]
    fn test_tables_parent_first() {
        let names: Vec<_> = tables().iter().map(|t| t.name).collect();
        assert_eq!(names[0], USERS);
        let meals = names.iter().position(|n| *n == MEALS).unwrap();
        let components = names.iter().position(|n| *n == MEAL_COMPONENTS).unwrap();
        assert!(meals < components);
    }
}
