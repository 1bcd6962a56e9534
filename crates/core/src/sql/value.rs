//! Backend-neutral values and rows.
//!
//! Both backends decode their native rows into [`Row`], and every repository
//! reads through the permissive getters here. Booleans may come back as
//! native booleans, integers or text; timestamps as native timestamps or text
//! in several layouts. Normalization happens once, in this module.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;

/// Type tag for a value, used to bind typed NULLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Int,
    Real,
    Text,
    Timestamp,
}

/// A single bound parameter or decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null(ValueKind),
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// The value's type tag.
    pub fn kind(&self) -> ValueKind {
        match self {
            SqlValue::Null(kind) => *kind,
            SqlValue::Bool(_) => ValueKind::Bool,
            SqlValue::Int(_) => ValueKind::Int,
            SqlValue::Real(_) => ValueKind::Real,
            SqlValue::Text(_) => ValueKind::Text,
            SqlValue::Timestamp(_) => ValueKind::Timestamp,
        }
    }
}

/// Rust types with a fixed [`ValueKind`].
pub trait SqlType {
    const KIND: ValueKind;
}

macro_rules! sql_type {
    ($ty:ty, $kind:ident, $variant:ident, $conv:expr) => {
        impl SqlType for $ty {
            const KIND: ValueKind = ValueKind::$kind;
        }

        impl From<$ty> for SqlValue {
            fn from(value: $ty) -> Self {
                SqlValue::$variant($conv(value))
            }
        }
    };
}

sql_type!(bool, Bool, Bool, |v| v);
sql_type!(i64, Int, Int, |v| v);
sql_type!(i32, Int, Int, i64::from);
sql_type!(u32, Int, Int, i64::from);
sql_type!(f64, Real, Real, |v| v);
sql_type!(String, Text, Text, |v| v);
sql_type!(&str, Text, Text, |v: &str| v.to_string());
sql_type!(DateTime<Utc>, Timestamp, Timestamp, |v| v);

impl<T> From<Option<T>> for SqlValue
where
    T: SqlType + Into<SqlValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => SqlValue::Null(T::KIND),
        }
    }
}

/// Errors raised while reading a column out of a [`Row`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("Missing column: {0}")]
    MissingColumn(String),
    #[error("Column {column} is NULL")]
    UnexpectedNull { column: String },
    #[error("Column {column} cannot be read as {expected:?}")]
    UnexpectedType { column: String, expected: ValueKind },
}

/// A decoded result row with named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column.
    pub fn push(&mut self, column: impl Into<String>, value: SqlValue) {
        self.columns.push(column.into());
        self.values.push(value);
    }

    /// Builder form of [`Row::push`].
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.push(column, value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Column/value pairs in select order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Raw value by column name. Names compare case-insensitively.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .map(|i| &self.values[i])
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    fn value(&self, column: &str) -> Result<&SqlValue, ValueError> {
        self.get(column)
            .ok_or_else(|| ValueError::MissingColumn(column.to_string()))
    }

    fn non_null<T>(&self, column: &str, value: Option<T>) -> Result<T, ValueError> {
        value.ok_or_else(|| ValueError::UnexpectedNull {
            column: column.to_string(),
        })
    }

    fn mismatch(column: &str, expected: ValueKind) -> ValueError {
        ValueError::UnexpectedType {
            column: column.to_string(),
            expected,
        }
    }

    pub fn text(&self, column: &str) -> Result<String, ValueError> {
        let value = self.opt_text(column)?;
        self.non_null(column, value)
    }

    /// Text column; numbers and timestamps are rendered as text.
    pub fn opt_text(&self, column: &str) -> Result<Option<String>, ValueError> {
        Ok(match self.value(column)? {
            SqlValue::Null(_) => None,
            SqlValue::Text(s) => Some(s.clone()),
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Real(f) => Some(f.to_string()),
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Timestamp(ts) => Some(format_timestamp(ts)),
        })
    }

    pub fn int(&self, column: &str) -> Result<i64, ValueError> {
        let value = self.opt_int(column)?;
        self.non_null(column, value)
    }

    /// Integer column; reals are rounded, numeric text is parsed.
    pub fn opt_int(&self, column: &str) -> Result<Option<i64>, ValueError> {
        match self.value(column)? {
            SqlValue::Null(_) => Ok(None),
            SqlValue::Int(i) => Ok(Some(*i)),
            SqlValue::Real(f) => Ok(Some(f.round() as i64)),
            SqlValue::Bool(b) => Ok(Some(i64::from(*b))),
            SqlValue::Text(s) => s
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| s.trim().parse::<f64>().ok().map(|f| f.round() as i64))
                .map(Some)
                .ok_or_else(|| Self::mismatch(column, ValueKind::Int)),
            SqlValue::Timestamp(_) => Err(Self::mismatch(column, ValueKind::Int)),
        }
    }

    pub fn real(&self, column: &str) -> Result<f64, ValueError> {
        let value = self.opt_real(column)?;
        self.non_null(column, value)
    }

    pub fn opt_real(&self, column: &str) -> Result<Option<f64>, ValueError> {
        match self.value(column)? {
            SqlValue::Null(_) => Ok(None),
            SqlValue::Real(f) => Ok(Some(*f)),
            SqlValue::Int(i) => Ok(Some(*i as f64)),
            SqlValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| Self::mismatch(column, ValueKind::Real)),
            SqlValue::Bool(_) | SqlValue::Timestamp(_) => {
                Err(Self::mismatch(column, ValueKind::Real))
            }
        }
    }

    /// Boolean flag column. NULL and a missing column both read as `false`.
    pub fn flag(&self, column: &str) -> Result<bool, ValueError> {
        match self.get(column) {
            None => Ok(false),
            Some(value) if value.is_null() => Ok(false),
            Some(value) => coerce_bool(value).ok_or_else(|| Self::mismatch(column, ValueKind::Bool)),
        }
    }

    pub fn timestamp(&self, column: &str) -> Result<DateTime<Utc>, ValueError> {
        let value = self.opt_timestamp(column)?;
        self.non_null(column, value)
    }

    pub fn opt_timestamp(&self, column: &str) -> Result<Option<DateTime<Utc>>, ValueError> {
        match self.value(column)? {
            SqlValue::Null(_) => Ok(None),
            SqlValue::Timestamp(ts) => Ok(Some(*ts)),
            SqlValue::Text(s) if s.trim().is_empty() => Ok(None),
            SqlValue::Text(s) => parse_timestamp(s)
                .map(Some)
                .ok_or_else(|| Self::mismatch(column, ValueKind::Timestamp)),
            _ => Err(Self::mismatch(column, ValueKind::Timestamp)),
        }
    }

    /// Timestamp column that may be absent from older tables.
    pub fn timestamp_if_present(&self, column: &str) -> Result<Option<DateTime<Utc>>, ValueError> {
        if self.has_column(column) {
            self.opt_timestamp(column)
        } else {
            Ok(None)
        }
    }
}

/// Normalizes the boolean spellings both backends hand back.
///
/// Accepts native booleans, `1`/`0` (any non-zero integer is true), and the
/// text forms `"1"`, `"0"`, `"true"`, `"false"` (case-insensitive, plus the
/// `t`/`f` PostgreSQL text output). Returns `None` for NULL and anything else.
pub fn coerce_bool(value: &SqlValue) -> Option<bool> {
    match value {
        SqlValue::Bool(b) => Some(*b),
        SqlValue::Int(i) => Some(*i != 0),
        SqlValue::Real(f) => Some(*f != 0.0),
        SqlValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "t" => Some(true),
            "0" | "false" | "f" => Some(false),
            _ => None,
        },
        SqlValue::Null(_) | SqlValue::Timestamp(_) => None,
    }
}

/// Parses the timestamp layouts found in stored data.
///
/// RFC 3339 with any offset, `YYYY-MM-DD HH:MM:SS` (SQLite's
/// `CURRENT_TIMESTAMP`), either separator with fractional seconds, PostgreSQL
/// text output with a short offset, and bare dates. Naive values are UTC.
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let s = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Canonical text form for timestamps stored as text.
///
/// Fixed width, so lexical order matches chronological order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_coerce_bool_equivalents() {
        for v in [
            SqlValue::Bool(true),
            SqlValue::Int(1),
            SqlValue::Text("1".into()),
            SqlValue::Text("true".into()),
            SqlValue::Text("TRUE".into()),
        ] {
            assert_eq!(coerce_bool(&v), Some(true), "{v:?}");
        }
        for v in [
            SqlValue::Bool(false),
            SqlValue::Int(0),
            SqlValue::Text("0".into()),
            SqlValue::Text("false".into()),
        ] {
            assert_eq!(coerce_bool(&v), Some(false), "{v:?}");
        }
        assert_eq!(coerce_bool(&SqlValue::Null(ValueKind::Bool)), None);
        assert_eq!(coerce_bool(&SqlValue::Text("maybe".into())), None);
    }

    #[test]
    fn test_parse_timestamp_layouts() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-05T14:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T16:30:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05 14:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T14:30:00.000"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05 14:30:00+00"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-03-05"),
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_format_timestamp_is_canonical() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-05T14:30:00.000Z");
        assert_eq!(parse_timestamp(&format_timestamp(&ts)), Some(ts));
    }

    #[test]
    fn test_option_binds_typed_null() {
        let none: Option<i64> = None;
        assert_eq!(SqlValue::from(none), SqlValue::Null(ValueKind::Int));
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".into()));
    }

    #[test]
    fn test_row_getters_are_permissive() {
        let row = Row::new()
            .with("id", "abc")
            .with("value", SqlValue::Int(6))
            .with("calories", SqlValue::Real(119.6))
            .with("gout_attack", SqlValue::Text("1".into()))
            .with("normal", SqlValue::Null(ValueKind::Bool))
            .with("timestamp", "2024-03-05 14:30:00");

        assert_eq!(row.text("ID").unwrap(), "abc");
        assert_eq!(row.real("value").unwrap(), 6.0);
        assert_eq!(row.int("calories").unwrap(), 120);
        assert!(row.flag("gout_attack").unwrap());
        assert!(!row.flag("normal").unwrap());
        assert!(!row.flag("fasten").unwrap());
        assert_eq!(
            row.timestamp("timestamp").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_row_getter_errors() {
        let row = Row::new()
            .with("name", SqlValue::Null(ValueKind::Text))
            .with("value", "abc");

        assert_eq!(
            row.text("name"),
            Err(ValueError::UnexpectedNull {
                column: "name".into()
            })
        );
        assert_eq!(
            row.real("value"),
            Err(ValueError::UnexpectedType {
                column: "value".into(),
                expected: ValueKind::Real
            })
        );
        assert_eq!(
            row.text("missing"),
            Err(ValueError::MissingColumn("missing".into()))
        );
        assert_eq!(row.timestamp_if_present("updated_at"), Ok(None));
    }
}
