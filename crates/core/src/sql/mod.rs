//! Backend-neutral SQL building blocks.

mod dialect;
pub mod schema;
mod statement;
mod value;

pub use dialect::{placeholder_count, Dialect};
pub use statement::{insert_sql, update_sql, OnConflict, Statement};
pub use value::{
    coerce_bool, format_timestamp, parse_timestamp, Row, SqlType, SqlValue, ValueError, ValueKind,
};
