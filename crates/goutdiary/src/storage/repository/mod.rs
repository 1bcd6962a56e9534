//! Repository layer over any [`Backend`].
//!
//! [`SqlRepository`] implements every repository trait from
//! `goutdiary_core::storage`. Client-synced entities (readings, meals, food
//! items) go through a create-or-replace path that applies last-write-wins
//! inside one transaction.

mod analysis;
mod api_keys;
mod conversions;
mod food_items;
mod meals;
mod readings;
mod users;

use std::sync::Arc;

use uuid::Uuid;

use goutdiary_core::sql::{Dialect, SqlValue, Statement};
use goutdiary_core::storage::{ListOptions, RepositoryError, Result};

use super::backend::Backend;

/// Create-or-replace attempts. A second attempt only happens when a
/// concurrent insert of the same record won the first one.
const SYNC_ATTEMPTS: usize = 2;

/// SQL-backed repository implementation.
#[derive(Clone)]
pub struct SqlRepository {
    backend: Arc<dyn Backend>,
}

impl SqlRepository {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Error for a create-or-replace that kept losing insert races.
fn contended(entity_type: &'static str, id: &str) -> RepositoryError {
    RepositoryError::AlreadyExists {
        entity_type,
        id: id.to_string(),
    }
}

/// A per-user listing: owner filter, inclusive date bounds, order and paging.
fn user_listing(
    select: &str,
    user_id: &str,
    date_column: &str,
    order_by: &str,
    options: &ListOptions,
    dialect: Dialect,
) -> Result<Statement> {
    options.validate()?;

    let mut sql = format!("{select} WHERE user_id = ?");
    let mut params = vec![SqlValue::from(user_id)];

    if let Some(start) = options.start_date {
        sql.push_str(&format!(" AND {date_column} >= ?"));
        params.push(start.into());
    }
    if let Some(end) = options.end_date {
        sql.push_str(&format!(" AND {date_column} <= ?"));
        params.push(end.into());
    }

    sql.push_str(&format!(" ORDER BY {order_by}"));

    match (options.limit, options.offset) {
        (Some(limit), offset) => {
            sql.push_str(" LIMIT ?");
            params.push(limit.into());
            if let Some(offset) = offset {
                sql.push_str(" OFFSET ?");
                params.push(offset.into());
            }
        }
        (None, Some(offset)) => {
            sql.push_str(&format!(" LIMIT {} OFFSET ?", dialect.unbounded_limit()));
            params.push(offset.into());
        }
        (None, None) => {}
    }

    Ok(Statement::new(sql).bind_all(params))
}
