use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use goutdiary_core::diary::{
    decide, validate_new_meal, write_stamp, DietStats, Meal, MealComponent, NewMeal, SyncDecision,
};
use goutdiary_core::sql::schema::{MEALS, MEAL_COMPONENTS};
use goutdiary_core::sql::{insert_sql, update_sql, OnConflict, SqlValue, Statement};
use goutdiary_core::storage::{window_start, ListOptions, MealRepository, Result};

use super::conversions::{row_to_component, row_to_meal};
use super::{contended, new_id, user_listing, SqlRepository, SYNC_ATTEMPTS};
use crate::storage::backend::{finish, Executor};
use crate::storage::error::for_entity;

const ENTITY: &str = "Meal";

/// Columns written from a [`NewMeal`], in bind order.
const FIELDS: &[&str] = &[
    "timestamp",
    "meal_type",
    "name",
    "total_purin",
    "total_uric_acid",
    "total_calories",
    "total_protein",
    "thumbnail_path",
    "updated_at",
];

const COMPONENT_COLUMNS: &[&str] = &[
    "id",
    "meal_id",
    "food_item_name",
    "estimated_weight",
    "purin",
    "uric_acid",
    "calories",
    "protein",
    "created_at",
];

fn field_values(input: &NewMeal, updated_at: DateTime<Utc>) -> Vec<SqlValue> {
    vec![
        input.timestamp.into(),
        input.meal_type.as_str().into(),
        input.name.clone().into(),
        input.total_purin.into(),
        input.total_uric_acid.into(),
        input.total_calories.into(),
        input.total_protein.into(),
        input.thumbnail_path.clone().into(),
        updated_at.into(),
    ]
}

async fn components_of<E: Executor + ?Sized>(
    executor: &E,
    meal_id: &str,
) -> Result<Vec<MealComponent>> {
    executor
        .all(
            &Statement::new(format!(
                "SELECT * FROM {MEAL_COMPONENTS} WHERE meal_id = ? ORDER BY created_at, id"
            ))
            .bind(meal_id),
        )
        .await?
        .iter()
        .map(row_to_component)
        .collect()
}

async fn fetch<E: Executor + ?Sized>(executor: &E, id: &str) -> Result<Option<Meal>> {
    let row = executor
        .get(&Statement::new(format!("SELECT * FROM {MEALS} WHERE id = ?")).bind(id))
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };

    let mut meal = row_to_meal(&row)?;
    meal.components = components_of(executor, id).await?;
    Ok(Some(meal))
}

/// Deletes the meal's components and writes the input's.
async fn replace_components<E: Executor + ?Sized>(
    executor: &E,
    meal_id: &str,
    input: &NewMeal,
) -> Result<()> {
    executor
        .run(
            &Statement::new(format!("DELETE FROM {MEAL_COMPONENTS} WHERE meal_id = ?"))
                .bind(meal_id),
        )
        .await?;

    let sql = insert_sql(MEAL_COMPONENTS, COMPONENT_COLUMNS, OnConflict::Fail);
    let now = Utc::now();
    for component in &input.components {
        let statement = Statement::new(sql.as_str())
            .bind(component.id.clone().unwrap_or_else(new_id))
            .bind(meal_id)
            .bind(component.food_item_name.as_str())
            .bind(component.estimated_weight)
            .bind(component.purin)
            .bind(component.uric_acid)
            .bind(component.calories)
            .bind(component.protein)
            .bind(now);
        executor.run(&statement).await?;
    }
    Ok(())
}

async fn insert<E: Executor + ?Sized>(executor: &E, id: &str, input: &NewMeal) -> Result<bool> {
    let now = Utc::now();
    let mut columns = vec!["id", "user_id", "created_at"];
    columns.extend_from_slice(FIELDS);

    let sql = insert_sql(MEALS, &columns, OnConflict::DoNothingOn(&["id"]));
    let statement = Statement::new(sql)
        .bind(id)
        .bind(input.user_id.as_str())
        .bind(now)
        .bind_all(field_values(input, write_stamp(input.updated_at, now)));

    if executor.run(&statement).await?.rows_affected == 0 {
        return Ok(false);
    }
    replace_components(executor, id, input).await?;
    Ok(true)
}

/// Overwrites the meal row and its components, keeping the owner. Returns
/// false if the meal does not exist.
async fn overwrite<E: Executor + ?Sized>(executor: &E, id: &str, input: &NewMeal) -> Result<bool> {
    let statement = Statement::new(update_sql(MEALS, FIELDS, "id"))
        .bind_all(field_values(input, write_stamp(input.updated_at, Utc::now())))
        .bind(id);

    if executor.run(&statement).await?.rows_affected == 0 {
        return Ok(false);
    }
    replace_components(executor, id, input).await?;
    Ok(true)
}

/// One create-or-replace attempt. `None` means a concurrent insert of the
/// same id got in first.
async fn sync<E: Executor + ?Sized>(executor: &E, id: &str, input: &NewMeal) -> Result<Option<Meal>> {
    let existing = fetch(executor, id).await?;

    match decide(existing.as_ref(), input.updated_at) {
        SyncDecision::Insert => {
            if !insert(executor, id, input).await? {
                return Ok(None);
            }
        }
        SyncDecision::KeepExisting => {
            debug!(id, "Stored meal is newer, keeping it");
            return Ok(existing);
        }
        SyncDecision::Replace => {
            overwrite(executor, id, input).await?;
        }
    }

    fetch(executor, id).await
}

// ============================================================================
// MealRepository Implementation
// ============================================================================

#[async_trait]
impl MealRepository for SqlRepository {
    async fn create_meal(&self, input: &NewMeal) -> Result<Meal> {
        validate_new_meal(input)?;
        let id = input.id.clone().unwrap_or_else(new_id);

        for _ in 0..SYNC_ATTEMPTS {
            let tx = self.backend.begin().await?;
            let outcome = sync(&*tx, &id, input).await;
            let synced = finish(tx, outcome)
                .await
                .map_err(|e| for_entity(e, ENTITY, &id))?;
            if let Some(meal) = synced {
                return Ok(meal);
            }
            debug!(id = %id, "Concurrent insert won, retrying");
        }

        Err(contended(ENTITY, &id))
    }

    async fn find_meal_by_id(&self, id: &str) -> Result<Option<Meal>> {
        fetch(self.backend(), id).await
    }

    async fn find_meals_by_user(&self, user_id: &str, options: &ListOptions) -> Result<Vec<Meal>> {
        let statement = user_listing(
            &format!("SELECT * FROM {MEALS}"),
            user_id,
            "timestamp",
            "timestamp DESC",
            options,
            self.backend.dialect(),
        )?;
        let mut meals = self
            .backend
            .all(&statement)
            .await?
            .iter()
            .map(row_to_meal)
            .collect::<Result<Vec<_>>>()?;
        if meals.is_empty() {
            return Ok(meals);
        }

        let placeholders = vec!["?"; meals.len()].join(", ");
        let components = self
            .backend
            .all(
                &Statement::new(format!(
                    "SELECT * FROM {MEAL_COMPONENTS} WHERE meal_id IN ({placeholders}) \
                     ORDER BY created_at, id"
                ))
                .bind_all(meals.iter().map(|m| SqlValue::from(m.id.as_str()))),
            )
            .await?;

        let mut by_meal: HashMap<String, Vec<MealComponent>> = HashMap::new();
        for row in &components {
            let component = row_to_component(row)?;
            by_meal
                .entry(component.meal_id.clone())
                .or_default()
                .push(component);
        }
        for meal in &mut meals {
            meal.components = by_meal.remove(&meal.id).unwrap_or_default();
        }

        Ok(meals)
    }

    async fn find_components_by_meal(&self, meal_id: &str) -> Result<Vec<MealComponent>> {
        components_of(self.backend(), meal_id).await
    }

    async fn update_meal(&self, id: &str, input: &NewMeal) -> Result<Option<Meal>> {
        validate_new_meal(input)?;

        let tx = self.backend.begin().await?;
        let outcome = match overwrite(&*tx, id, input).await {
            Ok(true) => fetch(&*tx, id).await,
            Ok(false) => Ok(None),
            Err(err) => Err(err),
        };
        finish(tx, outcome)
            .await
            .map_err(|e| for_entity(e, ENTITY, id))
    }

    async fn delete_meal(&self, id: &str) -> Result<bool> {
        let result = self
            .backend
            .run(&Statement::new(format!("DELETE FROM {MEALS} WHERE id = ?")).bind(id))
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn delete_meals_by_user(&self, user_id: &str) -> Result<u64> {
        let result = self
            .backend
            .run(&Statement::new(format!("DELETE FROM {MEALS} WHERE user_id = ?")).bind(user_id))
            .await?;
        Ok(result.rows_affected)
    }

    async fn diet_stats(&self, user_id: &str, days: u32) -> Result<DietStats> {
        let statement = Statement::new(format!(
            "SELECT COUNT(*) AS meal_count, \
             CAST(AVG(total_purin) AS DOUBLE PRECISION) AS avg_purin, \
             CAST(AVG(total_calories) AS DOUBLE PRECISION) AS avg_calories, \
             CAST(AVG(total_protein) AS DOUBLE PRECISION) AS avg_protein \
             FROM {MEALS} WHERE user_id = ? AND timestamp >= ?"
        ))
        .bind(user_id)
        .bind(window_start(Utc::now(), days));

        let Some(row) = self.backend.get(&statement).await? else {
            return Ok(DietStats::default());
        };

        Ok(DietStats::from_aggregates(
            row.int("meal_count")?,
            row.opt_real("avg_purin")?,
            row.opt_real("avg_calories")?,
            row.opt_real("avg_protein")?,
        ))
    }

    async fn last_meal_timestamp(&self, user_id: &str) -> Result<Option<DateTime<Utc>>> {
        let row = self
            .backend
            .get(
                &Statement::new(format!(
                    "SELECT timestamp FROM {MEALS} WHERE user_id = ? ORDER BY timestamp DESC LIMIT 1"
                ))
                .bind(user_id),
            )
            .await?;

        match row {
            Some(row) => Ok(row.opt_timestamp("timestamp")?),
            None => Ok(None),
        }
    }
}
