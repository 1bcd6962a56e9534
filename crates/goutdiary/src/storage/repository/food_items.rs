use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use goutdiary_core::diary::{
    decide, validate_new_food_item, write_stamp, FoodItem, NewFoodItem, SyncDecision,
};
use goutdiary_core::sql::schema::FOOD_ITEMS;
use goutdiary_core::sql::{insert_sql, update_sql, OnConflict, SqlValue, Statement};
use goutdiary_core::storage::{FoodItemRepository, ListOptions, Result};

use super::conversions::row_to_food_item;
use super::{contended, new_id, user_listing, SqlRepository, SYNC_ATTEMPTS};
use crate::storage::backend::{finish, Executor};
use crate::storage::error::for_entity;

const ENTITY: &str = "FoodItem";

/// Columns written from a [`NewFoodItem`], in bind order.
const FIELDS: &[&str] = &[
    "name",
    "purin_per_100g",
    "uric_acid_per_100g",
    "calories_per_100g",
    "protein_percentage",
    "category",
    "image_path",
    "thumbnail_path",
    "updated_at",
];

fn field_values(input: &NewFoodItem, updated_at: DateTime<Utc>) -> Vec<SqlValue> {
    vec![
        input.name.as_str().into(),
        input.purin_per_100g.into(),
        input.uric_acid_per_100g.into(),
        input.calories_per_100g.into(),
        input.protein_percentage.into(),
        input.category.as_str().into(),
        input.image_path.clone().into(),
        input.thumbnail_path.clone().into(),
        updated_at.into(),
    ]
}

async fn fetch<E: Executor + ?Sized>(executor: &E, id: &str) -> Result<Option<FoodItem>> {
    let row = executor
        .get(&Statement::new(format!("SELECT * FROM {FOOD_ITEMS} WHERE id = ?")).bind(id))
        .await?;
    row.as_ref().map(row_to_food_item).transpose()
}

async fn fetch_by_name<E: Executor + ?Sized>(
    executor: &E,
    user_id: &str,
    name: &str,
) -> Result<Option<FoodItem>> {
    let row = executor
        .get(
            &Statement::new(format!(
                "SELECT * FROM {FOOD_ITEMS} WHERE user_id = ? AND name = ?"
            ))
            .bind(user_id)
            .bind(name),
        )
        .await?;
    row.as_ref().map(row_to_food_item).transpose()
}

async fn overwrite<E: Executor + ?Sized>(
    executor: &E,
    id: &str,
    input: &NewFoodItem,
) -> Result<u64> {
    let statement = Statement::new(update_sql(FOOD_ITEMS, FIELDS, "id"))
        .bind_all(field_values(input, write_stamp(input.updated_at, Utc::now())))
        .bind(id);

    Ok(executor.run(&statement).await?.rows_affected)
}

/// One create-or-replace attempt keyed on owner and name. `None` means a
/// concurrent insert of the same item got in first.
async fn sync<E: Executor + ?Sized>(executor: &E, input: &NewFoodItem) -> Result<Option<FoodItem>> {
    let existing = fetch_by_name(executor, &input.user_id, &input.name).await?;

    let id = match (decide(existing.as_ref(), input.updated_at), existing) {
        (SyncDecision::KeepExisting, Some(item)) => {
            debug!(id = %item.id, "Stored food item is newer, keeping it");
            return Ok(Some(item));
        }
        (SyncDecision::Replace, Some(item)) => {
            overwrite(executor, &item.id, input).await?;
            item.id
        }
        _ => {
            let id = input.id.clone().unwrap_or_else(new_id);
            let now = Utc::now();
            let mut columns = vec!["id", "user_id", "created_at"];
            columns.extend_from_slice(FIELDS);

            let statement = Statement::new(insert_sql(FOOD_ITEMS, &columns, OnConflict::DoNothing))
                .bind(id.as_str())
                .bind(input.user_id.as_str())
                .bind(now)
                .bind_all(field_values(input, write_stamp(input.updated_at, now)));
            if executor.run(&statement).await?.rows_affected == 0 {
                return Ok(None);
            }
            id
        }
    };

    fetch(executor, &id).await
}

// ============================================================================
// FoodItemRepository Implementation
// ============================================================================

#[async_trait]
impl FoodItemRepository for SqlRepository {
    async fn create_food_item(&self, input: &NewFoodItem) -> Result<FoodItem> {
        validate_new_food_item(input)?;

        for _ in 0..SYNC_ATTEMPTS {
            let tx = self.backend.begin().await?;
            let outcome = sync(&*tx, input).await;
            let synced = finish(tx, outcome)
                .await
                .map_err(|e| for_entity(e, ENTITY, &input.name))?;
            if let Some(item) = synced {
                return Ok(item);
            }
            debug!(name = %input.name, "Concurrent insert won, retrying");
        }

        Err(contended(ENTITY, &input.name))
    }

    async fn find_food_item_by_id(&self, id: &str) -> Result<Option<FoodItem>> {
        fetch(self.backend(), id).await
    }

    async fn find_food_item_by_name(
        &self,
        user_id: &str,
        name: &str,
    ) -> Result<Option<FoodItem>> {
        fetch_by_name(self.backend(), user_id, name).await
    }

    async fn find_food_items_by_user(
        &self,
        user_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<FoodItem>> {
        let statement = user_listing(
            &format!("SELECT * FROM {FOOD_ITEMS}"),
            user_id,
            "updated_at",
            "name ASC",
            options,
            self.backend.dialect(),
        )?;

        self.backend
            .all(&statement)
            .await?
            .iter()
            .map(row_to_food_item)
            .collect()
    }

    async fn update_food_item(&self, id: &str, input: &NewFoodItem) -> Result<Option<FoodItem>> {
        validate_new_food_item(input)?;

        let updated = overwrite(self.backend(), id, input)
            .await
            .map_err(|e| for_entity(e, ENTITY, id))?;
        if updated == 0 {
            return Ok(None);
        }
        fetch(self.backend(), id).await
    }

    async fn delete_food_item(&self, id: &str) -> Result<bool> {
        let result = self
            .backend
            .run(&Statement::new(format!("DELETE FROM {FOOD_ITEMS} WHERE id = ?")).bind(id))
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn delete_food_items_by_user(&self, user_id: &str) -> Result<u64> {
        let result = self
            .backend
            .run(
                &Statement::new(format!("DELETE FROM {FOOD_ITEMS} WHERE user_id = ?"))
                    .bind(user_id),
            )
            .await?;
        Ok(result.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::test_support::{repository, user};
    use chrono::TimeZone;
    use goutdiary_core::storage::RepositoryError;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn sardines(user_id: &str, purin: i64) -> NewFoodItem {
        let mut item = NewFoodItem::new(user_id, "Sardines", "Fish");
        item.purin_per_100g = purin;
        item.calories_per_100g = 208;
        item.protein_percentage = 24.6;
        item
    }

    #[tokio::test]
    async fn test_same_name_keeps_one_row() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;

        let first = repo
            .create_food_item(&sardines(&owner.id, 345).with_updated_at(at(8)))
            .await
            .unwrap();
        let second = repo
            .create_food_item(&sardines(&owner.id, 480).with_updated_at(at(9)))
            .await
            .unwrap();
        let stale = repo
            .create_food_item(&sardines(&owner.id, 100).with_updated_at(at(7)))
            .await
            .unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(second.purin_per_100g, 480);
        assert_eq!(stale.purin_per_100g, 480);
        let all = repo
            .find_food_items_by_user(&owner.id, &ListOptions::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_same_name_for_different_users() {
        let repo = repository().await;
        let alice = user(&repo, "guid-1").await;
        let bob = user(&repo, "guid-2").await;

        let a = repo.create_food_item(&sardines(&alice.id, 345)).await.unwrap();
        let b = repo.create_food_item(&sardines(&bob.id, 345)).await.unwrap();

        assert_ne!(a.id, b.id);
        let found = repo
            .find_food_item_by_name(&bob.id, "Sardines")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, b.id);
    }

    #[tokio::test]
    async fn test_listing_ordered_by_name() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;
        for name in ["Tofu", "Anchovies", "Lentils"] {
            repo.create_food_item(&NewFoodItem::new(&owner.id, name, "Other"))
                .await
                .unwrap();
        }

        let items = repo
            .find_food_items_by_user(&owner.id, &ListOptions::new().limit(2))
            .await
            .unwrap();

        let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["Anchovies", "Lentils"]);
    }

    #[tokio::test]
    async fn test_rename_onto_existing_name_conflicts() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;
        repo.create_food_item(&sardines(&owner.id, 345)).await.unwrap();
        let tofu = repo
            .create_food_item(&NewFoodItem::new(&owner.id, "Tofu", "Vegetarian"))
            .await
            .unwrap();

        let result = repo.update_food_item(&tofu.id, &sardines(&owner.id, 1)).await;

        assert!(matches!(
            result,
            Err(RepositoryError::AlreadyExists { entity_type: "FoodItem", .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_name_rejected() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;

        let result = repo
            .create_food_item(&NewFoodItem::new(&owner.id, "  ", "Fish"))
            .await;

        assert!(matches!(result, Err(RepositoryError::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;
        let item = repo.create_food_item(&sardines(&owner.id, 345)).await.unwrap();

        assert!(repo.delete_food_item(&item.id).await.unwrap());
        assert_eq!(repo.find_food_item_by_id(&item.id).await.unwrap(), None);
        assert_eq!(repo.delete_food_items_by_user(&owner.id).await.unwrap(), 0);
    }
}
