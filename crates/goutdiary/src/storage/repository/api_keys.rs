use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use goutdiary_core::diary::{
    generate_key, hash_key, validate_new_api_key, ApiKey, ApiKeyUpdate, CreatedApiKey, NewApiKey,
    Permission,
};
use goutdiary_core::sql::schema::API_KEYS;
use goutdiary_core::sql::{insert_sql, update_sql, OnConflict, SqlValue, Statement};
use goutdiary_core::storage::{ApiKeyRepository, RepositoryError, Result};

use super::conversions::row_to_api_key;
use super::{new_id, SqlRepository};
use crate::storage::backend::Executor;
use crate::storage::error::for_entity;

const ENTITY: &str = "ApiKey";

/// Editable columns, in bind order: name, description, the six permission
/// flags, created_by, is_active.
fn editable_columns() -> Vec<&'static str> {
    let mut columns = vec!["name", "description"];
    columns.extend(Permission::ALL.iter().map(Permission::column));
    columns.extend(["created_by", "is_active"]);
    columns
}

fn editable_values(input: &NewApiKey) -> Vec<SqlValue> {
    let mut values = vec![
        SqlValue::from(input.name.trim()),
        input.description.clone().into(),
    ];
    values.extend(
        Permission::ALL
            .iter()
            .map(|p| SqlValue::from(input.permissions.flag(*p))),
    );
    values.push(input.created_by.clone().into());
    values.push(input.is_active.into());
    values
}

impl SqlRepository {
    async fn insert_api_key(&self, input: &NewApiKey, key: String) -> Result<CreatedApiKey> {
        validate_new_api_key(input)?;
        let id = new_id();
        let key_hash = hash_key(&key);

        let mut columns = vec!["id", "key_hash", "created_at"];
        columns.extend(editable_columns());
        let statement = Statement::new(insert_sql(API_KEYS, &columns, OnConflict::Fail))
            .bind(id.as_str())
            .bind(key_hash.as_str())
            .bind(Utc::now())
            .bind_all(editable_values(input));

        self.backend
            .run(&statement)
            .await
            .map_err(|e| for_entity(e, ENTITY, &input.name))?;
        info!(id = %id, name = %input.name, "Created API key");

        let api_key = self
            .find_api_key_by_id(&id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound {
                entity_type: ENTITY,
                id: id.clone(),
            })?;
        Ok(CreatedApiKey { api_key, key })
    }
}

// ============================================================================
// ApiKeyRepository Implementation
// ============================================================================

#[async_trait]
impl ApiKeyRepository for SqlRepository {
    async fn create_api_key(&self, input: &NewApiKey) -> Result<CreatedApiKey> {
        self.insert_api_key(input, generate_key()).await
    }

    async fn create_api_key_with_key(
        &self,
        input: &NewApiKey,
        key: &str,
    ) -> Result<CreatedApiKey> {
        let key = key.trim();
        if key.is_empty() {
            return Err(RepositoryError::InvalidData("API key must not be empty".into()));
        }

        let existing = self
            .backend
            .get(
                &Statement::new(format!("SELECT id FROM {API_KEYS} WHERE key_hash = ?"))
                    .bind(hash_key(key)),
            )
            .await?;
        if existing.is_some() {
            return Err(RepositoryError::AlreadyExists {
                entity_type: ENTITY,
                id: input.name.clone(),
            });
        }

        self.insert_api_key(input, key.to_string()).await
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let row = self
            .backend
            .get(
                &Statement::new(format!(
                    "SELECT * FROM {API_KEYS} WHERE key_hash = ? AND is_active = ?"
                ))
                .bind(key_hash)
                .bind(true),
            )
            .await?;
        row.as_ref().map(row_to_api_key).transpose()
    }

    async fn find_api_key_by_id(&self, id: &str) -> Result<Option<ApiKey>> {
        let row = self
            .backend
            .get(&Statement::new(format!("SELECT * FROM {API_KEYS} WHERE id = ?")).bind(id))
            .await?;
        row.as_ref().map(row_to_api_key).transpose()
    }

    async fn list_api_keys(&self) -> Result<Vec<ApiKey>> {
        self.backend
            .all(&Statement::new(format!(
                "SELECT * FROM {API_KEYS} ORDER BY created_at DESC"
            )))
            .await?
            .iter()
            .map(row_to_api_key)
            .collect()
    }

    async fn update_api_key(&self, id: &str, update: &ApiKeyUpdate) -> Result<Option<ApiKey>> {
        validate_new_api_key(update)?;

        let statement = Statement::new(update_sql(API_KEYS, &editable_columns(), "id"))
            .bind_all(editable_values(update))
            .bind(id);
        let result = self
            .backend
            .run(&statement)
            .await
            .map_err(|e| for_entity(e, ENTITY, id))?;
        if result.rows_affected == 0 {
            return Ok(None);
        }
        self.find_api_key_by_id(id).await
    }

    async fn touch_api_key(&self, id: &str) -> Result<()> {
        self.backend
            .run(
                &Statement::new(format!("UPDATE {API_KEYS} SET last_used_at = ? WHERE id = ?"))
                    .bind(Utc::now())
                    .bind(id),
            )
            .await?;
        Ok(())
    }

    async fn deactivate_api_key(&self, id: &str) -> Result<bool> {
        let result = self
            .backend
            .run(
                &Statement::new(format!("UPDATE {API_KEYS} SET is_active = ? WHERE id = ?"))
                    .bind(false)
                    .bind(id),
            )
            .await?;
        if result.rows_affected > 0 {
            info!(id, "Deactivated API key");
        }
        Ok(result.rows_affected > 0)
    }
}
