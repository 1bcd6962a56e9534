use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use goutdiary_core::diary::{validate_new_user, validate_user_update, NewUser, User, UserUpdate};
use goutdiary_core::sql::schema::USERS;
use goutdiary_core::sql::{insert_sql, OnConflict, SqlValue, Statement};
use goutdiary_core::storage::{RepositoryError, Result, UserRepository};

use super::conversions::row_to_user;
use super::{new_id, SqlRepository};
use crate::storage::backend::Executor;
use crate::storage::error::for_entity;

const ENTITY: &str = "User";

const INSERT_COLUMNS: &[&str] = &[
    "id",
    "guid",
    "gender",
    "birth_year",
    "last_backup_timestamp",
    "email",
    "google_id",
    "username",
    "password_hash",
    "is_admin",
    "created_at",
    "updated_at",
];

impl SqlRepository {
    async fn find_user_where(&self, column: &str, value: &str) -> Result<Option<User>> {
        let row = self
            .backend
            .get(&Statement::new(format!("SELECT * FROM {USERS} WHERE {column} = ?")).bind(value))
            .await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn credentialed_user_exists(&self) -> Result<bool> {
        let row = self
            .backend
            .get(&Statement::new(format!(
                "SELECT COUNT(*) AS count FROM {USERS} \
                 WHERE username IS NOT NULL AND username <> '' \
                 AND password_hash IS NOT NULL AND password_hash <> ''"
            )))
            .await?;
        match row {
            Some(row) => Ok(row.int("count")? > 0),
            None => Ok(false),
        }
    }

    /// Fills the stored user's blank fields from `input`. Fields `input`
    /// leaves out keep their stored values.
    async fn merge_user(&self, guid: &str, input: &NewUser) -> Result<Option<User>> {
        let mut sql = format!(
            "UPDATE {USERS} SET gender = COALESCE(?, gender), \
             birth_year = COALESCE(?, birth_year), \
             email = COALESCE(?, email), \
             google_id = COALESCE(?, google_id), \
             username = COALESCE(?, username), \
             password_hash = COALESCE(?, password_hash)"
        );
        let mut params: Vec<SqlValue> = vec![
            input.gender.map(|g| g.as_str()).into(),
            input.birth_year.into(),
            input.email.clone().into(),
            input.google_id.clone().into(),
            input.username.clone().into(),
            input.password_hash.clone().into(),
        ];
        if let Some(last_backup) = input.last_backup_timestamp {
            sql.push_str(", last_backup_timestamp = ?");
            params.push(last_backup.into());
        }
        sql.push_str(", updated_at = ? WHERE guid = ?");
        params.push(Utc::now().into());
        params.push(guid.into());

        self.backend
            .run(&Statement::new(sql).bind_all(params))
            .await
            .map_err(|e| for_entity(e, ENTITY, guid))?;
        self.find_user_by_guid(guid).await
    }

    async fn insert_user(&self, guid: &str, input: &NewUser) -> Result<bool> {
        let is_admin = input.resolve_admin(self.credentialed_user_exists().await?);
        let now = Utc::now();

        let sql = insert_sql(USERS, INSERT_COLUMNS, OnConflict::DoNothingOn(&["guid"]));
        let statement = Statement::new(sql)
            .bind(new_id())
            .bind(guid)
            .bind(input.gender.map(|g| g.as_str()))
            .bind(input.birth_year)
            .bind(input.last_backup_timestamp.flatten())
            .bind(input.email.clone())
            .bind(input.google_id.clone())
            .bind(input.username.clone())
            .bind(input.password_hash.clone())
            .bind(is_admin)
            .bind(now)
            .bind(now);

        let result = self
            .backend
            .run(&statement)
            .await
            .map_err(|e| for_entity(e, ENTITY, guid))?;
        if result.rows_affected > 0 && is_admin {
            info!(guid, "Created administrator");
        }
        Ok(result.rows_affected > 0)
    }
}

// ============================================================================
// UserRepository Implementation
// ============================================================================

#[async_trait]
impl UserRepository for SqlRepository {
    async fn create_user(&self, input: &NewUser) -> Result<User> {
        validate_new_user(input)?;
        let guid = input
            .guid
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.find_user_by_guid(&guid).await?.is_none() {
            if self.insert_user(&guid, input).await? {
                return self
                    .find_user_by_guid(&guid)
                    .await?
                    .ok_or_else(|| RepositoryError::NotFound {
                        entity_type: ENTITY,
                        id: guid.clone(),
                    });
            }
            debug!(guid = %guid, "User created concurrently, merging instead");
        }

        self.merge_user(&guid, input)
            .await?
            .ok_or(RepositoryError::NotFound {
                entity_type: ENTITY,
                id: guid,
            })
    }

    async fn get_or_create_user(&self, guid: &str) -> Result<User> {
        if let Some(user) = self.find_user_by_guid(guid).await? {
            return Ok(user);
        }
        self.create_user(&NewUser::with_guid(guid)).await
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>> {
        self.find_user_where("id", id).await
    }

    async fn find_user_by_guid(&self, guid: &str) -> Result<Option<User>> {
        self.find_user_where("guid", guid).await
    }

    async fn find_user_by_google_id(&self, google_id: &str) -> Result<Option<User>> {
        self.find_user_where("google_id", google_id).await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.find_user_where("email", email).await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.find_user_where("username", username).await
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        self.backend
            .all(&Statement::new(format!(
                "SELECT * FROM {USERS} ORDER BY created_at DESC"
            )))
            .await?
            .iter()
            .map(row_to_user)
            .collect()
    }

    async fn update_user(&self, guid: &str, update: &UserUpdate) -> Result<Option<User>> {
        validate_user_update(update)?;

        let mut assignments = Vec::new();
        let mut params: Vec<SqlValue> = Vec::new();
        if let Some(gender) = update.gender {
            assignments.push("gender = ?");
            params.push(gender.as_str().into());
        }
        if let Some(birth_year) = update.birth_year {
            assignments.push("birth_year = ?");
            params.push(birth_year.into());
        }
        if let Some(last_backup) = update.last_backup_timestamp {
            assignments.push("last_backup_timestamp = ?");
            params.push(last_backup.into());
        }
        assignments.push("updated_at = ?");
        params.push(Utc::now().into());
        params.push(guid.into());

        let result = self
            .backend
            .run(
                &Statement::new(format!(
                    "UPDATE {USERS} SET {} WHERE guid = ?",
                    assignments.join(", ")
                ))
                .bind_all(params),
            )
            .await?;
        if result.rows_affected == 0 {
            return Ok(None);
        }
        self.find_user_by_guid(guid).await
    }

    async fn create_or_update_user(&self, input: &NewUser) -> Result<User> {
        if let Some(guid) = &input.guid {
            let update = UserUpdate {
                gender: input.gender,
                birth_year: input.birth_year,
                last_backup_timestamp: input.last_backup_timestamp,
            };
            if let Some(user) = self.update_user(guid, &update).await? {
                return Ok(user);
            }
        }
        self.create_user(input).await
    }

    async fn delete_user(&self, id: &str) -> Result<bool> {
        let result = self
            .backend
            .run(&Statement::new(format!("DELETE FROM {USERS} WHERE id = ?")).bind(id))
            .await?;
        Ok(result.rows_affected > 0)
    }
}
