use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use goutdiary_core::diary::{
    decide, validate_new_reading, write_stamp, NewReading, Reading, ReadingStats, SyncDecision,
};
use goutdiary_core::sql::schema::READINGS;
use goutdiary_core::sql::{insert_sql, update_sql, OnConflict, SqlValue, Statement};
use goutdiary_core::storage::{window_start, ListOptions, ReadingRepository, Result};

use super::conversions::row_to_reading;
use super::{contended, new_id, user_listing, SqlRepository, SYNC_ATTEMPTS};
use crate::storage::backend::{finish, Executor};
use crate::storage::error::for_entity;

const ENTITY: &str = "Reading";

/// Columns written from a [`NewReading`], in bind order.
const FIELDS: &[&str] = &[
    "timestamp",
    "value",
    "normal",
    "much_meat",
    "much_sport",
    "much_sugar",
    "much_alcohol",
    "fasten",
    "gout_attack",
    "notes",
    "updated_at",
];

fn field_values(input: &NewReading, updated_at: DateTime<Utc>) -> Vec<SqlValue> {
    vec![
        input.timestamp.into(),
        input.value.into(),
        input.normal.into(),
        input.much_meat.into(),
        input.much_sport.into(),
        input.much_sugar.into(),
        input.much_alcohol.into(),
        input.fasten.into(),
        input.gout_attack.into(),
        input.notes.clone().into(),
        updated_at.into(),
    ]
}

async fn fetch<E: Executor + ?Sized>(executor: &E, id: &str) -> Result<Option<Reading>> {
    let row = executor
        .get(&Statement::new(format!("SELECT * FROM {READINGS} WHERE id = ?")).bind(id))
        .await?;
    row.as_ref().map(row_to_reading).transpose()
}

async fn insert<E: Executor + ?Sized>(executor: &E, id: &str, input: &NewReading) -> Result<bool> {
    let now = Utc::now();
    let mut columns = vec!["id", "user_id", "created_at"];
    columns.extend_from_slice(FIELDS);

    let sql = insert_sql(READINGS, &columns, OnConflict::DoNothingOn(&["id"]));
    let statement = Statement::new(sql)
        .bind(id)
        .bind(input.user_id.as_str())
        .bind(now)
        .bind_all(field_values(input, write_stamp(input.updated_at, now)));

    Ok(executor.run(&statement).await?.rows_affected > 0)
}

/// Rewrites every field but the owner and `created_at`.
async fn overwrite<E: Executor + ?Sized>(executor: &E, id: &str, input: &NewReading) -> Result<u64> {
    let statement = Statement::new(update_sql(READINGS, FIELDS, "id"))
        .bind_all(field_values(input, write_stamp(input.updated_at, Utc::now())))
        .bind(id);

    Ok(executor.run(&statement).await?.rows_affected)
}

/// One create-or-replace attempt. `None` means a concurrent insert of the
/// same id got in first.
async fn sync<E: Executor + ?Sized>(
    executor: &E,
    id: &str,
    input: &NewReading,
) -> Result<Option<Reading>> {
    let existing = fetch(executor, id).await?;

    match decide(existing.as_ref(), input.updated_at) {
        SyncDecision::Insert => {
            if !insert(executor, id, input).await? {
                return Ok(None);
            }
        }
        SyncDecision::KeepExisting => {
            debug!(id, "Stored reading is newer, keeping it");
            return Ok(existing);
        }
        SyncDecision::Replace => {
            overwrite(executor, id, input).await?;
        }
    }

    fetch(executor, id).await
}

// ============================================================================
// ReadingRepository Implementation
// ============================================================================

#[async_trait]
impl ReadingRepository for SqlRepository {
    async fn create_reading(&self, input: &NewReading) -> Result<Reading> {
        validate_new_reading(input)?;
        let id = input.id.clone().unwrap_or_else(new_id);

        for _ in 0..SYNC_ATTEMPTS {
            let tx = self.backend.begin().await?;
            let outcome = sync(&*tx, &id, input).await;
            let synced = finish(tx, outcome)
                .await
                .map_err(|e| for_entity(e, ENTITY, &id))?;
            if let Some(reading) = synced {
                return Ok(reading);
            }
            debug!(id = %id, "Concurrent insert won, retrying");
        }

        Err(contended(ENTITY, &id))
    }

    async fn find_reading_by_id(&self, id: &str) -> Result<Option<Reading>> {
        fetch(self.backend(), id).await
    }

    async fn find_readings_by_user(
        &self,
        user_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<Reading>> {
        let statement = user_listing(
            &format!("SELECT * FROM {READINGS}"),
            user_id,
            "timestamp",
            "timestamp DESC",
            options,
            self.backend.dialect(),
        )?;

        self.backend
            .all(&statement)
            .await?
            .iter()
            .map(row_to_reading)
            .collect()
    }

    async fn update_reading(&self, id: &str, input: &NewReading) -> Result<Option<Reading>> {
        validate_new_reading(input)?;

        let updated = overwrite(self.backend(), id, input)
            .await
            .map_err(|e| for_entity(e, ENTITY, id))?;
        if updated == 0 {
            return Ok(None);
        }
        fetch(self.backend(), id).await
    }

    async fn delete_reading(&self, id: &str) -> Result<bool> {
        let result = self
            .backend
            .run(&Statement::new(format!("DELETE FROM {READINGS} WHERE id = ?")).bind(id))
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn delete_readings_by_user(&self, user_id: &str) -> Result<u64> {
        let result = self
            .backend
            .run(&Statement::new(format!("DELETE FROM {READINGS} WHERE user_id = ?")).bind(user_id))
            .await?;
        Ok(result.rows_affected)
    }

    async fn reading_stats(&self, user_id: &str, days: u32) -> Result<ReadingStats> {
        let statement = Statement::new(format!(
            "SELECT COUNT(*) AS count, \
             CAST(AVG(value) AS DOUBLE PRECISION) AS average, \
             CAST(MIN(value) AS DOUBLE PRECISION) AS min_value, \
             CAST(MAX(value) AS DOUBLE PRECISION) AS max_value, \
             SUM(CASE WHEN gout_attack = ? THEN 1 ELSE 0 END) AS gout_attacks \
             FROM {READINGS} WHERE user_id = ? AND timestamp >= ?"
        ))
        .bind(true)
        .bind(user_id)
        .bind(window_start(Utc::now(), days));

        let Some(row) = self.backend.get(&statement).await? else {
            return Ok(ReadingStats::default());
        };

        Ok(ReadingStats::from_aggregates(
            row.int("count")?,
            row.opt_real("average")?,
            row.opt_real("min_value")?,
            row.opt_real("max_value")?,
            row.opt_int("gout_attacks")?,
        ))
    }

    async fn last_reading_timestamp(&self, user_id: &str) -> Result<Option<DateTime<Utc>>> {
        let row = self
            .backend
            .get(
                &Statement::new(format!(
                    "SELECT timestamp FROM {READINGS} WHERE user_id = ? \
                     ORDER BY timestamp DESC LIMIT 1"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::repository::test_support::{repository, user};
    use crate::storage::schema::ensure_schema;
    use chrono::{Duration, TimeZone};
    use goutdiary_core::storage::RepositoryError;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_create_generates_id() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;

        let reading = repo
            .create_reading(&NewReading::new(&owner.id, at(7), 6.2))
            .await
            .unwrap();

        assert!(!reading.id.is_empty());
        assert_eq!(reading.value, 6.2);
        assert!(reading.created_at.is_some());
        assert!(reading.updated_at.is_some());
        let found = repo.find_reading_by_id(&reading.id).await.unwrap();
        assert_eq!(found, Some(reading));
    }

    #[tokio::test]
    async fn test_newer_upload_wins_and_older_is_ignored() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;
        let first = NewReading::new(&owner.id, at(7), 5.5)
            .with_id("r-1")
            .with_updated_at(at(8));
        let newer = NewReading::new(&owner.id, at(7), 6.2)
            .with_id("r-1")
            .with_updated_at(at(9));
        let stale = NewReading::new(&owner.id, at(7), 4.0)
            .with_id("r-1")
            .with_updated_at(at(8));

        repo.create_reading(&first).await.unwrap();
        let replaced = repo.create_reading(&newer).await.unwrap();
        let kept = repo.create_reading(&stale).await.unwrap();

        assert_eq!(replaced.value, 6.2);
        assert_eq!(kept.value, 6.2);
        assert_eq!(kept.updated_at, Some(at(9)));
        let all = repo
            .find_readings_by_user(&owner.id, &ListOptions::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_is_idempotent() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;
        let mut upload = NewReading::new(&owner.id, at(7), 5.5)
            .with_id("r-1")
            .with_updated_at(at(8));
        upload.gout_attack = true;

        let first = repo.create_reading(&upload).await.unwrap();
        let second = repo.create_reading(&upload).await.unwrap();

        assert_eq!(first, second);
        assert!(second.gout_attack);
    }

    #[tokio::test]
    async fn test_out_of_range_value_rejected() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;

        let result = repo
            .create_reading(&NewReading::new(&owner.id, at(7), 25.0))
            .await;

        assert!(matches!(result, Err(RepositoryError::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_unknown_owner_is_constraint_violation() {
        let repo = repository().await;

        let result = repo
            .create_reading(&NewReading::new("nobody", at(7), 5.0).with_id("r-x"))
            .await;

        assert!(matches!(
            result,
            Err(RepositoryError::ConstraintViolation { entity_type: "Reading", .. })
        ));
    }

    #[tokio::test]
    async fn test_listing_newest_first_with_window_and_paging() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;
        for hour in [6, 8, 10, 12] {
            repo.create_reading(&NewReading::new(&owner.id, at(hour), 5.0))
                .await
                .unwrap();
        }

        let window = ListOptions::new().since(at(8)).until(at(12));
        let in_window = repo.find_readings_by_user(&owner.id, &window).await.unwrap();
        let page = repo
            .find_readings_by_user(&owner.id, &ListOptions::new().limit(2).offset(1))
            .await
            .unwrap();

        let times: Vec<_> = in_window.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![at(12), at(10), at(8)]);
        let times: Vec<_> = page.iter().map(|r| r.timestamp).collect();
        assert_eq!(times, vec![at(10), at(8)]);
    }

    #[tokio::test]
    async fn test_update_overwrites_unconditionally() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;
        let created = repo
            .create_reading(
                &NewReading::new(&owner.id, at(7), 5.0)
                    .with_id("r-1")
                    .with_updated_at(at(9)),
            )
            .await
            .unwrap();

        let older = NewReading::new(&owner.id, at(7), 7.0).with_updated_at(at(8));
        let updated = repo.update_reading("r-1", &older).await.unwrap().unwrap();
        let missing = repo.update_reading("r-404", &older).await.unwrap();

        assert_eq!(updated.value, 7.0);
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_stats_over_trailing_window() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;
        let now = Utc::now();
        let samples = [(1, 5.0, false), (2, 6.0, true), (3, 7.25, false), (40, 9.0, true)];
        for (days_ago, value, attack) in samples {
            let mut reading = NewReading::new(&owner.id, now - Duration::days(days_ago), value);
            reading.gout_attack = attack;
            repo.create_reading(&reading).await.unwrap();
        }

        let stats = repo.reading_stats(&owner.id, 30).await.unwrap();
        let empty = repo.reading_stats("nobody", 30).await.unwrap();

        assert_eq!(stats.count, 3);
        assert_eq!(stats.average, 6.08);
        assert_eq!(stats.min, 5.0);
        assert_eq!(stats.max, 7.25);
        assert_eq!(stats.gout_attacks, 1);
        assert_eq!(empty, ReadingStats::default());
    }

    #[tokio::test]
    async fn test_last_timestamp_and_deletes() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;
        assert_eq!(repo.last_reading_timestamp(&owner.id).await.unwrap(), None);
        for hour in [6, 9] {
            let reading = NewReading::new(&owner.id, at(hour), 5.0).with_id(format!("r-{hour}"));
            repo.create_reading(&reading).await.unwrap();
        }

        assert_eq!(repo.last_reading_timestamp(&owner.id).await.unwrap(), Some(at(9)));
        assert!(repo.delete_reading("r-9").await.unwrap());
        assert!(!repo.delete_reading("r-9").await.unwrap());
        assert_eq!(repo.delete_readings_by_user(&owner.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_legacy_timestamp_rows_in_windows_and_order() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;
        repo.create_reading(&NewReading::new(&owner.id, at(9), 5.0).with_id("r-new"))
            .await
            .unwrap();
        repo.backend()
            .run(
                &Statement::new(format!(
                    "INSERT INTO {READINGS} (id, user_id, timestamp, value) VALUES (?, ?, ?, ?)"
                ))
                .bind("r-legacy")
                .bind(owner.id.as_str())
                .bind("2024-05-01 10:00:00")
                .bind(6.0),
            )
            .await
            .unwrap();

        ensure_schema(repo.backend()).await.unwrap();

        let window = ListOptions::new().since(at(8));
        let listed = repo.find_readings_by_user(&owner.id, &window).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r-legacy", "r-new"]);
        assert_eq!(repo.last_reading_timestamp(&owner.id).await.unwrap(), Some(at(10)));
    }

    #[tokio::test]
    async fn test_stats_with_unbounded_window() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;
        repo.create_reading(&NewReading::new(&owner.id, at(9), 5.0))
            .await
            .unwrap();

        let stats = repo.reading_stats(&owner.id, u32::MAX).await.unwrap();

        assert_eq!(stats.count, 1);
        assert_eq!(stats.average, 5.0);
    }

    #[tokio::test]
    async fn test_replace_keeps_original_owner() {
        let repo = repository().await;
        let alice = user(&repo, "guid-1").await;
        let bob = user(&repo, "guid-2").await;
        repo.create_reading(
            &NewReading::new(&alice.id, at(7), 5.0)
                .with_id("r-1")
                .with_updated_at(at(8)),
        )
        .await
        .unwrap();

        let replaced = repo
            .create_reading(
                &NewReading::new(&bob.id, at(7), 6.0)
                    .with_id("r-1")
                    .with_updated_at(at(9)),
            )
            .await
            .unwrap();

        assert_eq!(replaced.value, 6.0);
        assert_eq!(replaced.user_id, alice.id);
    }
}
