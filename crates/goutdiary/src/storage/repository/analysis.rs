use async_trait::async_trait;
use chrono::Utc;

use goutdiary_core::diary::{validate_new_analysis, AnalysisResult, NewAnalysisResult};
use goutdiary_core::sql::schema::ANALYSIS_RESULTS;
use goutdiary_core::sql::{insert_sql, OnConflict, SqlValue, Statement};
use goutdiary_core::storage::{AnalysisRepository, ListOptions, RepositoryError, Result};

use super::conversions::row_to_analysis;
use super::{new_id, user_listing, SqlRepository};
use crate::storage::backend::Executor;
use crate::storage::error::for_entity;

const ENTITY: &str = "AnalysisResult";

const COLUMNS: &[&str] = &[
    "id",
    "user_id",
    "analysis_date",
    "data_period_start",
    "data_period_end",
    "insights",
    "recommendations",
    "confidence_score",
    "created_at",
];

/// JSON text for a payload column; JSON `null` is stored as SQL NULL.
fn json_text(value: &serde_json::Value) -> Result<SqlValue> {
    if value.is_null() {
        return Ok(None::<String>.into());
    }
    Ok(serde_json::to_string(value)?.into())
}

// ============================================================================
// AnalysisRepository Implementation
// ============================================================================

#[async_trait]
impl AnalysisRepository for SqlRepository {
    async fn create_analysis(&self, input: &NewAnalysisResult) -> Result<AnalysisResult> {
        validate_new_analysis(input)?;
        let id = input.id.clone().unwrap_or_else(new_id);

        let statement = Statement::new(insert_sql(ANALYSIS_RESULTS, COLUMNS, OnConflict::Fail))
            .bind(id.as_str())
            .bind(input.user_id.as_str())
            .bind(input.analysis_date)
            .bind(input.data_period_start)
            .bind(input.data_period_end)
            .bind(json_text(&input.insights)?)
            .bind(json_text(&input.recommendations)?)
            .bind(input.confidence_score)
            .bind(Utc::now());
        self.backend
            .run(&statement)
            .await
            .map_err(|e| for_entity(e, ENTITY, &id))?;

        self.find_analysis_by_id(&id)
            .await?
            .ok_or(RepositoryError::NotFound {
                entity_type: ENTITY,
                id,
            })
    }

    async fn find_analysis_by_id(&self, id: &str) -> Result<Option<AnalysisResult>> {
        let row = self
            .backend
            .get(&Statement::new(format!("SELECT * FROM {ANALYSIS_RESULTS} WHERE id = ?")).bind(id))
            .await?;
        row.as_ref().map(row_to_analysis).transpose()
    }

    async fn find_latest_analysis(&self, user_id: &str) -> Result<Option<AnalysisResult>> {
        let latest = self
            .find_analyses_by_user(user_id, &ListOptions::new().limit(1))
            .await?;
        Ok(latest.into_iter().next())
    }

    async fn find_analyses_by_user(
        &self,
        user_id: &str,
        options: &ListOptions,
    ) -> Result<Vec<AnalysisResult>> {
        let statement = user_listing(
            &format!("SELECT * FROM {ANALYSIS_RESULTS}"),
            user_id,
            "analysis_date",
            "analysis_date DESC",
            options,
            self.backend.dialect(),
        )?;

        self.backend
            .all(&statement)
            .await?
            .iter()
            .map(row_to_analysis)
            .collect()
    }

    async fn delete_analysis(&self, id: &str) -> Result<bool> {
        let result = self
            .backend
            .run(&Statement::new(format!("DELETE FROM {ANALYSIS_RESULTS} WHERE id = ?")).bind(id))
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn delete_analyses_by_user(&self, user_id: &str) -> Result<u64> {
        let result = self
            .backend
            .run(
                &Statement::new(format!("DELETE FROM {ANALYSIS_RESULTS} WHERE user_id = ?"))
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
    use chrono::{DateTime, TimeZone};
    use serde_json::json;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, 0, 0, 0).unwrap()
    }

    fn analysis(user_id: &str, date: DateTime<Utc>) -> NewAnalysisResult {
        NewAnalysisResult {
            id: None,
            user_id: user_id.to_string(),
            analysis_date: date,
            data_period_start: day(1),
            data_period_end: date,
            insights: json!({"trend": "falling"}),
            recommendations: json!(["drink more water", "less red meat"]),
            confidence_score: Some(0.75),
        }
    }

    #[tokio::test]
    async fn test_payloads_round_trip_as_json() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;

        let created = repo.create_analysis(&analysis(&owner.id, day(10))).await.unwrap();

        assert_eq!(created.insights, json!({"trend": "falling"}));
        assert_eq!(created.recommendations[1], "less red meat");
        assert_eq!(created.confidence_score, Some(0.75));
        assert!(created.created_at.is_some());
    }

    #[tokio::test]
    async fn test_latest_and_listing() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;
        for d in [5, 20, 12] {
            repo.create_analysis(&analysis(&owner.id, day(d))).await.unwrap();
        }

        let latest = repo.find_latest_analysis(&owner.id).await.unwrap().unwrap();
        let since = repo
            .find_analyses_by_user(&owner.id, &ListOptions::new().since(day(10)))
            .await
            .unwrap();

        assert_eq!(latest.analysis_date, day(20));
        let dates: Vec<_> = since.iter().map(|a| a.analysis_date).collect();
        assert_eq!(dates, vec![day(20), day(12)]);
        assert_eq!(repo.find_latest_analysis("nobody").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_confidence_rejected() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;
        let mut input = analysis(&owner.id, day(10));
        input.confidence_score = Some(1.5);

        let result = repo.create_analysis(&input).await;

        assert!(matches!(result, Err(RepositoryError::InvalidData(_))));
    }

    #[tokio::test]
    async fn test_deletes() {
        let repo = repository().await;
        let owner = user(&repo, "guid-1").await;
        let first = repo.create_analysis(&analysis(&owner.id, day(5))).await.unwrap();
        repo.create_analysis(&analysis(&owner.id, day(6))).await.unwrap();

        assert!(repo.delete_analysis(&first.id).await.unwrap());
        assert_eq!(repo.delete_analyses_by_user(&owner.id).await.unwrap(), 1);
        assert_eq!(repo.find_analysis_by_id(&first.id).await.unwrap(), None);
    }
}
