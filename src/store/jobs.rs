// src/store/jobs.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::info;

use crate::dedup::{normalize_part, title_prefix};
use crate::types::PersistedJob;

/// Persistence boundary for discovered-job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Save one job record, returning its id.
    async fn save(&self, job: &PersistedJob) -> Result<i64>;

    /// Does an active job for this user exist with the same company and
    /// a fuzzy-matching title (first three title tokens)?
    async fn exists_similar(&self, user_id: &str, title: &str, company: &str) -> Result<bool>;
}

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn save(&self, job: &PersistedJob) -> Result<i64> {
        let analysis_json =
            serde_json::to_string(&job.analysis).context("Failed to serialize analysis")?;
        let location_json = job
            .posting
            .location
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize location")?;
        let salary_json = job
            .salary
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("Failed to serialize salary")?;

        let result = sqlx::query(
            r#"
            INSERT INTO jobs
                (user_id, run_id, title, company, location_raw, location, source_url,
                 description, provider_id, platform, work_arrangement, direct_employer,
                 analysis, salary, discovery_method, used_fallback, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, TRUE, ?)
            "#,
        )
        .bind(&job.user_id)
        .bind(&job.run_id)
        .bind(&job.posting.title)
        .bind(&job.posting.company)
        .bind(&job.posting.location_raw)
        .bind(location_json)
        .bind(&job.posting.source_url)
        .bind(&job.posting.description)
        .bind(&job.posting.provider_id)
        .bind(job.posting.platform.as_str())
        .bind(job.posting.work_arrangement.as_str())
        .bind(job.posting.direct_employer)
        .bind(analysis_json)
        .bind(salary_json)
        .bind(&job.discovery_method)
        .bind(job.used_fallback_analysis)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert job record")?;

        let id = result.last_insert_rowid();
        info!(
            "Saved job '{}' at {} for user {} (id {})",
            job.posting.title, job.posting.company, job.user_id, id
        );
        Ok(id)
    }

    async fn exists_similar(&self, user_id: &str, title: &str, company: &str) -> Result<bool> {
        let prefix = title_prefix(title);
        if prefix.is_empty() {
            return Ok(false);
        }

        // LIKE wildcards in the prefix would widen the match.
        let escaped = prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let pattern = format!("{}%", escaped);

        let found: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 FROM jobs
            WHERE user_id = ?
              AND is_active = TRUE
              AND LOWER(TRIM(company)) = ?
              AND LOWER(title) LIKE ? ESCAPE '\'
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(normalize_part(company))
        .bind(pattern)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query similar jobs")?;

        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;
    use crate::types::analysis::{AnalysisPath, StructuredAnalysis};
    use crate::types::posting::{DiscoveredPosting, SourcePlatform, WorkArrangement};
    use chrono::Utc;

    fn job(user_id: &str, title: &str, company: &str) -> PersistedJob {
        PersistedJob {
            user_id: user_id.to_string(),
            run_id: "run-1".to_string(),
            posting: DiscoveredPosting {
                title: title.to_string(),
                company: company.to_string(),
                location_raw: "Remote".to_string(),
                location: None,
                source_url: "https://example.com/1".to_string(),
                description: "desc".to_string(),
                provider_id: "p-1".to_string(),
                platform: SourcePlatform::Other,
                work_arrangement: WorkArrangement::Remote,
                direct_employer: false,
            },
            analysis: StructuredAnalysis::empty(AnalysisPath::Fallback),
            salary: None,
            discovery_method: "weekly_search".to_string(),
            used_fallback_analysis: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_and_exists_similar() {
        let pool = test_pool().await;
        let store = SqliteJobStore::new(pool);

        let id = store
            .save(&job("u1", "Senior Data Engineer", "Acme"))
            .await
            .unwrap();
        assert!(id > 0);

        // Exact title and re-titled variant both match.
        assert!(store
            .exists_similar("u1", "Senior Data Engineer", "Acme")
            .await
            .unwrap());
        assert!(store
            .exists_similar("u1", "Senior Data Engineer (Remote)", "ACME")
            .await
            .unwrap());

        // Different company or user does not.
        assert!(!store
            .exists_similar("u1", "Senior Data Engineer", "Beta")
            .await
            .unwrap());
        assert!(!store
            .exists_similar("u2", "Senior Data Engineer", "Acme")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_exists_similar_handles_empty_title() {
        let pool = test_pool().await;
        let store = SqliteJobStore::new(pool);
        assert!(!store.exists_similar("u1", "   ", "Acme").await.unwrap());
    }
}
