// src/store/runs.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::types::run::{PhaseEvent, RunStatus, SearchRun, SearchTarget};

#[derive(Debug, sqlx::FromRow)]
struct SearchRunRow {
    id: String,
    user_id: String,
    resume_id: Option<String>,
    search_name: String,
    target: String,
    status: String,
    capacity_at_start: i64,
    jobs_found_this_run: i64,
    total_jobs_found: i64,
    status_message: String,
    next_run_at: Option<DateTime<Utc>>,
    audit_log: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SearchRunRow {
    fn into_run(self) -> Result<SearchRun> {
        let target: SearchTarget =
            serde_json::from_str(&self.target).context("Failed to parse run target")?;
        let audit_log: Vec<PhaseEvent> =
            serde_json::from_str(&self.audit_log).context("Failed to parse run audit log")?;
        let status = RunStatus::parse(&self.status)
            .ok_or_else(|| anyhow::anyhow!("Unknown run status: {}", self.status))?;

        Ok(SearchRun {
            id: self.id,
            user_id: self.user_id,
            resume_id: self.resume_id,
            search_name: self.search_name,
            target,
            status,
            capacity_at_start: self.capacity_at_start,
            jobs_found_this_run: self.jobs_found_this_run,
            total_jobs_found: self.total_jobs_found,
            status_message: self.status_message,
            next_run_at: self.next_run_at,
            audit_log,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const RUN_COLUMNS: &str = "id, user_id, resume_id, search_name, target, status, \
capacity_at_start, jobs_found_this_run, total_jobs_found, status_message, next_run_at, \
audit_log, created_at, updated_at";

pub struct SearchRunRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SearchRunRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, run: &SearchRun) -> Result<()> {
        let target = serde_json::to_string(&run.target).context("Failed to serialize target")?;
        let audit_log =
            serde_json::to_string(&run.audit_log).context("Failed to serialize audit log")?;

        sqlx::query(
            r#"
            INSERT INTO search_runs
                (id, user_id, resume_id, search_name, target, status, capacity_at_start,
                 jobs_found_this_run, total_jobs_found, status_message, next_run_at,
                 audit_log, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.id)
        .bind(&run.user_id)
        .bind(&run.resume_id)
        .bind(&run.search_name)
        .bind(target)
        .bind(run.status.as_str())
        .bind(run.capacity_at_start)
        .bind(run.jobs_found_this_run)
        .bind(run.total_jobs_found)
        .bind(&run.status_message)
        .bind(run.next_run_at)
        .bind(audit_log)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(self.pool)
        .await
        .context("Failed to insert search run")?;

        info!("Created search run {} for user {}", run.id, run.user_id);
        Ok(())
    }

    /// Full-row update, including status. For administrative writes
    /// where no executor is running; the phase loop itself uses
    /// `save_progress` and `transition` so a concurrent pause or cancel
    /// is never overwritten.
    pub async fn save(&self, run: &SearchRun) -> Result<()> {
        let target = serde_json::to_string(&run.target).context("Failed to serialize target")?;
        let audit_log =
            serde_json::to_string(&run.audit_log).context("Failed to serialize audit log")?;

        sqlx::query(
            r#"
            UPDATE search_runs
            SET target = ?, status = ?, capacity_at_start = ?, jobs_found_this_run = ?,
                total_jobs_found = ?, status_message = ?, next_run_at = ?, audit_log = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(target)
        .bind(run.status.as_str())
        .bind(run.capacity_at_start)
        .bind(run.jobs_found_this_run)
        .bind(run.total_jobs_found)
        .bind(&run.status_message)
        .bind(run.next_run_at)
        .bind(audit_log)
        .bind(Utc::now())
        .bind(&run.id)
        .execute(self.pool)
        .await
        .context("Failed to update search run")?;

        Ok(())
    }

    /// Persist execution progress without touching `status` or
    /// `status_message`, so a pause or cancel written concurrently
    /// survives the next phase-boundary save.
    pub async fn save_progress(&self, run: &SearchRun) -> Result<()> {
        let audit_log =
            serde_json::to_string(&run.audit_log).context("Failed to serialize audit log")?;

        sqlx::query(
            r#"
            UPDATE search_runs
            SET jobs_found_this_run = ?, total_jobs_found = ?, next_run_at = ?,
                audit_log = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(run.jobs_found_this_run)
        .bind(run.total_jobs_found)
        .bind(run.next_run_at)
        .bind(audit_log)
        .bind(Utc::now())
        .bind(&run.id)
        .execute(self.pool)
        .await
        .context("Failed to update search run progress")?;

        Ok(())
    }

    /// Compare-and-set status transition. Returns false when the run was
    /// no longer in `expected` status, e.g. after a concurrent pause or
    /// cancel. `message` replaces the status message only when given.
    pub async fn transition(
        &self,
        run_id: &str,
        next: RunStatus,
        expected: RunStatus,
        message: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE search_runs
            SET status = ?, status_message = COALESCE(?, status_message), updated_at = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(next.as_str())
        .bind(message)
        .bind(Utc::now())
        .bind(run_id)
        .bind(expected.as_str())
        .execute(self.pool)
        .await
        .context("Failed to transition search run")?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal cancel: sets status and message and clears the schedule.
    /// Returns false when the run was already cancelled.
    pub async fn mark_cancelled(&self, run_id: &str, message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE search_runs
            SET status = 'cancelled', status_message = ?, next_run_at = NULL, updated_at = ?
            WHERE id = ? AND status != 'cancelled'
            "#,
        )
        .bind(message)
        .bind(Utc::now())
        .bind(run_id)
        .execute(self.pool)
        .await
        .context("Failed to cancel search run")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<SearchRun>> {
        let row = sqlx::query_as::<_, SearchRunRow>(&format!(
            "SELECT {} FROM search_runs WHERE id = ?",
            RUN_COLUMNS
        ))
        .bind(run_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(SearchRunRow::into_run).transpose()
    }

    /// Load a run only if it belongs to `user_id`.
    pub async fn get_owned(&self, user_id: &str, run_id: &str) -> Result<Option<SearchRun>> {
        let row = sqlx::query_as::<_, SearchRunRow>(&format!(
            "SELECT {} FROM search_runs WHERE id = ? AND user_id = ?",
            RUN_COLUMNS
        ))
        .bind(run_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(SearchRunRow::into_run).transpose()
    }

    /// Current status only; used for cooperative cancellation checks at
    /// phase boundaries.
    pub async fn get_status(&self, run_id: &str) -> Result<Option<RunStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM search_runs WHERE id = ?")
                .bind(run_id)
                .fetch_optional(self.pool)
                .await?;

        Ok(status.as_deref().and_then(RunStatus::parse))
    }

    /// Runs whose next scheduled trigger has arrived. Resumed runs sit
    /// in `running` until their trigger; completed runs are re-run on
    /// the weekly cadence via a successor.
    pub async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<SearchRun>> {
        let rows = sqlx::query_as::<_, SearchRunRow>(&format!(
            r#"
            SELECT {} FROM search_runs
            WHERE next_run_at IS NOT NULL
              AND next_run_at <= ?
              AND status IN ('running', 'completed')
            ORDER BY next_run_at ASC
            "#,
            RUN_COLUMNS
        ))
        .bind(now)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(SearchRunRow::into_run).collect()
    }

    pub async fn list_by_status(&self, user_id: &str, status: RunStatus) -> Result<Vec<SearchRun>> {
        let rows = sqlx::query_as::<_, SearchRunRow>(&format!(
            "SELECT {} FROM search_runs WHERE user_id = ? AND status = ? ORDER BY created_at DESC",
            RUN_COLUMNS
        ))
        .bind(user_id)
        .bind(status.as_str())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(SearchRunRow::into_run).collect()
    }
}
