// src/quota.rs
//! Persistent per-user, per-ISO-week ledger of discovered jobs.
//!
//! The ledger is the source of truth for weekly capacity. Commits are
//! atomic increment-with-ceiling updates, never read-then-write, so two
//! overlapping runs cannot lose an update. Deleting a run flags its
//! contributions for audit but never hands the quota back: discovery
//! already happened, the slot was spent.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WeeklyQuotaRecord {
    pub id: i64,
    pub user_id: String,
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub plan_tier: String,
    pub weekly_limit: i64,
    pub used: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyCapacity {
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub limit: i64,
    pub used: i64,
    pub remaining: i64,
    pub limit_reached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub success: bool,
    pub jobs_added: i64,
    pub total_this_week: i64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct QuotaContribution {
    pub run_id: String,
    pub search_name: String,
    pub jobs_added: i64,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// Compute the current ISO week bounds (Monday 00:00:00 through Sunday
/// 23:59:59, UTC). Always computed server-side, never caller-supplied.
pub fn week_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let week = now.date_naive().week(Weekday::Mon);
    let start = week
        .first_day()
        .and_hms_opt(0, 0, 0)
        .expect("valid midnight")
        .and_utc();
    let end = week
        .last_day()
        .and_hms_opt(23, 59, 59)
        .expect("valid end of day")
        .and_utc();
    (start, end)
}

pub struct QuotaLedger<'a> {
    pool: &'a SqlitePool,
}

impl<'a> QuotaLedger<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Remaining capacity for the current week, lazily creating the
    /// week's record on first use.
    ///
    /// `used` counts every contribution ever committed this week,
    /// including ones whose run was later deleted — deletion marks the
    /// contribution for audit but the spend is preserved.
    pub async fn capacity(
        &self,
        user_id: &str,
        plan_tier: &str,
        weekly_limit: i64,
    ) -> Result<WeeklyCapacity> {
        let record = self
            .ensure_week_record(user_id, plan_tier, weekly_limit)
            .await?;

        let remaining = (record.weekly_limit - record.used).max(0);
        Ok(WeeklyCapacity {
            week_start: record.week_start,
            week_end: record.week_end,
            limit: record.weekly_limit,
            used: record.used,
            remaining,
            limit_reached: record.used >= record.weekly_limit,
        })
    }

    /// Atomically credit `count` discovered jobs to this week's ledger.
    ///
    /// All-or-nothing: if the increment would cross the weekly limit the
    /// update matches zero rows and the commit is rejected in full.
    pub async fn commit(
        &self,
        user_id: &str,
        run_id: &str,
        count: i64,
        search_name: &str,
    ) -> Result<CommitOutcome> {
        if count <= 0 {
            let record = self.current_week_record(user_id).await?;
            return Ok(CommitOutcome {
                success: true,
                jobs_added: 0,
                total_this_week: record.map(|r| r.used).unwrap_or(0),
                reason: None,
            });
        }

        let record = self
            .current_week_record(user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No quota record for user {} this week", user_id))?;

        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE weekly_quota
            SET used = used + ?, updated_at = ?
            WHERE id = ? AND used + ? <= weekly_limit
            "#,
        )
        .bind(count)
        .bind(now)
        .bind(record.id)
        .bind(count)
        .execute(self.pool)
        .await
        .context("Failed to commit quota increment")?;

        if result.rows_affected() == 0 {
            let current = self
                .current_week_record(user_id)
                .await?
                .map(|r| r.used)
                .unwrap_or(record.used);
            warn!(
                "Quota commit rejected for user {}: {} requested, {} of {} used",
                user_id, count, current, record.weekly_limit
            );
            return Ok(CommitOutcome {
                success: false,
                jobs_added: 0,
                total_this_week: current,
                reason: Some(format!(
                    "Committing {} jobs would exceed the weekly limit of {} ({} already used)",
                    count, record.weekly_limit, current
                )),
            });
        }

        sqlx::query(
            r#"
            INSERT INTO weekly_quota_contributions
                (quota_id, run_id, search_name, jobs_added, deleted, created_at)
            VALUES (?, ?, ?, ?, FALSE, ?)
            "#,
        )
        .bind(record.id)
        .bind(run_id)
        .bind(search_name)
        .bind(count)
        .bind(now)
        .execute(self.pool)
        .await
        .context("Failed to record quota contribution")?;

        info!(
            "Committed {} jobs to weekly quota for user {} (run {})",
            count, user_id, run_id
        );

        Ok(CommitOutcome {
            success: true,
            jobs_added: count,
            total_this_week: record.used + count,
            reason: None,
        })
    }

    /// Flag a run's contributions as deleted without changing the
    /// running total.
    pub async fn mark_run_deleted(&self, user_id: &str, run_id: &str) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE weekly_quota_contributions
            SET deleted = TRUE
            WHERE run_id = ?
              AND quota_id IN (SELECT id FROM weekly_quota WHERE user_id = ?)
            "#,
        )
        .bind(run_id)
        .bind(user_id)
        .execute(self.pool)
        .await
        .context("Failed to flag quota contributions as deleted")?;

        info!(
            "Flagged {} quota contribution(s) of run {} as deleted",
            result.rows_affected(),
            run_id
        );
        Ok(result.rows_affected())
    }

    /// Contributions recorded against the current week, newest last.
    pub async fn contributions(&self, user_id: &str) -> Result<Vec<QuotaContribution>> {
        let (week_start, _) = week_bounds(Utc::now());
        let rows = sqlx::query_as::<_, QuotaContribution>(
            r#"
            SELECT c.run_id, c.search_name, c.jobs_added, c.deleted, c.created_at
            FROM weekly_quota_contributions c
            JOIN weekly_quota q ON q.id = c.quota_id
            WHERE q.user_id = ? AND q.week_start = ?
            ORDER BY c.id ASC
            "#,
        )
        .bind(user_id)
        .bind(week_start)
        .fetch_all(self.pool)
        .await?;

        Ok(rows)
    }

    async fn current_week_record(&self, user_id: &str) -> Result<Option<WeeklyQuotaRecord>> {
        let (week_start, _) = week_bounds(Utc::now());
        let record = sqlx::query_as::<_, WeeklyQuotaRecord>(
            r#"
            SELECT id, user_id, week_start, week_end, plan_tier, weekly_limit, used
            FROM weekly_quota
            WHERE user_id = ? AND week_start = ?
            "#,
        )
        .bind(user_id)
        .bind(week_start)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    async fn ensure_week_record(
        &self,
        user_id: &str,
        plan_tier: &str,
        weekly_limit: i64,
    ) -> Result<WeeklyQuotaRecord> {
        let (week_start, week_end) = week_bounds(Utc::now());
        let now = Utc::now();

        // INSERT OR IGNORE keeps the (user, week) record unique even when
        // two capacity checks race on first use.
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO weekly_quota
                (user_id, week_start, week_end, plan_tier, weekly_limit, used, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 0, ?, ?)
            "#,
        )
        .bind(user_id)
        .bind(week_start)
        .bind(week_end)
        .bind(plan_tier)
        .bind(weekly_limit)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await
        .context("Failed to create weekly quota record")?;

        self.current_week_record(user_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Weekly quota record missing after creation"))
    }
}
