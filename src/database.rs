// src/database.rs
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug)]
pub struct DatabaseConfig {
    pub database_path: PathBuf,
    pub pool: Option<SqlitePool>,
}

impl DatabaseConfig {
    pub fn new(database_path: PathBuf) -> Self {
        Self {
            database_path,
            pool: None,
        }
    }

    /// Initialize the database connection pool
    pub async fn init_pool(&mut self) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.database_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let database_url = format!("sqlite:{}?mode=rwc", self.database_path.display());

        let pool = SqlitePool::connect(&database_url)
            .await
            .context("Failed to connect to SQLite database")?;
        self.pool = Some(pool);

        info!("Database connection pool initialized: {}", database_url);
        Ok(())
    }

    /// Get the database pool
    pub fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Database pool not initialized. Call init_pool() first."))
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<()> {
        let pool = self.pool()?;
        run_migrations(pool).await
    }
}

/// Create the pipeline tables. Safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_runs (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            resume_id TEXT,
            search_name TEXT NOT NULL,
            target TEXT NOT NULL,
            status TEXT NOT NULL,
            capacity_at_start INTEGER NOT NULL DEFAULT 0,
            jobs_found_this_run INTEGER NOT NULL DEFAULT 0,
            total_jobs_found INTEGER NOT NULL DEFAULT 0,
            status_message TEXT NOT NULL DEFAULT '',
            next_run_at TEXT,
            audit_log TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_search_runs_user_status
        ON search_runs(user_id, status);
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weekly_quota (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            week_start TEXT NOT NULL,
            week_end TEXT NOT NULL,
            plan_tier TEXT NOT NULL DEFAULT 'free',
            weekly_limit INTEGER NOT NULL,
            used INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(user_id, week_start)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weekly_quota_contributions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            quota_id INTEGER NOT NULL REFERENCES weekly_quota(id),
            run_id TEXT NOT NULL,
            search_name TEXT NOT NULL DEFAULT '',
            jobs_added INTEGER NOT NULL,
            deleted BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_quota_contributions_run
        ON weekly_quota_contributions(run_id);
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            title TEXT NOT NULL,
            company TEXT NOT NULL,
            location_raw TEXT NOT NULL DEFAULT '',
            location TEXT,
            source_url TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            provider_id TEXT NOT NULL,
            platform TEXT NOT NULL DEFAULT 'other',
            work_arrangement TEXT NOT NULL DEFAULT 'unknown',
            direct_employer BOOLEAN NOT NULL DEFAULT FALSE,
            analysis TEXT NOT NULL,
            salary TEXT,
            discovery_method TEXT NOT NULL DEFAULT 'weekly_search',
            used_fallback BOOLEAN NOT NULL DEFAULT FALSE,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_jobs_user_active
        ON jobs(user_id, is_active);
        "#,
    )
    .execute(pool)
    .await?;

    info!("Database migrations completed successfully");
    Ok(())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    run_migrations(&pool).await.expect("migrations");
    pool
}
