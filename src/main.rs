// src/main.rs
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use job_discovery::analysis::{HttpAnalysisClient, JobAnalyzer};
use job_discovery::config::ConfigManager;
use job_discovery::database::DatabaseConfig;
use job_discovery::orchestrator::SearchOrchestrator;
use job_discovery::provider::HttpJobProvider;
use job_discovery::store::{FixedPlanLookup, SqliteJobStore, StaticResumeStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ConfigManager::load()?;
    info!(
        "Starting job discovery pipeline (database: {})",
        config.environment.database_path.display()
    );

    let mut database = DatabaseConfig::new(config.environment.database_path.clone());
    database.init_pool().await?;
    database.migrate().await?;
    let pool = database.pool()?.clone();

    let provider = Arc::new(HttpJobProvider::new(
        &config.provider.base_url,
        &config.provider.api_key,
        config.provider.soft_daily_call_limit,
        config.provider.timeout_seconds,
    )?);
    let analysis_client = Arc::new(HttpAnalysisClient::new(
        &config.analysis.base_url,
        config.analysis.api_key.as_deref().unwrap_or(""),
        config.analysis.timeout_seconds,
    )?);
    let analyzer = Arc::new(JobAnalyzer::new(analysis_client));
    let jobs = Arc::new(SqliteJobStore::new(pool.clone()));
    let plans = Arc::new(FixedPlanLookup::new(
        &config.plan.tier,
        config.plan.weekly_job_limit,
        config.plan.max_locations,
    ));
    let resumes = Arc::new(StaticResumeStore::new());

    let orchestrator = SearchOrchestrator::new(pool, provider, analyzer, jobs, plans, resumes);

    info!(
        "Scheduler running, checking for due searches every {}s",
        config.scheduler.tick_interval_seconds
    );
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(
        config.scheduler.tick_interval_seconds,
    ));
    loop {
        tick.tick().await;
        match orchestrator.run_due_searches(chrono::Utc::now()).await {
            Ok(0) => {}
            Ok(executed) => info!("Scheduler tick executed {} due search(es)", executed),
            Err(e) => error!("Scheduler tick failed: {:#}", e),
        }
    }
}
