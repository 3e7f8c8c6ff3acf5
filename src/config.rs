// src/config.rs
//! Unified configuration management - all settings resolve from the
//! environment in one place

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub environment: EnvironmentConfig,
    pub provider: ProviderConfig,
    pub analysis: AnalysisConfig,
    pub plan: PlanConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub database_path: PathBuf,
}

/// External job-listing provider settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_seconds: u64,
    pub soft_daily_call_limit: u64,
}

/// Structured-extraction service settings.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
}

/// Default plan limits applied when no billing backend is wired in.
#[derive(Debug, Clone)]
pub struct PlanConfig {
    pub tier: String,
    pub weekly_job_limit: i64,
    pub max_locations: usize,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval_seconds: u64,
}

impl ConfigManager {
    /// Load all configurations
    pub fn load() -> Result<Self> {
        let environment = Self::load_environment()?;
        let provider = Self::load_provider()?;
        let analysis = Self::load_analysis();
        let plan = Self::load_plan()?;
        let scheduler = Self::load_scheduler()?;

        Ok(Self {
            environment,
            provider,
            analysis,
            plan,
            scheduler,
        })
    }

    fn load_environment() -> Result<EnvironmentConfig> {
        let env = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "local".to_string());
        info!("Loading environment configuration for: {}", env);

        let base_dir = if env == "production" {
            PathBuf::from("/app")
        } else {
            std::env::current_dir().context("Failed to get current directory")?
        };

        Ok(EnvironmentConfig {
            database_path: base_dir.join("job_discovery.db"),
        })
    }

    fn load_provider() -> Result<ProviderConfig> {
        let base_url = std::env::var("JOB_PROVIDER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:5555".to_string());
        let api_key = std::env::var("JOB_PROVIDER_API_KEY")
            .context("JOB_PROVIDER_API_KEY environment variable not set")?;
        let soft_daily_call_limit = std::env::var("PROVIDER_SOFT_DAILY_LIMIT")
            .unwrap_or_else(|_| "500".to_string())
            .parse::<u64>()
            .context("PROVIDER_SOFT_DAILY_LIMIT must be a number")?;

        Ok(ProviderConfig {
            base_url,
            api_key,
            timeout_seconds: 30,
            soft_daily_call_limit,
        })
    }

    fn load_analysis() -> AnalysisConfig {
        let base_url = std::env::var("ANALYSIS_SERVICE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:5556".to_string());
        let api_key = std::env::var("ANALYSIS_SERVICE_API_KEY").ok();

        AnalysisConfig {
            base_url,
            api_key,
            timeout_seconds: 60,
        }
    }

    fn load_plan() -> Result<PlanConfig> {
        let tier = std::env::var("DEFAULT_PLAN_TIER").unwrap_or_else(|_| "standard".to_string());
        let weekly_job_limit = std::env::var("DEFAULT_WEEKLY_JOB_LIMIT")
            .unwrap_or_else(|_| "50".to_string())
            .parse::<i64>()
            .context("DEFAULT_WEEKLY_JOB_LIMIT must be a number")?;
        let max_locations = std::env::var("DEFAULT_MAX_LOCATIONS")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<usize>()
            .context("DEFAULT_MAX_LOCATIONS must be a number")?;

        Ok(PlanConfig {
            tier,
            weekly_job_limit,
            max_locations,
        })
    }

    fn load_scheduler() -> Result<SchedulerConfig> {
        let tick_interval_seconds = std::env::var("SCHEDULER_TICK_SECONDS")
            .unwrap_or_else(|_| "300".to_string())
            .parse::<u64>()
            .context("SCHEDULER_TICK_SECONDS must be a number")?;

        Ok(SchedulerConfig {
            tick_interval_seconds,
        })
    }
}
