// src/provider/client.rs
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::ProviderError;
use crate::provider::{BudgetStatus, JobProvider, ProviderSearchResult};
use crate::types::posting::{
    is_ats_url, normalize_work_arrangement, DiscoveredPosting, JobLocation, SourcePlatform,
    WorkArrangement,
};

/// Hard cap on results per provider call, independent of any
/// caller-requested limit.
const HARD_RESULT_CAP: usize = 25;

const TRANSIENT_RETRY_BACKOFF_MS: u64 = 1500;

/// Upstream posting shape with field aliases for the provider's
/// inconsistent naming.
#[derive(Debug, Deserialize)]
struct UpstreamPosting {
    #[serde(default, alias = "job_id")]
    id: String,
    #[serde(default, alias = "job_title")]
    title: String,
    #[serde(default, alias = "company_name", alias = "employer_name")]
    company: String,
    #[serde(default, alias = "job_location")]
    location: String,
    #[serde(default, alias = "job_url", alias = "apply_link")]
    url: String,
    #[serde(default, alias = "job_description")]
    description: String,
    #[serde(default, alias = "company_url")]
    employer_url: String,
    #[serde(default, alias = "job_is_remote")]
    is_remote: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct UpstreamSearchResponse {
    #[serde(default, alias = "results", alias = "data")]
    jobs: Vec<UpstreamPosting>,
    #[serde(default, alias = "total_count")]
    total: u64,
}

/// HTTP adapter to the external job-listing API.
pub struct HttpJobProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    calls_made: AtomicU64,
    soft_daily_limit: u64,
}

impl HttpJobProvider {
    pub fn new(
        base_url: &str,
        api_key: &str,
        soft_daily_limit: u64,
        timeout_seconds: u64,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            calls_made: AtomicU64::new(0),
            soft_daily_limit,
        })
    }

    fn record_call(&self) -> u64 {
        self.calls_made.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn search_once(
        &self,
        query: &str,
        location: Option<&str>,
        limit: usize,
    ) -> Result<ProviderSearchResult, ProviderError> {
        let calls = self.record_call();
        if calls > self.soft_daily_limit {
            warn!(
                "Provider call {} exceeds soft daily budget of {}",
                calls, self.soft_daily_limit
            );
        }

        let mut request = self
            .client
            .get(format!("{}/search", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .query(&[("query", query), ("limit", &limit.to_string())]);
        if let Some(location) = location {
            request = request.query(&[("location", location)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &body));
        }

        let parsed: UpstreamSearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Transient(format!("Malformed provider response: {}", e)))?;

        let postings = parsed
            .jobs
            .into_iter()
            .take(limit)
            .map(normalize_upstream)
            .collect();

        Ok(ProviderSearchResult {
            postings,
            total_available: parsed.total,
        })
    }
}

/// Map one upstream posting to the canonical shape.
fn normalize_upstream(raw: UpstreamPosting) -> DiscoveredPosting {
    let work_arrangement = match raw.is_remote {
        Some(true) => WorkArrangement::Remote,
        // Not explicitly flagged: infer from the free text.
        _ => {
            let inferred = normalize_work_arrangement(&raw.location);
            if inferred == WorkArrangement::Unknown {
                normalize_work_arrangement(&raw.description)
            } else {
                inferred
            }
        }
    };

    // Informational only, never gates persistence.
    let direct_employer = is_ats_url(&raw.url) || is_ats_url(&raw.employer_url);

    DiscoveredPosting {
        platform: SourcePlatform::classify(&raw.url),
        location: JobLocation::parse(&raw.location),
        title: raw.title.trim().to_string(),
        company: raw.company.trim().to_string(),
        location_raw: raw.location,
        source_url: raw.url,
        description: raw.description,
        provider_id: raw.id,
        work_arrangement,
        direct_employer,
    }
}

#[async_trait]
impl JobProvider for HttpJobProvider {
    async fn search(
        &self,
        query: &str,
        location: Option<&str>,
        limit: usize,
    ) -> Result<ProviderSearchResult, ProviderError> {
        let effective_limit = limit.min(HARD_RESULT_CAP).max(1);
        info!(
            "Provider search: query='{}' location={:?} limit={}",
            query, location, effective_limit
        );

        match self.search_once(query, location, effective_limit).await {
            Ok(result) => Ok(result),
            Err(err) if err.is_retryable() => {
                warn!("Transient provider failure, retrying once: {}", err);
                tokio::time::sleep(Duration::from_millis(TRANSIENT_RETRY_BACKOFF_MS)).await;
                self.search_once(query, location, effective_limit).await
            }
            Err(err) => Err(err),
        }
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("Health check failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::from_status(status.as_u16(), &body))
        }
    }

    fn budget(&self) -> BudgetStatus {
        let calls_made = self.calls_made.load(Ordering::Relaxed);
        BudgetStatus {
            calls_made,
            soft_daily_limit: self.soft_daily_limit,
            degraded: calls_made > self.soft_daily_limit,
        }
    }
}
