// src/provider/mod.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::types::DiscoveredPosting;

pub mod client;
pub mod query;

pub use client::HttpJobProvider;
pub use query::build_search_query;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSearchResult {
    pub postings: Vec<DiscoveredPosting>,
    pub total_available: u64,
}

/// Process-local accounting of provider calls. Best effort, not a source
/// of truth: exceeding the soft budget degrades this status, it never
/// blocks calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub calls_made: u64,
    pub soft_daily_limit: u64,
    pub degraded: bool,
}

/// Adapter seam to an external job-listing source.
#[async_trait]
pub trait JobProvider: Send + Sync {
    /// Run one search query. `limit` is capped by the adapter's own
    /// hard per-call cap regardless of what the caller asks for.
    async fn search(
        &self,
        query: &str,
        location: Option<&str>,
        limit: usize,
    ) -> Result<ProviderSearchResult, ProviderError>;

    /// Cheap reachability probe, called before the Discover phase.
    async fn health_check(&self) -> Result<(), ProviderError>;

    fn budget(&self) -> BudgetStatus;
}
