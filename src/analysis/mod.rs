// src/analysis/mod.rs
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::error::AnalysisError;
use crate::types::{AnalysisPath, DiscoveredPosting, StructuredAnalysis};

pub mod client;
pub mod fallback;

pub use client::HttpAnalysisClient;
pub use fallback::FallbackAnalyzer;

/// Primary structured-extraction seam. Implementations may fail; the
/// pipeline never retries them — failures route to the fallback.
#[async_trait]
pub trait AnalysisApi: Send + Sync {
    async fn analyze(
        &self,
        posting: &DiscoveredPosting,
    ) -> Result<StructuredAnalysis, AnalysisError>;
}

/// Two-step analysis pipeline: primary extraction, then the
/// deterministic fallback on any failure. Analysis itself can degrade
/// but never fail.
pub struct JobAnalyzer {
    primary: Arc<dyn AnalysisApi>,
    fallback: FallbackAnalyzer,
}

impl JobAnalyzer {
    pub fn new(primary: Arc<dyn AnalysisApi>) -> Self {
        Self {
            primary,
            fallback: FallbackAnalyzer::new(),
        }
    }

    /// Analyze one posting. Always returns a structurally valid
    /// document; the metadata records which path produced it.
    pub async fn analyze(&self, posting: &DiscoveredPosting) -> StructuredAnalysis {
        match self.primary.analyze(posting).await {
            Ok(analysis) => analysis.normalized(),
            Err(err) => {
                // Malformed LLM output tends to repeat, so there is no
                // primary retry: fall through immediately.
                warn!(
                    "Primary analysis failed for '{}' at {}: {} - using fallback",
                    posting.title, posting.company, err
                );
                self.fallback.analyze(&posting.description, &posting.title)
            }
        }
    }
}

/// Convenience check used by tests and the orchestrator's audit context.
pub fn used_fallback(analysis: &StructuredAnalysis) -> bool {
    analysis.metadata.path == AnalysisPath::Fallback
}
