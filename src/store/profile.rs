// src/store/profile.rs
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Plan tier and per-feature limits for one user. Billing itself is an
/// external collaborator; this is the read-only capability the pipeline
/// consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanLimits {
    pub tier: String,
    pub weekly_job_limit: i64,
    pub max_locations: usize,
}

#[async_trait]
pub trait SubscriptionLookup: Send + Sync {
    async fn get_plan(&self, user_id: &str) -> Result<PlanLimits>;
}

/// Fixed-plan lookup for deployments without a billing backend and for
/// tests.
pub struct FixedPlanLookup {
    pub limits: PlanLimits,
}

impl FixedPlanLookup {
    pub fn new(tier: &str, weekly_job_limit: i64, max_locations: usize) -> Self {
        Self {
            limits: PlanLimits {
                tier: tier.to_string(),
                weekly_job_limit,
                max_locations,
            },
        }
    }
}

#[async_trait]
impl SubscriptionLookup for FixedPlanLookup {
    async fn get_plan(&self, _user_id: &str) -> Result<PlanLimits> {
        Ok(self.limits.clone())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperienceEntry {
    pub title: String,
    pub company: String,
}

/// Parsed resume data, read-only. Used by the Plan phase only when the
/// caller supplied no explicit job titles.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResumeProfile {
    pub parsed_skills: Vec<String>,
    pub parsed_experience: Vec<ExperienceEntry>,
}

impl ResumeProfile {
    /// Up to three distinct titles from the most recent experience
    /// entries.
    pub fn derived_titles(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.parsed_experience
            .iter()
            .map(|e| e.title.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
            .take(3)
            .collect()
    }
}

#[async_trait]
pub trait ResumeStore: Send + Sync {
    async fn get(&self, resume_id: &str) -> Result<ResumeProfile>;
}

/// In-memory resume store for tests and standalone deployments.
#[derive(Default)]
pub struct StaticResumeStore {
    profiles: std::collections::HashMap<String, ResumeProfile>,
}

impl StaticResumeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, resume_id: &str, profile: ResumeProfile) {
        self.profiles.insert(resume_id.to_string(), profile);
    }
}

#[async_trait]
impl ResumeStore for StaticResumeStore {
    async fn get(&self, resume_id: &str) -> Result<ResumeProfile> {
        self.profiles
            .get(resume_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Resume not found: {}", resume_id))
    }
}
