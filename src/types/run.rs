// src/types/run.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::types::posting::{ExperienceLevel, WorkArrangement};

pub const MAX_JOB_TITLES: usize = 10;
pub const MIN_TITLE_LEN: usize = 2;
pub const MAX_TITLE_LEN: usize = 100;

/// Lifecycle status of a search run.
///
/// Transitions are monotonic except pause/resume; completed, failed and
/// cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Planned,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Planned => "planned",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "planned" => Some(RunStatus::Planned),
            "running" => Some(RunStatus::Running),
            "paused" => Some(RunStatus::Paused),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (Planned, Running) | (Planned, Cancelled) => true,
            (Running, Paused)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled) => true,
            (Paused, Running) | (Paused, Cancelled) => true,
            _ => false,
        }
    }
}

/// Ordered pipeline phases within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Plan,
    Discover,
    Analyze,
    Deduplicate,
    Persist,
    Reconcile,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Plan => "plan",
            Phase::Discover => "discover",
            Phase::Analyze => "analyze",
            Phase::Deduplicate => "deduplicate",
            Phase::Persist => "persist",
            Phase::Reconcile => "reconcile",
        }
    }
}

/// One audit-trail entry appended at a phase boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEvent {
    pub phase: Phase,
    pub message: String,
    pub context: serde_json::Value,
    pub success: bool,
    pub duration_ms: i64,
    pub at: DateTime<Utc>,
}

impl PhaseEvent {
    pub fn new(
        phase: Phase,
        message: impl Into<String>,
        context: serde_json::Value,
        success: bool,
        duration_ms: i64,
    ) -> Self {
        Self {
            phase,
            message: message.into(),
            context,
            success,
            duration_ms,
            at: Utc::now(),
        }
    }
}

/// What the user asked the pipeline to look for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchTarget {
    #[serde(default)]
    pub job_titles: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    pub experience_level: Option<ExperienceLevel>,
    pub remote_preference: Option<WorkArrangement>,
    #[serde(default)]
    pub job_types: Vec<String>,
}

impl SearchTarget {
    /// Validate user-supplied titles: at most 10, each 2-100 characters
    /// after trimming. Duplicates are accepted here and collapsed by
    /// `unique_titles` before provider calls.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.job_titles.is_empty() {
            return Err(PipelineError::Validation(
                "At least one job title is required".to_string(),
            ));
        }
        if self.job_titles.len() > MAX_JOB_TITLES {
            return Err(PipelineError::Validation(format!(
                "Too many job titles: {} (maximum {})",
                self.job_titles.len(),
                MAX_JOB_TITLES
            )));
        }
        for title in &self.job_titles {
            let trimmed = title.trim();
            if trimmed.len() < MIN_TITLE_LEN || trimmed.len() > MAX_TITLE_LEN {
                return Err(PipelineError::Validation(format!(
                    "Job title '{}' must be between {} and {} characters",
                    trimmed, MIN_TITLE_LEN, MAX_TITLE_LEN
                )));
            }
        }
        Ok(())
    }

    /// Titles with case-insensitive duplicates removed, order preserved.
    pub fn unique_titles(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.job_titles
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.to_lowercase()))
            .collect()
    }
}

/// One invocation of the discovery pipeline for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRun {
    pub id: String,
    pub user_id: String,
    pub resume_id: Option<String>,
    pub search_name: String,
    pub target: SearchTarget,
    pub status: RunStatus,
    pub capacity_at_start: i64,
    pub jobs_found_this_run: i64,
    pub total_jobs_found: i64,
    pub status_message: String,
    pub next_run_at: Option<DateTime<Utc>>,
    pub audit_log: Vec<PhaseEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SearchRun {
    pub fn new(
        user_id: &str,
        resume_id: Option<&str>,
        search_name: &str,
        target: SearchTarget,
        capacity_at_start: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            resume_id: resume_id.map(str::to_string),
            search_name: search_name.to_string(),
            target,
            status: RunStatus::Planned,
            capacity_at_start,
            jobs_found_this_run: 0,
            total_jobs_found: 0,
            status_message: String::new(),
            next_run_at: None,
            audit_log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target_with_titles(titles: &[&str]) -> SearchTarget {
        SearchTarget {
            job_titles: titles.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_status_transitions() {
        assert!(RunStatus::Planned.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Paused));
        assert!(RunStatus::Paused.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Cancelled));
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Cancelled.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Paused.can_transition_to(RunStatus::Completed));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
    }

    #[test]
    fn test_target_validation() {
        assert!(target_with_titles(&["Data Engineer"]).validate().is_ok());
        assert!(target_with_titles(&[]).validate().is_err());
        assert!(target_with_titles(&["x"]).validate().is_err());

        let long_title = "x".repeat(101);
        assert!(target_with_titles(&[long_title.as_str()]).validate().is_err());

        let many: Vec<String> = (0..11).map(|i| format!("Title {}", i)).collect();
        let many_refs: Vec<&str> = many.iter().map(String::as_str).collect();
        assert!(target_with_titles(&many_refs).validate().is_err());
    }

    #[test]
    fn test_duplicate_titles_accepted_but_collapsed() {
        let target = target_with_titles(&[
            "Senior Data Engineer",
            "Data Engineer",
            "Senior Data Engineer",
        ]);
        assert!(target.validate().is_ok());
        assert_eq!(
            target.unique_titles(),
            vec!["Senior Data Engineer", "Data Engineer"]
        );
    }
}
