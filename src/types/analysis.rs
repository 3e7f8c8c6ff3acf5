// src/types/analysis.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::posting::{ExperienceLevel, SalaryRange, WorkArrangement};

/// Which path produced an analysis document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisPath {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    pub path: AnalysisPath,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisMetadata {
    pub fn now(path: AnalysisPath) -> Self {
        Self {
            path,
            analyzed_at: Utc::now(),
        }
    }
}

/// One extracted skill with a 1-10 importance score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillEntry {
    pub name: String,
    pub importance: u8,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub skill_type: String,
}

/// Normalized requirements document produced by either analysis path.
///
/// Arrays are never null: missing fields deserialize to empty vectors and
/// `normalized()` repairs anything out of range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredAnalysis {
    #[serde(default)]
    pub requirements: Vec<String>,
    #[serde(default)]
    pub responsibilities: Vec<String>,
    #[serde(default)]
    pub technical_requirements: Vec<String>,
    #[serde(default)]
    pub tools_and_technologies: Vec<String>,
    #[serde(default)]
    pub key_skills: Vec<SkillEntry>,
    #[serde(default)]
    pub salary: Option<SalaryRange>,
    pub experience_level: ExperienceLevel,
    pub work_arrangement: WorkArrangement,
    pub metadata: AnalysisMetadata,
}

impl StructuredAnalysis {
    /// An empty but structurally valid document.
    pub fn empty(path: AnalysisPath) -> Self {
        Self {
            requirements: Vec::new(),
            responsibilities: Vec::new(),
            technical_requirements: Vec::new(),
            tools_and_technologies: Vec::new(),
            key_skills: Vec::new(),
            salary: None,
            experience_level: ExperienceLevel::Mid,
            work_arrangement: WorkArrangement::Unknown,
            metadata: AnalysisMetadata::now(path),
        }
    }

    /// Clamp skill importance into [1, 10] and drop empty skill names.
    pub fn normalized(mut self) -> Self {
        self.key_skills.retain(|s| !s.name.trim().is_empty());
        for skill in &mut self.key_skills {
            skill.importance = skill.importance.clamp(1, 10);
        }
        self
    }
}
