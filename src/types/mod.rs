// src/types/mod.rs
pub mod analysis;
pub mod posting;
pub mod run;

pub use analysis::{AnalysisMetadata, AnalysisPath, SkillEntry, StructuredAnalysis};
pub use posting::{
    DiscoveredPosting, ExperienceLevel, JobLocation, PersistedJob, SalaryRange, SourcePlatform,
    WorkArrangement,
};
pub use run::{Phase, PhaseEvent, RunStatus, SearchRun, SearchTarget};
