// src/store/mod.rs
pub mod jobs;
pub mod profile;
pub mod runs;

pub use jobs::{JobStore, SqliteJobStore};
pub use profile::{
    FixedPlanLookup, PlanLimits, ResumeProfile, ResumeStore, StaticResumeStore, SubscriptionLookup,
};
pub use runs::SearchRunRepository;
