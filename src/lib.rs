// src/lib.rs
pub mod analysis;
pub mod config;
pub mod database;
pub mod dedup;
pub mod error;
pub mod orchestrator;
pub mod provider;
pub mod quota;
pub mod store;
pub mod types;

pub use config::ConfigManager;
pub use error::{PipelineError, PipelineResult};
pub use orchestrator::{SearchOrchestrator, StartReceipt, WeeklyStatus};
