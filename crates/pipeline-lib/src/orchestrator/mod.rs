//! Incident lifecycle orchestration
//!
//! This module provides:
//! - The status transition table and stage mapping
//! - Stage retry policy
//! - The single-incident driver with operator approval hooks
//! - Monitor mode with a bounded work queue and worker pool

mod monitor;
mod pipeline;
mod retry;
pub mod state;


pub use monitor::{MonitorConfig, MonitorLoop, MonitorLoopBuilder};
pub use pipeline::{
    Orchestrator, OrchestratorBuilder, OrchestratorConfig, PipelineOutcome, PipelineStats,
    StageErrorRecord,
};
pub use retry::RetryPolicy;
pub use state::Stage;
