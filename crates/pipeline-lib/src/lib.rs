//! Incident pipeline library
//!
//! This crate provides the core functionality for:
//! - Baseline computation and anomaly scoring
//! - Incident detection with deduplication
//! - Root-cause correlation over a service dependency graph
//! - Remediation policy and approval decisions
//! - Stage orchestration with retry, escalation and monitor mode
//! - Health checks and observability

pub mod anomaly;
pub mod baseline;
pub mod collaborators;
pub mod correlation;
pub mod error;
pub mod health;
pub mod models;
pub mod narrative;
pub mod observability;
pub mod orchestrator;
pub mod policy;
pub mod store;

pub use error::{PipelineError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
