//! Remediation policy
//!
//! Maps a correlation result onto one workflow from a fixed catalog and
//! decides whether it may run without an operator.

pub mod catalog;
mod engine;

pub use catalog::{WorkflowCatalog, WorkflowCatalogEntry};
pub use engine::{decide_approval, Pattern, PolicyConfig, PolicyEngine};
