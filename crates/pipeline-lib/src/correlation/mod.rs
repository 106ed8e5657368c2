//! Root-cause correlation
//!
//! Ranks candidate services for an incident by weighted evidence:
//! - deployment proximity before incident start
//! - resource pressure on the candidate
//! - dependency-graph influence on the affected service
//! - related anomalies on the candidate
//!
//! and attaches the most similar resolved incidents.

mod engine;
mod graph;
mod similarity;

pub use engine::{CorrelationConfig, CorrelationEngine, CorrelationInput, CorrelationWeights};
pub use graph::{Dependency, DependencyGraph, GraphError, ServiceNode};
pub use similarity::{find_similar, jaccard, service_match, similarity, tokenize};
