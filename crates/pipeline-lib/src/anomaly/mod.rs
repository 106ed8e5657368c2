//! Anomaly detection against rolling baselines
//!
//! This module provides:
//! - Z-score scoring and severity classification per (service, signal)
//! - Sliding-window deduplication of incident candidates
//! - The detection pass that turns a telemetry window into incidents

mod dedup;
mod detector;
mod scorer;

pub use dedup::{error_signature, DedupDecision, IncidentCandidate, IncidentDeduplicator};
pub use detector::{DetectionReport, IncidentDetector};
pub use scorer::{
    aggregate_by_service, z_score, AnomalyScorer, DataQualityIssue, ScorerConfig, ScoringOutcome,
    ServiceAnomalies, SeverityThresholds,
};
