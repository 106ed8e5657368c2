//! Z-score anomaly scoring against rolling baselines
//!
//! Readings in a window are grouped per (service, signal) and the window mean
//! is scored as `z = (observed - mean) / stddev`. Signals whose baseline has
//! no spread, or no baseline at all, are skipped and reported as data-quality
//! issues instead of failing the batch.

use crate::baseline::BaselineSnapshot;
use crate::models::{Anomaly, Baseline, Observation, Severity, Signal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

/// Default number of anomalies returned per scoring pass
const DEFAULT_TOP_N: usize = 10;

/// Baselines older than this are still used but trusted less (24 hours)
const DEFAULT_STALENESS_SECS: u64 = 24 * 60 * 60;

/// |z| thresholds; each class requires |z| strictly above its value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityThresholds {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            low: 1.0,
            medium: 2.0,
            high: 3.0,
            critical: 5.0,
        }
    }
}

impl SeverityThresholds {
    /// Severity for a z-score, `None` when not anomalous
    pub fn classify(&self, z_score: f64) -> Option<Severity> {
        let magnitude = z_score.abs();
        if magnitude > self.critical {
            Some(Severity::Critical)
        } else if magnitude > self.high {
            Some(Severity::High)
        } else if magnitude > self.medium {
            Some(Severity::Medium)
        } else if magnitude > self.low {
            Some(Severity::Low)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    pub thresholds: SeverityThresholds,
    pub top_n: usize,
    pub staleness_bound: Duration,
    /// Confidence multiplier applied to anomalies scored on stale baselines
    pub stale_confidence_factor: f64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            thresholds: SeverityThresholds::default(),
            top_n: DEFAULT_TOP_N,
            staleness_bound: Duration::from_secs(DEFAULT_STALENESS_SECS),
            stale_confidence_factor: 0.5,
        }
    }
}

/// A signal that could not be scored normally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataQualityIssue {
    MissingBaseline {
        service: String,
        signal: Signal,
    },
    /// Baseline stddev is zero or non-finite
    InsufficientBaseline {
        service: String,
        signal: Signal,
        sample_count: u64,
    },
    StaleBaseline {
        service: String,
        signal: Signal,
        age_secs: i64,
    },
}

impl DataQualityIssue {
    pub fn kind(&self) -> &'static str {
        match self {
            DataQualityIssue::MissingBaseline { .. } => "missing_baseline",
            DataQualityIssue::InsufficientBaseline { .. } => "insufficient_baseline",
            DataQualityIssue::StaleBaseline { .. } => "stale_baseline",
        }
    }

    pub fn service(&self) -> &str {
        match self {
            DataQualityIssue::MissingBaseline { service, .. }
            | DataQualityIssue::InsufficientBaseline { service, .. }
            | DataQualityIssue::StaleBaseline { service, .. } => service,
        }
    }
}

/// Ranked anomalies plus the issues met while scoring
#[derive(Debug, Clone, Default)]
pub struct ScoringOutcome {
    anomalies: Vec<Anomaly>,
    pub issues: Vec<DataQualityIssue>,
    /// Signals that had a usable baseline
    pub signals_scored: usize,
    /// Anomalies found before truncation
    pub total_anomalies: usize,
}

impl ScoringOutcome {
    pub fn anomalies(&self) -> impl Iterator<Item = &Anomaly> {
        self.anomalies.iter()
    }

    pub fn len(&self) -> usize {
        self.anomalies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty()
    }
}

impl IntoIterator for ScoringOutcome {
    type Item = Anomaly;
    type IntoIter = std::vec::IntoIter<Anomaly>;

    fn into_iter(self) -> Self::IntoIter {
        self.anomalies.into_iter()
    }
}

/// Z-score of a value against a baseline, `None` when the baseline has no spread
pub fn z_score(value: f64, baseline: &Baseline) -> Option<f64> {
    if !baseline.stddev.is_finite() || baseline.stddev < f64::EPSILON {
        return None;
    }
    let z = (value - baseline.mean) / baseline.stddev;
    z.is_finite().then_some(z)
}

/// Severity descending, then |z| descending. Service and signal make the order total.
fn compare_ranked(a: &Anomaly, b: &Anomaly) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| b.z_score.abs().total_cmp(&a.z_score.abs()))
        .then_with(|| a.service.cmp(&b.service))
        .then_with(|| a.signal.cmp(&b.signal))
}

#[derive(Debug, Clone, Default)]
pub struct AnomalyScorer {
    config: ScorerConfig,
}

impl AnomalyScorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// Score a window of observations, keeping the configured top-N
    pub fn score(
        &self,
        observations: &[Observation],
        baselines: &BaselineSnapshot,
        now: DateTime<Utc>,
    ) -> ScoringOutcome {
        self.score_limited(observations, baselines, now, self.config.top_n)
    }

    /// Score without truncation
    pub fn score_all(
        &self,
        observations: &[Observation],
        baselines: &BaselineSnapshot,
        now: DateTime<Utc>,
    ) -> ScoringOutcome {
        self.score_limited(observations, baselines, now, usize::MAX)
    }

    fn score_limited(
        &self,
        observations: &[Observation],
        baselines: &BaselineSnapshot,
        now: DateTime<Utc>,
        limit: usize,
    ) -> ScoringOutcome {
        // (sum, count, latest timestamp) per key
        let mut windows: BTreeMap<(&str, Signal), (f64, usize, DateTime<Utc>)> = BTreeMap::new();
        for obs in observations.iter().filter(|o| o.value.is_finite()) {
            let entry = windows
                .entry((obs.service.as_str(), obs.signal))
                .or_insert((0.0, 0, obs.timestamp));
            entry.0 += obs.value;
            entry.1 += 1;
            entry.2 = entry.2.max(obs.timestamp);
        }

        let staleness = chrono::Duration::from_std(self.config.staleness_bound)
            .unwrap_or_else(|_| chrono::Duration::hours(24));

        let mut outcome = ScoringOutcome::default();
        let mut anomalies = Vec::new();

        for ((service, signal), (sum, count, observed_at)) in windows {
            let Some(baseline) = baselines.get(service, signal) else {
                outcome.issues.push(DataQualityIssue::MissingBaseline {
                    service: service.to_string(),
                    signal,
                });
                continue;
            };

            let observed_value = sum / count as f64;
            let Some(z) = z_score(observed_value, baseline) else {
                outcome.issues.push(DataQualityIssue::InsufficientBaseline {
                    service: service.to_string(),
                    signal,
                    sample_count: baseline.sample_count,
                });
                continue;
            };
            outcome.signals_scored += 1;

            let age = now - baseline.computed_at;
            let confidence = if age > staleness {
                outcome.issues.push(DataQualityIssue::StaleBaseline {
                    service: service.to_string(),
                    signal,
                    age_secs: age.num_seconds(),
                });
                self.config.stale_confidence_factor
            } else {
                1.0
            };

            if let Some(severity) = self.config.thresholds.classify(z) {
                anomalies.push(Anomaly {
                    service: service.to_string(),
                    signal,
                    observed_value,
                    baseline: baseline.clone(),
                    z_score: z,
                    severity,
                    confidence,
                    observed_at,
                });
            }
        }

        anomalies.sort_by(compare_ranked);
        outcome.total_anomalies = anomalies.len();
        anomalies.truncate(limit);
        outcome.anomalies = anomalies;
        outcome
    }
}

/// Anomalies of one service, collapsed to its maximum severity
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceAnomalies {
    pub service: String,
    pub severity: Severity,
    /// Highest-ranked anomaly of the service
    pub strongest: Anomaly,
    pub anomalies: Vec<Anomaly>,
}

impl ServiceAnomalies {
    pub fn error_type(&self) -> &'static str {
        self.strongest.signal.error_type()
    }
}

/// Collapse ranked anomalies into one entry per service (max-severity-wins)
pub fn aggregate_by_service(anomalies: impl IntoIterator<Item = Anomaly>) -> Vec<ServiceAnomalies> {
    let mut grouped: BTreeMap<String, Vec<Anomaly>> = BTreeMap::new();
    for anomaly in anomalies {
        grouped.entry(anomaly.service.clone()).or_default().push(anomaly);
    }

    let mut services: Vec<ServiceAnomalies> = grouped
        .into_iter()
        .filter_map(|(service, mut anomalies)| {
            anomalies.sort_by(compare_ranked);
            let strongest = anomalies.first()?.clone();
            Some(ServiceAnomalies {
                service,
                severity: strongest.severity,
                strongest,
                anomalies,
            })
        })
        .collect();

    services.sort_by(|a, b| compare_ranked(&a.strongest, &b.strongest));
    services
}
