//! Detection pass: score a telemetry window and open deduplicated incidents

use super::dedup::{DedupDecision, IncidentCandidate, IncidentDeduplicator};
use super::scorer::{aggregate_by_service, AnomalyScorer, DataQualityIssue};
use crate::baseline::BaselineStore;
use crate::collaborators::{observations_from_rows, QuerySpec, TelemetrySource};
use crate::error::Result;
use crate::models::{Anomaly, Incident, IncidentId, Observation};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::store::{IncidentQuery, IncidentStore, NewIncident};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Default telemetry window scored per poll (5 minutes)
const DEFAULT_DETECTION_WINDOW_SECS: u64 = 5 * 60;

/// Outcome of one detection pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectionReport {
    pub created: Vec<Incident>,
    /// Candidates folded into an existing open incident
    pub suppressed: Vec<IncidentId>,
    pub anomalies: Vec<Anomaly>,
    pub issues: Vec<DataQualityIssue>,
}

pub struct IncidentDetector {
    scorer: AnomalyScorer,
    dedup: Mutex<IncidentDeduplicator>,
    store: Arc<dyn IncidentStore>,
    baselines: Arc<BaselineStore>,
    telemetry: Arc<dyn TelemetrySource>,
    detection_window: Duration,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl IncidentDetector {
    pub fn new(
        store: Arc<dyn IncidentStore>,
        baselines: Arc<BaselineStore>,
        telemetry: Arc<dyn TelemetrySource>,
    ) -> Self {
        Self {
            scorer: AnomalyScorer::default(),
            dedup: Mutex::new(IncidentDeduplicator::new()),
            store,
            baselines,
            telemetry,
            detection_window: Duration::from_secs(DEFAULT_DETECTION_WINDOW_SECS),
            metrics: PipelineMetrics::new(),
            logger: StructuredLogger::new("pipeline"),
        }
    }

    pub fn with_scorer(mut self, scorer: AnomalyScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup = Mutex::new(IncidentDeduplicator::new().with_window(window));
        self
    }

    pub fn with_detection_window(mut self, window: Duration) -> Self {
        self.detection_window = window;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Query the latest telemetry window and run detection over it
    pub async fn poll(&self, now: DateTime<Utc>) -> Result<DetectionReport> {
        let window = chrono::Duration::from_std(self.detection_window)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

        let rows = self
            .telemetry
            .query(&QuerySpec::metrics(now - window, now))
            .await?;
        let observations = observations_from_rows(&rows)?;

        self.detect(&observations, now).await
    }

    /// Score observations and open one incident per affected service unless
    /// an open incident already covers it within the dedup window
    pub async fn detect(
        &self,
        observations: &[Observation],
        now: DateTime<Utc>,
    ) -> Result<DetectionReport> {
        let baselines = self.baselines.snapshot().await;
        let outcome = self.scorer.score(observations, &baselines, now);

        for issue in &outcome.issues {
            self.metrics.inc_data_quality_issue(issue.kind());
            self.logger.log_data_quality(issue);
        }

        let anomalies: Vec<Anomaly> = outcome.anomalies().cloned().collect();
        for anomaly in &anomalies {
            self.metrics.inc_anomalies_scored(anomaly.severity);
        }

        let mut report = DetectionReport {
            anomalies: anomalies.clone(),
            issues: outcome.issues.clone(),
            ..Default::default()
        };
        if anomalies.is_empty() {
            debug!(signals_scored = outcome.signals_scored, "No anomalies in window");
            return Ok(report);
        }

        let open: HashSet<IncidentId> = self
            .store
            .list(&IncidentQuery::all())
            .await?
            .into_iter()
            .filter(|i| i.status.is_open())
            .map(|i| i.id)
            .collect();

        // Held across store writes so concurrent passes see each other's records
        let mut dedup = self.dedup.lock().await;

        for group in aggregate_by_service(anomalies) {
            let candidate = IncidentCandidate::new(&group.service, group.error_type(), group.severity, now);

            match dedup.should_create(&candidate, |id| open.contains(id)) {
                DedupDecision::Create => {
                    let incident = self
                        .store
                        .create(NewIncident {
                            service: candidate.service.clone(),
                            error_type: candidate.error_type.clone(),
                            error_signature: candidate.error_signature.clone(),
                            description: candidate.description.clone(),
                            severity: candidate.severity,
                            detected_at: candidate.detected_at,
                        })
                        .await?;

                    dedup.record(&candidate, incident.id.clone());
                    self.metrics.inc_incidents_created(incident.severity);
                    self.logger.log_incident_created(&incident);
                    report.created.push(incident);
                }
                DedupDecision::Suppress { existing } => {
                    self.store.raise_severity(&existing, candidate.severity).await?;
                    self.metrics.inc_incidents_suppressed();
                    self.logger
                        .log_incident_suppressed(&candidate.service, &candidate.error_type, &existing);
                    report.suppressed.push(existing);
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{async_trait, ResultSet};
    use crate::error::PipelineError;
    use crate::models::{Baseline, IncidentStatus, QualityFlag, Severity, Signal};
    use crate::store::InMemoryIncidentStore;
    use serde_json::json;

    struct FixedTelemetry(Option<ResultSet>);

    #[async_trait]
    impl TelemetrySource for FixedTelemetry {
        async fn query(&self, _spec: &QuerySpec) -> Result<ResultSet> {
            self.0
                .clone()
                .ok_or_else(|| PipelineError::transient("telemetry", "unreachable"))
        }
    }

    fn baseline(service: &str, signal: Signal, mean: f64, stddev: f64) -> Baseline {
        Baseline {
            service: service.to_string(),
            signal,
            mean,
            stddev,
            p95: mean + 2.0 * stddev,
            sample_count: 1000,
            computed_at: Utc::now(),
            quality_flag: QualityFlag::Ok,
        }
    }

    fn detector(telemetry: Option<ResultSet>) -> (IncidentDetector, Arc<InMemoryIncidentStore>) {
        let store = Arc::new(InMemoryIncidentStore::new());
        let baselines = Arc::new(BaselineStore::with_baselines(vec![
            baseline("checkout", Signal::ErrorRate, 0.01, 0.005),
            baseline("checkout", Signal::Latency, 120.0, 10.0),
            baseline("auth", Signal::ErrorRate, 0.02, 0.01),
        ]));
        let detector = IncidentDetector::new(
            store.clone(),
            baselines,
            Arc::new(FixedTelemetry(telemetry)),
        );
        (detector, store)
    }

    #[tokio::test]
    async fn test_spike_opens_critical_incident() {
        let (detector, _store) = detector(None);
        let now = Utc::now();

        let report = detector
            .detect(&[Observation::new("checkout", Signal::ErrorRate, 0.041, now)], now)
            .await
            .unwrap();

        assert_eq!(report.created.len(), 1);
        let incident = &report.created[0];
        assert_eq!(incident.id.as_str(), "INC-001");
        assert_eq!(incident.service, "checkout");
        assert_eq!(incident.error_type, "ErrorRateSpike");
        assert_eq!(incident.severity, Severity::Critical);
        assert_eq!(incident.status, IncidentStatus::Active);
    }

    #[tokio::test]
    async fn test_one_incident_per_service() {
        let (detector, _store) = detector(None);
        let now = Utc::now();

        let report = detector
            .detect(
                &[
                    Observation::new("checkout", Signal::ErrorRate, 0.041, now),
                    Observation::new("checkout", Signal::Latency, 160.0, now),
                ],
                now,
            )
            .await
            .unwrap();

        assert_eq!(report.anomalies.len(), 2);
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.created[0].error_type, "ErrorRateSpike");
    }

    #[tokio::test]
    async fn test_repeat_within_window_is_suppressed_and_raises_severity() {
        let (detector, store) = detector(None);
        let now = Utc::now();

        // z = 2.5 -> MEDIUM
        detector
            .detect(&[Observation::new("checkout", Signal::ErrorRate, 0.0225, now)], now)
            .await
            .unwrap();

        let later = now + chrono::Duration::seconds(30);
        let report = detector
            .detect(&[Observation::new("checkout", Signal::ErrorRate, 0.0225, later)], later)
            .await
            .unwrap();
        assert!(report.created.is_empty());
        assert_eq!(report.suppressed.len(), 1);

        let incidents = store.list(&IncidentQuery::all()).await.unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_closed_incident_does_not_suppress() {
        let (detector, store) = detector(None);
        let now = Utc::now();

        let first = detector
            .detect(&[Observation::new("checkout", Signal::ErrorRate, 0.041, now)], now)
            .await
            .unwrap();
        let id = first.created[0].id.clone();

        // Walk the incident to documented
        use IncidentStatus::*;
        for (from, to) in [
            (Active, Analyzing),
            (Analyzing, Analyzed),
            (Analyzed, Planning),
            (Planning, PlanReady),
            (PlanReady, Executing),
            (Executing, Executed),
            (Executed, Documenting),
            (Documenting, Documented),
        ] {
            store.transition(&id, from, to).await.unwrap();
        }

        let later = now + chrono::Duration::seconds(60);
        let report = detector
            .detect(&[Observation::new("checkout", Signal::ErrorRate, 0.041, later)], later)
            .await
            .unwrap();
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.created[0].id.as_str(), "INC-002");
    }

    #[tokio::test]
    async fn test_escalated_incident_does_not_suppress() {
        let (detector, store) = detector(None);
        let now = Utc::now();

        let first = detector
            .detect(&[Observation::new("checkout", Signal::ErrorRate, 0.041, now)], now)
            .await
            .unwrap();
        let id = first.created[0].id.clone();

        store
            .transition(&id, IncidentStatus::Active, IncidentStatus::Analyzing)
            .await
            .unwrap();
        store
            .escalate(&id, IncidentStatus::Analyzing, "analysis failed")
            .await
            .unwrap();

        let later = now + chrono::Duration::seconds(30);
        let report = detector
            .detect(&[Observation::new("checkout", Signal::ErrorRate, 0.041, later)], later)
            .await
            .unwrap();
        assert_eq!(report.created.len(), 1);
        assert!(report.suppressed.is_empty());
    }

    #[tokio::test]
    async fn test_missing_baseline_reported_not_fatal() {
        let (detector, store) = detector(None);
        let now = Utc::now();

        let report = detector
            .detect(&[Observation::new("search", Signal::Cpu, 0.99, now)], now)
            .await
            .unwrap();

        assert!(report.created.is_empty());
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind(), "missing_baseline");
        assert!(store.list(&IncidentQuery::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_poll_reads_telemetry_window() {
        let now = Utc::now();
        let rows = ResultSet {
            columns: vec![
                "service".to_string(),
                "signal".to_string(),
                "value".to_string(),
                "timestamp".to_string(),
            ],
            rows: vec![vec![
                json!("auth"),
                json!("error_rate"),
                json!(0.06),
                json!(now.to_rfc3339()),
            ]],
        };
        let (detector, _store) = detector(Some(rows));

        let report = detector.poll(now).await.unwrap();
        assert_eq!(report.created.len(), 1);
        assert_eq!(report.created[0].service, "auth");
        assert_eq!(report.created[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn test_poll_propagates_telemetry_failure() {
        let (detector, _store) = detector(None);
        let err = detector.poll(Utc::now()).await.unwrap_err();
        assert!(matches!(err, PipelineError::TransientCollaboratorFailure { .. }));
    }
}
