//! Observability infrastructure for the incident pipeline
//!
//! Provides:
//! - Prometheus metrics (detection counts, stage latency, escalations, queue depth)
//! - Structured JSON logging with tracing

use crate::anomaly::DataQualityIssue;
use crate::models::{Incident, IncidentId, IncidentStatus, RemediationPlan, Severity};
use crate::orchestrator::Stage;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for stage latency (in seconds)
const STAGE_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    anomalies_scored: IntCounterVec,
    incidents_created: IntCounterVec,
    incidents_suppressed: IntCounter,
    stage_latency_seconds: HistogramVec,
    stage_failures: IntCounterVec,
    escalations: IntCounterVec,
    incidents_documented: IntCounter,
    queue_depth: IntGauge,
    data_quality_issues: IntCounterVec,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            anomalies_scored: register_int_counter_vec!(
                "incident_pipeline_anomalies_scored_total",
                "Anomalies found by the scorer, by severity",
                &["severity"]
            )
            .expect("Failed to register anomalies_scored"),

            incidents_created: register_int_counter_vec!(
                "incident_pipeline_incidents_created_total",
                "Incidents opened after deduplication, by severity",
                &["severity"]
            )
            .expect("Failed to register incidents_created"),

            incidents_suppressed: register_int_counter!(
                "incident_pipeline_incidents_suppressed_total",
                "Incident candidates suppressed as duplicates"
            )
            .expect("Failed to register incidents_suppressed"),

            stage_latency_seconds: register_histogram_vec!(
                "incident_pipeline_stage_latency_seconds",
                "Wall time of one stage attempt",
                &["stage"],
                STAGE_LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register stage_latency_seconds"),

            stage_failures: register_int_counter_vec!(
                "incident_pipeline_stage_failures_total",
                "Failed stage attempts",
                &["stage"]
            )
            .expect("Failed to register stage_failures"),

            escalations: register_int_counter_vec!(
                "incident_pipeline_escalations_total",
                "Incidents moved to failed_escalated, by stage",
                &["stage"]
            )
            .expect("Failed to register escalations"),

            incidents_documented: register_int_counter!(
                "incident_pipeline_incidents_documented_total",
                "Incidents that reached documented"
            )
            .expect("Failed to register incidents_documented"),

            queue_depth: register_int_gauge!(
                "incident_pipeline_queue_depth",
                "Incidents queued for monitor workers"
            )
            .expect("Failed to register queue_depth"),

            data_quality_issues: register_int_counter_vec!(
                "incident_pipeline_data_quality_issues_total",
                "Signals skipped or downgraded while scoring",
                &["kind"]
            )
            .expect("Failed to register data_quality_issues"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_anomalies_scored(&self, severity: Severity) {
        self.inner()
            .anomalies_scored
            .with_label_values(&[severity.to_string().as_str()])
            .inc();
    }

    pub fn inc_incidents_created(&self, severity: Severity) {
        self.inner()
            .incidents_created
            .with_label_values(&[severity.to_string().as_str()])
            .inc();
    }

    pub fn inc_incidents_suppressed(&self) {
        self.inner().incidents_suppressed.inc();
    }

    pub fn observe_stage_latency(&self, stage: Stage, elapsed: Duration) {
        self.inner()
            .stage_latency_seconds
            .with_label_values(&[stage.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn inc_stage_failures(&self, stage: Stage) {
        self.inner()
            .stage_failures
            .with_label_values(&[stage.as_str()])
            .inc();
    }

    pub fn inc_escalations(&self, stage: Stage) {
        self.inner()
            .escalations
            .with_label_values(&[stage.as_str()])
            .inc();
    }

    pub fn inc_incidents_documented(&self) {
        self.inner().incidents_documented.inc();
    }

    pub fn set_queue_depth(&self, depth: i64) {
        self.inner().queue_depth.set(depth);
    }

    pub fn inc_data_quality_issue(&self, kind: &str) {
        self.inner()
            .data_quality_issues
            .with_label_values(&[kind])
            .inc();
    }
}

/// Structured logger for pipeline events
///
/// Every record carries an `event` field and the pipeline instance name so
/// log pipelines can filter without parsing messages.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Log an incident opened by the detector
    pub fn log_incident_created(&self, incident: &Incident) {
        match incident.severity {
            Severity::Critical | Severity::High => warn!(
                event = "incident_created",
                instance = %self.instance,
                incident_id = %incident.id,
                service = %incident.service,
                error_type = %incident.error_type,
                severity = %incident.severity,
                "Incident created"
            ),
            _ => info!(
                event = "incident_created",
                instance = %self.instance,
                incident_id = %incident.id,
                service = %incident.service,
                error_type = %incident.error_type,
                severity = %incident.severity,
                "Incident created"
            ),
        }
    }

    pub fn log_incident_suppressed(&self, service: &str, error_type: &str, existing: &IncidentId) {
        info!(
            event = "incident_suppressed",
            instance = %self.instance,
            service = %service,
            error_type = %error_type,
            existing_incident = %existing,
            "Duplicate incident suppressed"
        );
    }

    pub fn log_transition(&self, id: &IncidentId, from: IncidentStatus, to: IncidentStatus) {
        info!(
            event = "status_transition",
            instance = %self.instance,
            incident_id = %id,
            from = %from,
            to = %to,
            "Incident status changed"
        );
    }

    pub fn log_stage_retry(
        &self,
        id: &IncidentId,
        stage: Stage,
        attempt: u32,
        backoff: Duration,
        error: &str,
    ) {
        warn!(
            event = "stage_retry",
            instance = %self.instance,
            incident_id = %id,
            stage = %stage,
            attempt = attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "Stage attempt failed, retrying"
        );
    }

    pub fn log_escalation(&self, id: &IncidentId, stage: Stage, reason: &str) {
        warn!(
            event = "incident_escalated",
            instance = %self.instance,
            incident_id = %id,
            stage = %stage,
            reason = %reason,
            "Incident escalated to operators"
        );
    }

    pub fn log_plan(&self, plan: &RemediationPlan) {
        info!(
            event = "plan_selected",
            instance = %self.instance,
            incident_id = %plan.incident_id,
            workflow = %plan.workflow,
            risk_tier = %plan.risk_tier,
            approval_state = %plan.approval_state,
            confidence = plan.confidence,
            "Remediation plan selected"
        );
    }

    pub fn log_data_quality(&self, issue: &DataQualityIssue) {
        warn!(
            event = "data_quality_issue",
            instance = %self.instance,
            kind = issue.kind(),
            service = %issue.service(),
            detail = ?issue,
            "Signal not scored normally"
        );
    }

    pub fn log_documented(&self, incident: &Incident) {
        info!(
            event = "incident_documented",
            instance = %self.instance,
            incident_id = %incident.id,
            resolution_time_secs = ?incident.resolution_time_secs,
            "Incident documented"
        );
    }

    pub fn log_startup(&self, version: &str, mode: &str) {
        info!(
            event = "pipeline_started",
            instance = %self.instance,
            pipeline_version = %version,
            mode = %mode,
            "Incident pipeline started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "pipeline_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Incident pipeline shutting down"
        );
    }
}
