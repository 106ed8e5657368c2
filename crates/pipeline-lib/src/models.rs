//! Core data models for the incident pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operational signal kinds tracked per service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    ErrorRate,
    Latency,
    Cpu,
    Memory,
}

impl Signal {
    pub const ALL: [Signal; 4] = [Signal::ErrorRate, Signal::Latency, Signal::Cpu, Signal::Memory];

    /// Resource signals feed the resource-pressure correlation factor
    pub fn is_resource(&self) -> bool {
        matches!(self, Signal::Cpu | Signal::Memory)
    }

    /// Error type used when an anomaly on this signal opens an incident
    pub fn error_type(&self) -> &'static str {
        match self {
            Signal::ErrorRate => "ErrorRateSpike",
            Signal::Latency => "LatencyDegradation",
            Signal::Cpu => "CpuSaturation",
            Signal::Memory => "MemoryPressure",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::ErrorRate => "error_rate",
            Signal::Latency => "latency",
            Signal::Cpu => "cpu",
            Signal::Memory => "memory",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "error_rate" => Some(Signal::ErrorRate),
            "latency" => Some(Signal::Latency),
            "cpu" => Some(Signal::Cpu),
            "memory" => Some(Signal::Memory),
            _ => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anomaly severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Normalised weight used by correlation scoring
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Low => 0.25,
            Severity::Medium => 0.5,
            Severity::High => 0.75,
            Severity::Critical => 1.0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Quality of the sample set a baseline was computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    Ok,
    LowSampleCount,
    Empty,
}

/// Statistical baseline for one (service, signal) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub service: String,
    pub signal: Signal,
    pub mean: f64,
    pub stddev: f64,
    pub p95: f64,
    pub sample_count: u64,
    pub computed_at: DateTime<Utc>,
    pub quality_flag: QualityFlag,
}

/// A single telemetry reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub service: String,
    pub signal: Signal,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn new(
        service: impl Into<String>,
        signal: Signal,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            service: service.into(),
            signal,
            value,
            timestamp,
        }
    }
}

/// A scored deviation from baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub service: String,
    pub signal: Signal,
    pub observed_value: f64,
    pub baseline: Baseline,
    pub z_score: f64,
    pub severity: Severity,
    /// 1.0 for a fresh baseline, lower when the baseline is stale
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
}

/// Incident identifier in `INC-NNN` form
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(String);

impl IncidentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn from_sequence(sequence: u64) -> Self {
        Self(format!("INC-{:03}", sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pipeline position of an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Active,
    Analyzing,
    Analyzed,
    Planning,
    PlanReady,
    ApprovalRequired,
    Executing,
    Executed,
    Documenting,
    Documented,
    FailedEscalated,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Active => "active",
            IncidentStatus::Analyzing => "analyzing",
            IncidentStatus::Analyzed => "analyzed",
            IncidentStatus::Planning => "planning",
            IncidentStatus::PlanReady => "plan_ready",
            IncidentStatus::ApprovalRequired => "approval_required",
            IncidentStatus::Executing => "executing",
            IncidentStatus::Executed => "executed",
            IncidentStatus::Documenting => "documenting",
            IncidentStatus::Documented => "documented",
            IncidentStatus::FailedEscalated => "failed_escalated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IncidentStatus::Documented | IncidentStatus::FailedEscalated)
    }

    /// Open incidents suppress duplicates; any terminal status closes one
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }

    /// Statuses where stage work is in flight
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            IncidentStatus::Analyzing
                | IncidentStatus::Planning
                | IncidentStatus::Executing
                | IncidentStatus::Documenting
        )
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome reported by the execution collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionOutcome {
    Success,
    Failure,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentationConfirmation {
    pub reference: String,
    pub documented_at: DateTime<Utc>,
}

/// An incident and its pipeline bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub service: String,
    pub error_type: String,
    pub error_signature: String,
    pub description: String,
    pub severity: Severity,
    pub status: IncidentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented on every write; reclaims compare against it
    pub revision: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_time_secs: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_result_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<DocumentationConfirmation>,
    pub failed_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
}

/// A deployment recorded by the delivery system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub service: String,
    pub version: String,
    pub deployed_at: DateTime<Utc>,
}

/// Evidence kinds scored by the correlation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    Deployment,
    ResourcePressure,
    Dependency,
    RelatedAnomalies,
}

impl fmt::Display for FactorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactorKind::Deployment => write!(f, "deployment"),
            FactorKind::ResourcePressure => write!(f, "resource_pressure"),
            FactorKind::Dependency => write!(f, "dependency"),
            FactorKind::RelatedAnomalies => write!(f, "related_anomalies"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingFactor {
    pub kind: FactorKind,
    /// Normalised factor value in [0, 1]
    pub score: f64,
    /// Contribution to the candidate score after weighting
    pub weighted: f64,
    pub detail: String,
}

/// A candidate root-cause service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub service: String,
    pub score: f64,
    pub dependency_weight: f64,
    pub factors: Vec<ContributingFactor>,
}

impl RankedCandidate {
    /// Factor with the largest weighted contribution
    pub fn dominant_factor(&self) -> Option<&ContributingFactor> {
        self.factors.iter().max_by(|a, b| {
            a.weighted
                .total_cmp(&b.weighted)
                .then_with(|| b.kind.cmp(&a.kind))
        })
    }
}

/// A resolved incident kept for similarity search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalIncident {
    pub id: IncidentId,
    pub service: String,
    pub description: String,
    #[serde(default)]
    pub root_cause: Option<String>,
    #[serde(default)]
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedIncident {
    pub incident_id: IncidentId,
    pub service: String,
    pub similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

/// Structured output of the narrative collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub root_cause_summary: String,
    pub confidence: f64,
    pub reasoning: String,
}

/// Result of one correlation run over an incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub id: String,
    pub incident_id: IncidentId,
    pub ranked_candidates: Vec<RankedCandidate>,
    pub related_incidents: Vec<RelatedIncident>,
    /// Set when the graph or deployment source was unavailable
    pub degraded: bool,
    pub missing_factors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<Narrative>,
    pub computed_at: DateTime<Utc>,
    pub superseded: bool,
}

impl CorrelationResult {
    pub fn top(&self) -> Option<&RankedCandidate> {
        self.ranked_candidates.first()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskTier::Low => write!(f, "LOW"),
            RiskTier::Medium => write!(f, "MEDIUM"),
            RiskTier::High => write!(f, "HIGH"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalState {
    AutoApproved,
    PendingApproval,
    /// Approved by an operator after a pending decision
    Approved,
    Rejected,
}

impl ApprovalState {
    pub fn permits_execution(&self) -> bool {
        matches!(self, ApprovalState::AutoApproved | ApprovalState::Approved)
    }
}

impl fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalState::AutoApproved => write!(f, "AUTO_APPROVED"),
            ApprovalState::PendingApproval => write!(f, "PENDING_APPROVAL"),
            ApprovalState::Approved => write!(f, "APPROVED"),
            ApprovalState::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Workflow selection for an incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationPlan {
    pub id: String,
    pub incident_id: IncidentId,
    pub workflow: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_service: Option<String>,
    pub risk_tier: RiskTier,
    pub approval_state: ApprovalState,
    pub confidence: f64,
    pub rationale: String,
    pub steps: Vec<String>,
    pub validation_steps: Vec<String>,
    pub rollback_steps: Vec<String>,
    pub estimated_duration_secs: u64,
    pub generated_at: DateTime<Utc>,
    pub superseded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(
            [Severity::Low, Severity::Critical, Severity::Medium]
                .into_iter()
                .max(),
            Some(Severity::Critical)
        );
    }

    #[test]
    fn test_incident_id_format() {
        assert_eq!(IncidentId::from_sequence(1).as_str(), "INC-001");
        assert_eq!(IncidentId::from_sequence(42).to_string(), "INC-042");
        assert_eq!(IncidentId::from_sequence(1234).as_str(), "INC-1234");
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&IncidentStatus::ApprovalRequired).unwrap();
        assert_eq!(json, "\"approval_required\"");
        assert!(IncidentStatus::FailedEscalated.is_terminal());
        assert!(!IncidentStatus::FailedEscalated.is_open());
        assert!(!IncidentStatus::Documented.is_open());
        assert!(IncidentStatus::ApprovalRequired.is_open());
    }

    #[test]
    fn test_signal_parse_round_trip() {
        for signal in Signal::ALL {
            assert_eq!(Signal::parse(signal.as_str()), Some(signal));
        }
        assert_eq!(Signal::parse("disk"), None);
    }

    #[test]
    fn test_dominant_factor() {
        let candidate = RankedCandidate {
            service: "payments-db".to_string(),
            score: 0.5,
            dependency_weight: 0.9,
            factors: vec![
                ContributingFactor {
                    kind: FactorKind::Dependency,
                    score: 0.9,
                    weighted: 0.18,
                    detail: String::new(),
                },
                ContributingFactor {
                    kind: FactorKind::Deployment,
                    score: 0.9,
                    weighted: 0.315,
                    detail: String::new(),
                },
            ],
        };

        assert_eq!(
            candidate.dominant_factor().map(|f| f.kind),
            Some(FactorKind::Deployment)
        );
    }
}
