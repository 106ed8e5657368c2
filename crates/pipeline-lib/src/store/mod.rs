//! Incident persistence
//!
//! The store is the single source of truth for incident status. Every status
//! change is a compare-and-set keyed by incident id, so concurrent workers and
//! pipeline instances can race for the same incident safely.

mod memory;

pub use memory::InMemoryIncidentStore;

use crate::collaborators::async_trait;
use crate::error::Result;
use crate::models::{
    ApprovalState, CorrelationResult, DocumentationConfirmation, ExecutionReport,
    HistoricalIncident, Incident, IncidentId, IncidentStatus, RemediationPlan, Severity,
};
use chrono::{DateTime, Utc};

/// Fields for a newly detected incident
#[derive(Debug, Clone, PartialEq)]
pub struct NewIncident {
    pub service: String,
    pub error_type: String,
    pub error_signature: String,
    pub description: String,
    pub severity: Severity,
    pub detected_at: DateTime<Utc>,
}

/// Listing filter; results are ordered oldest first
#[derive(Debug, Clone, Default)]
pub struct IncidentQuery {
    /// Empty matches every status
    pub statuses: Vec<IncidentStatus>,
    pub limit: Option<usize>,
}

impl IncidentQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_statuses(statuses: impl IntoIterator<Item = IncidentStatus>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
            limit: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, incident: &Incident) -> bool {
        self.statuses.is_empty() || self.statuses.contains(&incident.status)
    }
}

#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Persist a new incident in `active` status with the next sequential id
    async fn create(&self, new: NewIncident) -> Result<Incident>;

    async fn get(&self, id: &IncidentId) -> Result<Incident>;

    async fn list(&self, query: &IncidentQuery) -> Result<Vec<Incident>>;

    /// Atomically move `from -> to`. Fails with `StaleState` when the stored
    /// status is not `from` and with `InvalidTransition` for disallowed edges.
    async fn transition(
        &self,
        id: &IncidentId,
        from: IncidentStatus,
        to: IncidentStatus,
    ) -> Result<Incident>;

    /// Take over an in-progress incident. Succeeds only if the incident has
    /// not been written since `expected_revision` was observed.
    async fn reclaim(
        &self,
        id: &IncidentId,
        status: IncidentStatus,
        expected_revision: u64,
    ) -> Result<Incident>;

    /// Raise severity to `severity` if it is higher than the stored one
    async fn raise_severity(&self, id: &IncidentId, severity: Severity) -> Result<Incident>;

    /// Store a correlation result, superseding the previous one
    async fn save_correlation(&self, result: CorrelationResult) -> Result<()>;

    async fn current_correlation(&self, id: &IncidentId) -> Result<Option<CorrelationResult>>;

    /// Store a remediation plan, superseding the previous one
    async fn save_plan(&self, plan: RemediationPlan) -> Result<()>;

    async fn current_plan(&self, id: &IncidentId) -> Result<Option<RemediationPlan>>;

    /// Record an operator decision on the current plan and move the incident
    /// out of `approval_required` in one write. `reason` becomes the
    /// escalation reason when `to` is `failed_escalated`.
    async fn resolve_approval(
        &self,
        id: &IncidentId,
        decision: ApprovalState,
        to: IncidentStatus,
        reason: Option<&str>,
    ) -> Result<Incident>;

    /// Move `approval_required -> analyzing`, supersede the current
    /// artifacts and reset the failure count in one write
    async fn restart_analysis(&self, id: &IncidentId) -> Result<Incident>;

    /// Mark the current correlation result and plan superseded
    async fn supersede_artifacts(&self, id: &IncidentId) -> Result<()>;

    async fn record_execution(&self, id: &IncidentId, report: ExecutionReport) -> Result<Incident>;

    async fn record_documentation(
        &self,
        id: &IncidentId,
        confirmation: DocumentationConfirmation,
        resolution_time_secs: i64,
    ) -> Result<Incident>;

    /// Count a failed stage attempt; the returned incident carries the new count
    async fn record_failure(&self, id: &IncidentId, error: &str) -> Result<Incident>;

    async fn clear_failures(&self, id: &IncidentId) -> Result<()>;

    /// Atomically move `from -> failed_escalated` and record why
    async fn escalate(
        &self,
        id: &IncidentId,
        from: IncidentStatus,
        reason: &str,
    ) -> Result<Incident>;

    /// Most recent resolved incidents for similarity search
    async fn resolved_history(&self, limit: usize) -> Result<Vec<HistoricalIncident>>;
}
