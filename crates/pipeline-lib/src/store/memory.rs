//! In-memory incident store with optional JSON snapshot persistence

use super::{IncidentQuery, IncidentStore, NewIncident};
use crate::collaborators::async_trait;
use crate::error::{PipelineError, Result};
use crate::models::{
    ApprovalState, CorrelationResult, DocumentationConfirmation, ExecutionReport,
    HistoricalIncident, Incident, IncidentId, IncidentStatus, RemediationPlan, Severity,
};
use crate::orchestrator::state::validate_transition;
use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    next_sequence: u64,
    incidents: BTreeMap<IncidentId, Incident>,
    /// All correlation results per incident, newest last
    correlations: BTreeMap<IncidentId, Vec<CorrelationResult>>,
    plans: BTreeMap<IncidentId, Vec<RemediationPlan>>,
    /// Seeded resolved incidents from before this store existed
    history: Vec<HistoricalIncident>,
}

impl StoreState {
    fn incident_mut(&mut self, id: &IncidentId) -> Result<&mut Incident> {
        self.incidents
            .get_mut(id)
            .ok_or_else(|| PipelineError::NotFound(id.clone()))
    }
}

fn touch(incident: &mut Incident) {
    incident.revision += 1;
    incident.updated_at = Utc::now();
}

/// Incident store backed by process memory.
///
/// With a persistence path every mutation is written through to a JSON
/// snapshot so a restarted process resumes where it stopped.
pub struct InMemoryIncidentStore {
    state: RwLock<StoreState>,
    persistence_path: Option<PathBuf>,
}

impl Default for InMemoryIncidentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIncidentStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            persistence_path: None,
        }
    }

    /// Seed resolved incidents used by similarity search
    pub fn with_history(mut self, history: Vec<HistoricalIncident>) -> Self {
        self.state.get_mut().history = history;
        self
    }

    /// Create a store persisted at `path`, loading an existing snapshot if present
    pub fn with_persistence(path: PathBuf) -> anyhow::Result<Self> {
        let mut state = StoreState::default();

        if path.exists() {
            match load_from_disk(&path) {
                Ok(loaded) => {
                    info!(
                        path = %path.display(),
                        incidents = loaded.incidents.len(),
                        "Loaded incident snapshot from disk"
                    );
                    state = loaded;
                }
                Err(e) => warn!(error = %e, "Failed to load incident snapshot, starting fresh"),
            }
        }

        Ok(Self {
            state: RwLock::new(state),
            persistence_path: Some(path),
        })
    }

    fn persist(&self, state: &StoreState) {
        if let Some(ref path) = self.persistence_path {
            if let Err(e) = save_to_disk(path, state) {
                warn!(error = %e, path = %path.display(), "Failed to persist incident snapshot");
            }
        }
    }
}

fn save_to_disk(path: &Path, state: &StoreState) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let json = serde_json::to_vec(state).context("Failed to serialize incident snapshot")?;

    // Write atomically using temp file
    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;

    file.write_all(&json).context("Failed to write snapshot data")?;
    file.sync_all().context("Failed to sync snapshot file")?;

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, path))?;

    debug!(path = %path.display(), incidents = state.incidents.len(), "Incident snapshot flushed");
    Ok(())
}

fn load_from_disk(path: &Path) -> anyhow::Result<StoreState> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read snapshot {:?}", path))?;
    serde_json::from_slice(&data).context("Failed to deserialize incident snapshot")
}

fn stale(incident: &Incident, expected: IncidentStatus) -> PipelineError {
    PipelineError::StaleState {
        incident_id: incident.id.clone(),
        expected,
        actual: incident.status,
    }
}

#[async_trait]
impl IncidentStore for InMemoryIncidentStore {
    async fn create(&self, new: NewIncident) -> Result<Incident> {
        let mut state = self.state.write().await;
        state.next_sequence += 1;

        let incident = Incident {
            id: IncidentId::from_sequence(state.next_sequence),
            service: new.service,
            error_type: new.error_type,
            error_signature: new.error_signature,
            description: new.description,
            severity: new.severity,
            status: IncidentStatus::Active,
            created_at: new.detected_at,
            updated_at: new.detected_at,
            revision: 0,
            resolution_time_secs: None,
            correlation_result_id: None,
            plan_id: None,
            execution: None,
            documentation: None,
            failed_attempts: 0,
            last_error: None,
            escalation_reason: None,
        };

        state.incidents.insert(incident.id.clone(), incident.clone());
        self.persist(&state);
        Ok(incident)
    }

    async fn get(&self, id: &IncidentId) -> Result<Incident> {
        self.state
            .read()
            .await
            .incidents
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(id.clone()))
    }

    async fn list(&self, query: &IncidentQuery) -> Result<Vec<Incident>> {
        let state = self.state.read().await;
        let mut incidents: Vec<Incident> = state
            .incidents
            .values()
            .filter(|i| query.matches(i))
            .cloned()
            .collect();

        incidents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = query.limit {
            incidents.truncate(limit);
        }
        Ok(incidents)
    }

    async fn transition(
        &self,
        id: &IncidentId,
        from: IncidentStatus,
        to: IncidentStatus,
    ) -> Result<Incident> {
        validate_transition(from, to)?;

        let mut state = self.state.write().await;
        let incident = state.incident_mut(id)?;
        if incident.status != from {
            return Err(stale(incident, from));
        }

        incident.status = to;
        touch(incident);
        let updated = incident.clone();
        self.persist(&state);
        Ok(updated)
    }

    async fn reclaim(
        &self,
        id: &IncidentId,
        status: IncidentStatus,
        expected_revision: u64,
    ) -> Result<Incident> {
        validate_transition(status, status)?;

        let mut state = self.state.write().await;
        let incident = state.incident_mut(id)?;
        if incident.status != status || incident.revision != expected_revision {
            return Err(stale(incident, status));
        }

        touch(incident);
        let updated = incident.clone();
        self.persist(&state);
        Ok(updated)
    }

    async fn raise_severity(&self, id: &IncidentId, severity: Severity) -> Result<Incident> {
        let mut state = self.state.write().await;
        let incident = state.incident_mut(id)?;
        if severity > incident.severity {
            incident.severity = severity;
            touch(incident);
        }
        let updated = incident.clone();
        self.persist(&state);
        Ok(updated)
    }

    async fn save_correlation(&self, result: CorrelationResult) -> Result<()> {
        let mut state = self.state.write().await;
        let id = result.incident_id.clone();
        let result_id = result.id.clone();

        let incident = state.incident_mut(&id)?;
        incident.correlation_result_id = Some(result_id);
        touch(incident);

        let results = state.correlations.entry(id).or_default();
        results.iter_mut().for_each(|r| r.superseded = true);
        results.push(CorrelationResult {
            superseded: false,
            ..result
        });

        self.persist(&state);
        Ok(())
    }

    async fn current_correlation(&self, id: &IncidentId) -> Result<Option<CorrelationResult>> {
        let state = self.state.read().await;
        Ok(state
            .correlations
            .get(id)
            .and_then(|results| results.iter().rev().find(|r| !r.superseded))
            .cloned())
    }

    async fn save_plan(&self, plan: RemediationPlan) -> Result<()> {
        let mut state = self.state.write().await;
        let id = plan.incident_id.clone();
        let plan_id = plan.id.clone();

        let incident = state.incident_mut(&id)?;
        incident.plan_id = Some(plan_id);
        touch(incident);

        let plans = state.plans.entry(id).or_default();
        plans.iter_mut().for_each(|p| p.superseded = true);
        plans.push(RemediationPlan {
            superseded: false,
            ..plan
        });

        self.persist(&state);
        Ok(())
    }

    async fn current_plan(&self, id: &IncidentId) -> Result<Option<RemediationPlan>> {
        let state = self.state.read().await;
        Ok(state
            .plans
            .get(id)
            .and_then(|plans| plans.iter().rev().find(|p| !p.superseded))
            .cloned())
    }

    async fn resolve_approval(
        &self,
        id: &IncidentId,
        decision: ApprovalState,
        to: IncidentStatus,
        reason: Option<&str>,
    ) -> Result<Incident> {
        validate_transition(IncidentStatus::ApprovalRequired, to)?;

        let mut state = self.state.write().await;
        let state = &mut *state;
        let incident = state
            .incidents
            .get_mut(id)
            .ok_or_else(|| PipelineError::NotFound(id.clone()))?;
        if incident.status != IncidentStatus::ApprovalRequired {
            return Err(stale(incident, IncidentStatus::ApprovalRequired));
        }

        let plan = state
            .plans
            .get_mut(id)
            .and_then(|plans| plans.iter_mut().rev().find(|p| !p.superseded))
            .ok_or_else(|| PipelineError::DataUnavailable(format!("no current plan for {}", id)))?;

        plan.approval_state = decision;
        incident.status = to;
        if to == IncidentStatus::FailedEscalated {
            incident.escalation_reason = reason.map(str::to_string);
        }
        touch(incident);

        let updated = incident.clone();
        self.persist(state);
        Ok(updated)
    }

    async fn restart_analysis(&self, id: &IncidentId) -> Result<Incident> {
        let mut state = self.state.write().await;
        let state = &mut *state;
        let incident = state
            .incidents
            .get_mut(id)
            .ok_or_else(|| PipelineError::NotFound(id.clone()))?;
        if incident.status != IncidentStatus::ApprovalRequired {
            return Err(stale(incident, IncidentStatus::ApprovalRequired));
        }

        incident.status = IncidentStatus::Analyzing;
        incident.correlation_result_id = None;
        incident.plan_id = None;
        incident.failed_attempts = 0;
        touch(incident);

        if let Some(results) = state.correlations.get_mut(id) {
            results.iter_mut().for_each(|r| r.superseded = true);
        }
        if let Some(plans) = state.plans.get_mut(id) {
            plans.iter_mut().for_each(|p| p.superseded = true);
        }

        let updated = incident.clone();
        self.persist(state);
        Ok(updated)
    }

    async fn supersede_artifacts(&self, id: &IncidentId) -> Result<()> {
        let mut state = self.state.write().await;

        let incident = state.incident_mut(id)?;
        incident.correlation_result_id = None;
        incident.plan_id = None;
        touch(incident);

        if let Some(results) = state.correlations.get_mut(id) {
            results.iter_mut().for_each(|r| r.superseded = true);
        }
        if let Some(plans) = state.plans.get_mut(id) {
            plans.iter_mut().for_each(|p| p.superseded = true);
        }

        self.persist(&state);
        Ok(())
    }

    async fn record_execution(&self, id: &IncidentId, report: ExecutionReport) -> Result<Incident> {
        let mut state = self.state.write().await;
        let incident = state.incident_mut(id)?;
        incident.execution = Some(report);
        touch(incident);
        let updated = incident.clone();
        self.persist(&state);
        Ok(updated)
    }

    async fn record_documentation(
        &self,
        id: &IncidentId,
        confirmation: DocumentationConfirmation,
        resolution_time_secs: i64,
    ) -> Result<Incident> {
        let mut state = self.state.write().await;
        let incident = state.incident_mut(id)?;
        incident.documentation = Some(confirmation);
        incident.resolution_time_secs = Some(resolution_time_secs);
        touch(incident);
        let updated = incident.clone();
        self.persist(&state);
        Ok(updated)
    }

    async fn record_failure(&self, id: &IncidentId, error: &str) -> Result<Incident> {
        let mut state = self.state.write().await;
        let incident = state.incident_mut(id)?;
        incident.failed_attempts += 1;
        incident.last_error = Some(error.to_string());
        touch(incident);
        let updated = incident.clone();
        self.persist(&state);
        Ok(updated)
    }

    async fn clear_failures(&self, id: &IncidentId) -> Result<()> {
        let mut state = self.state.write().await;
        let incident = state.incident_mut(id)?;
        if incident.failed_attempts > 0 {
            incident.failed_attempts = 0;
            touch(incident);
            self.persist(&state);
        }
        Ok(())
    }

    async fn escalate(
        &self,
        id: &IncidentId,
        from: IncidentStatus,
        reason: &str,
    ) -> Result<Incident> {
        validate_transition(from, IncidentStatus::FailedEscalated)?;

        let mut state = self.state.write().await;
        let incident = state.incident_mut(id)?;
        if incident.status != from {
            return Err(stale(incident, from));
        }

        incident.status = IncidentStatus::FailedEscalated;
        incident.escalation_reason = Some(reason.to_string());
        touch(incident);
        let updated = incident.clone();
        self.persist(&state);
        Ok(updated)
    }

    async fn resolved_history(&self, limit: usize) -> Result<Vec<HistoricalIncident>> {
        let state = self.state.read().await;

        let mut resolved: Vec<&Incident> = state
            .incidents
            .values()
            .filter(|i| i.status == IncidentStatus::Documented)
            .collect();
        resolved.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let current_correlation = |id: &IncidentId| {
            state
                .correlations
                .get(id)
                .and_then(|r| r.iter().rev().find(|r| !r.superseded))
        };
        let current_plan = |id: &IncidentId| {
            state
                .plans
                .get(id)
                .and_then(|p| p.iter().rev().find(|p| !p.superseded))
        };

        let mut history: Vec<HistoricalIncident> = resolved
            .into_iter()
            .map(|incident| HistoricalIncident {
                id: incident.id.clone(),
                service: incident.service.clone(),
                description: incident.description.clone(),
                root_cause: current_correlation(&incident.id).and_then(|c| {
                    c.narrative
                        .as_ref()
                        .map(|n| n.root_cause_summary.clone())
                        .or_else(|| c.top().map(|t| format!("root cause in {}", t.service)))
                }),
                resolution: current_plan(&incident.id).map(|p| p.workflow.clone()),
            })
            .collect();

        history.extend(state.history.iter().cloned());
        history.truncate(limit);
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn new_incident(service: &str) -> NewIncident {
        NewIncident {
            service: service.to_string(),
            error_type: "ErrorRateSpike".to_string(),
            error_signature: "abc123".to_string(),
            description: format!("ErrorRateSpike detected on {}", service),
            severity: Severity::High,
            detected_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let store = InMemoryIncidentStore::new();
        let first = store.create(new_incident("checkout")).await.unwrap();
        let second = store.create(new_incident("auth")).await.unwrap();

        assert_eq!(first.id.as_str(), "INC-001");
        assert_eq!(second.id.as_str(), "INC-002");
        assert_eq!(first.status, IncidentStatus::Active);
    }

    #[tokio::test]
    async fn test_transition_compare_and_set() {
        let store = InMemoryIncidentStore::new();
        let incident = store.create(new_incident("checkout")).await.unwrap();

        let claimed = store
            .transition(&incident.id, IncidentStatus::Active, IncidentStatus::Analyzing)
            .await
            .unwrap();
        assert_eq!(claimed.status, IncidentStatus::Analyzing);
        assert!(claimed.revision > incident.revision);

        let err = store
            .transition(&incident.id, IncidentStatus::Active, IncidentStatus::Analyzing)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StaleState { actual: IncidentStatus::Analyzing, .. }));
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let store = InMemoryIncidentStore::new();
        let incident = store.create(new_incident("checkout")).await.unwrap();

        let err = store
            .transition(&incident.id, IncidentStatus::Active, IncidentStatus::Executing)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTransition { .. }));

        // Status unchanged
        assert_eq!(store.get(&incident.id).await.unwrap().status, IncidentStatus::Active);
    }

    #[tokio::test]
    async fn test_concurrent_claims_exactly_one_wins() {
        let store = Arc::new(InMemoryIncidentStore::new());
        let incident = store.create(new_incident("checkout")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = incident.id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .transition(&id, IncidentStatus::Active, IncidentStatus::Analyzing)
                    .await
            }));
        }

        let mut wins = 0;
        let mut stale_errors = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(PipelineError::StaleState { .. }) => stale_errors += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert_eq!(wins, 1);
        assert_eq!(stale_errors, 7);
    }

    #[tokio::test]
    async fn test_reclaim_requires_matching_revision() {
        let store = InMemoryIncidentStore::new();
        let incident = store.create(new_incident("checkout")).await.unwrap();
        let claimed = store
            .transition(&incident.id, IncidentStatus::Active, IncidentStatus::Analyzing)
            .await
            .unwrap();

        let reclaimed = store
            .reclaim(&incident.id, IncidentStatus::Analyzing, claimed.revision)
            .await
            .unwrap();

        // A second reclaimer with the old revision loses
        let err = store
            .reclaim(&incident.id, IncidentStatus::Analyzing, claimed.revision)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StaleState { .. }));
        assert!(reclaimed.revision > claimed.revision);
    }

    #[tokio::test]
    async fn test_raise_severity_keeps_max() {
        let store = InMemoryIncidentStore::new();
        let incident = store.create(new_incident("checkout")).await.unwrap();

        let lowered = store.raise_severity(&incident.id, Severity::Low).await.unwrap();
        assert_eq!(lowered.severity, Severity::High);

        let raised = store.raise_severity(&incident.id, Severity::Critical).await.unwrap();
        assert_eq!(raised.severity, Severity::Critical);
    }

    #[tokio::test]
    async fn test_save_correlation_supersedes_previous() {
        let store = InMemoryIncidentStore::new();
        let incident = store.create(new_incident("checkout")).await.unwrap();

        let result = |id: &str| CorrelationResult {
            id: id.to_string(),
            incident_id: incident.id.clone(),
            ranked_candidates: vec![],
            related_incidents: vec![],
            degraded: false,
            missing_factors: vec![],
            narrative: None,
            computed_at: Utc::now(),
            superseded: false,
        };

        store.save_correlation(result("COR-1")).await.unwrap();
        store.save_correlation(result("COR-2")).await.unwrap();

        let current = store.current_correlation(&incident.id).await.unwrap().unwrap();
        assert_eq!(current.id, "COR-2");
        assert_eq!(
            store.get(&incident.id).await.unwrap().correlation_result_id.as_deref(),
            Some("COR-2")
        );

        store.supersede_artifacts(&incident.id).await.unwrap();
        assert!(store.current_correlation(&incident.id).await.unwrap().is_none());
    }

    async fn awaiting_approval(store: &InMemoryIncidentStore) -> Incident {
        use IncidentStatus::*;
        let incident = store.create(new_incident("checkout")).await.unwrap();
        for (from, to) in [
            (Active, Analyzing),
            (Analyzing, Analyzed),
            (Analyzed, Planning),
            (Planning, ApprovalRequired),
        ] {
            store.transition(&incident.id, from, to).await.unwrap();
        }
        store
            .save_plan(RemediationPlan {
                id: "PLAN-1".to_string(),
                incident_id: incident.id.clone(),
                workflow: "rollback_deployment".to_string(),
                target_service: Some("payments-db".to_string()),
                risk_tier: crate::models::RiskTier::High,
                approval_state: ApprovalState::PendingApproval,
                confidence: 0.5,
                rationale: "recent deployment".to_string(),
                steps: vec![],
                validation_steps: vec![],
                rollback_steps: vec![],
                estimated_duration_secs: 300,
                generated_at: Utc::now(),
                superseded: false,
            })
            .await
            .unwrap();
        store.get(&incident.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_resolve_approval_sets_plan_and_status_together() {
        let store = InMemoryIncidentStore::new();
        let incident = awaiting_approval(&store).await;

        let executing = store
            .resolve_approval(&incident.id, ApprovalState::Approved, IncidentStatus::Executing, None)
            .await
            .unwrap();
        assert_eq!(executing.status, IncidentStatus::Executing);
        let plan = store.current_plan(&incident.id).await.unwrap().unwrap();
        assert_eq!(plan.approval_state, ApprovalState::Approved);

        // A late rejection neither escalates nor overwrites the approval
        let err = store
            .resolve_approval(
                &incident.id,
                ApprovalState::Rejected,
                IncidentStatus::FailedEscalated,
                Some("too risky"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::StaleState { actual: IncidentStatus::Executing, .. }));
        let plan = store.current_plan(&incident.id).await.unwrap().unwrap();
        assert_eq!(plan.approval_state, ApprovalState::Approved);
        assert!(store.get(&incident.id).await.unwrap().escalation_reason.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_approve_and_reject_exactly_one_wins() {
        let store = Arc::new(InMemoryIncidentStore::new());
        let incident = awaiting_approval(&store).await;

        let approve = {
            let store = store.clone();
            let id = incident.id.clone();
            tokio::spawn(async move {
                store
                    .resolve_approval(&id, ApprovalState::Approved, IncidentStatus::Executing, None)
                    .await
            })
        };
        let reject = {
            let store = store.clone();
            let id = incident.id.clone();
            tokio::spawn(async move {
                store
                    .resolve_approval(
                        &id,
                        ApprovalState::Rejected,
                        IncidentStatus::FailedEscalated,
                        Some("too risky"),
                    )
                    .await
            })
        };
        let approved = approve.await.unwrap();
        let rejected = reject.await.unwrap();
        assert!(approved.is_ok() != rejected.is_ok());

        let stored = store.get(&incident.id).await.unwrap();
        let plan = store.current_plan(&incident.id).await.unwrap().unwrap();
        match stored.status {
            IncidentStatus::Executing => assert_eq!(plan.approval_state, ApprovalState::Approved),
            IncidentStatus::FailedEscalated => {
                assert_eq!(plan.approval_state, ApprovalState::Rejected);
                assert_eq!(stored.escalation_reason.as_deref(), Some("too risky"));
            }
            other => panic!("unexpected status {}", other),
        }
    }

    #[tokio::test]
    async fn test_restart_analysis_supersedes_in_one_step() {
        let store = InMemoryIncidentStore::new();
        let incident = awaiting_approval(&store).await;
        store.record_failure(&incident.id, "flaky").await.unwrap();

        let restarted = store.restart_analysis(&incident.id).await.unwrap();
        assert_eq!(restarted.status, IncidentStatus::Analyzing);
        assert_eq!(restarted.failed_attempts, 0);
        assert!(restarted.plan_id.is_none());
        assert!(store.current_plan(&incident.id).await.unwrap().is_none());

        assert!(store.restart_analysis(&incident.id).await.is_err());
    }

    #[tokio::test]
    async fn test_escalate_records_reason() {
        let store = InMemoryIncidentStore::new();
        let incident = store.create(new_incident("checkout")).await.unwrap();
        store
            .transition(&incident.id, IncidentStatus::Active, IncidentStatus::Analyzing)
            .await
            .unwrap();

        let escalated = store
            .escalate(&incident.id, IncidentStatus::Analyzing, "analysis retries exhausted")
            .await
            .unwrap();
        assert_eq!(escalated.status, IncidentStatus::FailedEscalated);
        assert_eq!(escalated.escalation_reason.as_deref(), Some("analysis retries exhausted"));
    }

    #[tokio::test]
    async fn test_list_filters_and_orders_oldest_first() {
        let store = InMemoryIncidentStore::new();
        let mut older = new_incident("auth");
        older.detected_at = Utc::now() - chrono::Duration::minutes(10);
        store.create(new_incident("checkout")).await.unwrap();
        store.create(older).await.unwrap();

        let active = store
            .list(&IncidentQuery::with_statuses([IncidentStatus::Active]))
            .await
            .unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].service, "auth");

        let limited = store.list(&IncidentQuery::all().limit(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("incidents.json");

        {
            let store = InMemoryIncidentStore::with_persistence(path.clone()).unwrap();
            let incident = store.create(new_incident("checkout")).await.unwrap();
            store
                .transition(&incident.id, IncidentStatus::Active, IncidentStatus::Analyzing)
                .await
                .unwrap();
        }

        let restored = InMemoryIncidentStore::with_persistence(path).unwrap();
        let incident = restored.get(&IncidentId::from_sequence(1)).await.unwrap();
        assert_eq!(incident.status, IncidentStatus::Analyzing);

        // Sequence continues after restart
        let next = restored.create(new_incident("auth")).await.unwrap();
        assert_eq!(next.id.as_str(), "INC-002");
    }

    #[tokio::test]
    async fn test_resolved_history_includes_seeded_entries() {
        let store = InMemoryIncidentStore::new().with_history(vec![HistoricalIncident {
            id: IncidentId::new("INC-900"),
            service: "payments-db".to_string(),
            description: "connection pool exhausted after deploy".to_string(),
            root_cause: Some("bad migration".to_string()),
            resolution: Some("rollback_deployment".to_string()),
        }]);

        let history = store.resolved_history(10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].service, "payments-db");
    }
}
