//! Stage driver for a single incident
//!
//! `Orchestrator::process` claims the next stage of an incident with a
//! compare-and-set on its status, runs the stage under a timeout, and keeps
//! going until the incident reaches a halt point: `approval_required` or a
//! terminal status. Stage failures are retried with exponential backoff and
//! escalate once the retry bound is hit.
//!
//! Operator decisions (`approve`, `request_reanalysis`) only claim the next
//! stage; `resume_claimed` or `spawn_resume` drives the rest, so a dropped
//! request cannot abandon an incident mid-stage.

use super::retry::RetryPolicy;
use super::state::{claim_target, is_parked, Stage};
use crate::anomaly::AnomalyScorer;
use crate::baseline::BaselineStore;
use crate::collaborators::{
    deployments_from_rows, observations_from_rows, DocumentationCollaborator,
    DocumentationRequest, ExecutionCollaborator, ExecutionRequest, QuerySpec, TelemetrySource,
};
use crate::correlation::{CorrelationEngine, CorrelationInput, DependencyGraph};
use crate::error::{PipelineError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::{
    ApprovalState, CorrelationResult, ExecutionOutcome, Incident, IncidentId, IncidentStatus,
};
use crate::narrative::{narrate, NarrativeAnalyzer, NarrativeContext};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::policy::PolicyEngine;
use crate::store::{IncidentQuery, IncidentStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Errors kept per stage in the statistics
const RECENT_ERRORS_PER_STAGE: usize = 10;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// In-progress incidents untouched for this long may be reclaimed (default: 10 minutes)
    pub stall_timeout: Duration,
    /// Maximum incidents returned by one eligibility scan
    pub eligible_limit: usize,
    /// Resolved incidents considered for similarity search
    pub history_limit: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stall_timeout: Duration::from_secs(10 * 60),
            eligible_limit: 50,
            history_limit: 100,
        }
    }
}

/// Where an incident stopped after a `process` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineOutcome {
    pub incident_id: IncidentId,
    pub final_status: IncidentStatus,
    /// Stages completed during this call
    pub stages_run: Vec<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escalation_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageErrorRecord {
    pub incident_id: IncidentId,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Running counters for this orchestrator instance
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub processed: u64,
    pub completed: u64,
    pub awaiting_approval: u64,
    pub escalated: u64,
    /// Most recent failures per stage, newest last
    pub recent_errors: BTreeMap<&'static str, VecDeque<StageErrorRecord>>,
}

impl PipelineStats {
    fn record_error(&mut self, stage: Stage, incident_id: &IncidentId, message: String) {
        let errors = self.recent_errors.entry(stage.as_str()).or_default();
        errors.push_back(StageErrorRecord {
            incident_id: incident_id.clone(),
            message,
            at: Utc::now(),
        });
        while errors.len() > RECENT_ERRORS_PER_STAGE {
            errors.pop_front();
        }
    }
}

pub struct Orchestrator {
    store: Arc<dyn IncidentStore>,
    telemetry: Arc<dyn TelemetrySource>,
    executor: Arc<dyn ExecutionCollaborator>,
    documenter: Arc<dyn DocumentationCollaborator>,
    narrative: Option<Arc<dyn NarrativeAnalyzer>>,
    baselines: Arc<BaselineStore>,
    graph: Option<Arc<DependencyGraph>>,
    scorer: AnomalyScorer,
    correlation: CorrelationEngine,
    policy: PolicyEngine,
    retry: RetryPolicy,
    config: OrchestratorConfig,
    health: HealthRegistry,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
    stats: Mutex<PipelineStats>,
}

impl Orchestrator {
    pub fn store(&self) -> &Arc<dyn IncidentStore> {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn stats(&self) -> PipelineStats {
        self.stats.lock().await.clone()
    }

    /// Drive one incident from its current status to the next halt point
    pub async fn process(&self, id: &IncidentId) -> Result<PipelineOutcome> {
        self.process_until(id, &AtomicBool::new(false)).await
    }

    /// Like `process`, but no further stage is claimed once `stopping` is
    /// set. A stage already running finishes; the incident is left at the
    /// resting status it reaches.
    pub async fn process_until(&self, id: &IncidentId, stopping: &AtomicBool) -> Result<PipelineOutcome> {
        self.stats.lock().await.processed += 1;
        self.drive(id, false, stopping).await
    }

    /// Operator approval of a pending plan. The plan approval and the claim
    /// of `executing` are one store write; the returned incident is owned
    /// by the caller until it is resumed.
    pub async fn approve(&self, id: &IncidentId) -> Result<Incident> {
        let incident = self
            .store
            .resolve_approval(id, ApprovalState::Approved, IncidentStatus::Executing, None)
            .await?;
        self.logger
            .log_transition(id, IncidentStatus::ApprovalRequired, IncidentStatus::Executing);
        info!(event = "plan_approved", incident_id = %id, "Plan approved by operator");
        Ok(incident)
    }

    /// Operator rejection of a pending plan; the incident is escalated
    pub async fn reject(&self, id: &IncidentId, reason: &str) -> Result<Incident> {
        let reason = format!("plan rejected by operator: {}", reason);
        let incident = self
            .store
            .resolve_approval(
                id,
                ApprovalState::Rejected,
                IncidentStatus::FailedEscalated,
                Some(&reason),
            )
            .await?;

        self.metrics.inc_escalations(Stage::Planning);
        self.logger.log_escalation(id, Stage::Planning, &reason);
        self.stats.lock().await.escalated += 1;
        Ok(incident)
    }

    /// Discard the current analysis and plan and claim analysis again
    pub async fn request_reanalysis(&self, id: &IncidentId) -> Result<Incident> {
        let incident = self.store.restart_analysis(id).await?;
        self.logger
            .log_transition(id, IncidentStatus::ApprovalRequired, IncidentStatus::Analyzing);
        info!(event = "reanalysis_requested", incident_id = %id, "Reanalysis requested by operator");
        Ok(incident)
    }

    /// Continue an incident the caller claimed with `approve` or
    /// `request_reanalysis`
    pub async fn resume_claimed(&self, id: &IncidentId) -> Result<PipelineOutcome> {
        self.drive(id, true, &AtomicBool::new(false)).await
    }

    /// `resume_claimed` on a background task, detached from the caller
    pub fn spawn_resume(self: &Arc<Self>, id: IncidentId) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            match orchestrator.resume_claimed(&id).await {
                Ok(outcome) => info!(
                    incident_id = %id,
                    status = %outcome.final_status,
                    stages = outcome.stages_run.len(),
                    "Resumed incident halted"
                ),
                Err(e) => warn!(incident_id = %id, error = %e, "Resumed incident failed"),
            }
        })
    }

    /// Incidents the monitor should pick up, oldest first: resting incidents
    /// with a next stage, and in-progress incidents that have stalled
    pub async fn eligible_incidents(&self, now: DateTime<Utc>) -> Result<Vec<IncidentId>> {
        let incidents = self.store.list(&IncidentQuery::all()).await?;

        Ok(incidents
            .into_iter()
            .filter(|i| !is_parked(i.status))
            .filter(|i| {
                claim_target(i.status).is_some() || (i.status.is_in_progress() && self.is_stalled(i, now))
            })
            .take(self.config.eligible_limit)
            .map(|i| i.id)
            .collect())
    }

    fn is_stalled(&self, incident: &Incident, now: DateTime<Utc>) -> bool {
        let stall = chrono::Duration::from_std(self.config.stall_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(10));
        now - incident.updated_at > stall
    }

    /// Claim and run stages until the incident halts.
    ///
    /// `owned` is set when the caller already moved the incident into an
    /// in-progress status and holds it. Once `stopping` is set nothing new
    /// is claimed or reclaimed.
    async fn drive(
        &self,
        id: &IncidentId,
        mut owned: bool,
        stopping: &AtomicBool,
    ) -> Result<PipelineOutcome> {
        let mut stages_run = Vec::new();

        loop {
            let incident = self.store.get(id).await?;
            let status = incident.status;

            let needs_claim = claim_target(status).is_some() || (!owned && status.is_in_progress());
            if needs_claim && stopping.load(Ordering::SeqCst) {
                info!(
                    incident_id = %id,
                    status = %status,
                    "Shutdown requested, leaving incident for the next run"
                );
                return Ok(self.halt(incident, stages_run).await);
            }

            let stage = if let Some(target) = claim_target(status) {
                self.store.transition(id, status, target).await?;
                self.logger.log_transition(id, status, target);
                Stage::for_working_status(target)
            } else if let Some(stage) = Stage::for_working_status(status) {
                if !owned {
                    if !self.is_stalled(&incident, Utc::now()) {
                        return Err(PipelineError::StaleState {
                            incident_id: id.clone(),
                            expected: stage.entry_status(),
                            actual: status,
                        });
                    }
                    self.store.reclaim(id, status, incident.revision).await?;
                    warn!(
                        event = "incident_reclaimed",
                        incident_id = %id,
                        status = %status,
                        "Reclaimed stalled incident"
                    );
                }
                Some(stage)
            } else {
                None
            };

            let Some(stage) = stage else {
                return Ok(self.halt(incident, stages_run).await);
            };

            owned = true;
            let next = self.run_stage(id, stage).await?;
            stages_run.push(stage);
            self.logger.log_transition(id, stage.working_status(), next);
        }
    }

    async fn halt(&self, incident: Incident, stages_run: Vec<Stage>) -> PipelineOutcome {
        if !stages_run.is_empty() && incident.status == IncidentStatus::ApprovalRequired {
            self.stats.lock().await.awaiting_approval += 1;
            info!(
                event = "awaiting_approval",
                incident_id = %incident.id,
                "Plan requires operator approval"
            );
        }

        PipelineOutcome {
            incident_id: incident.id,
            final_status: incident.status,
            stages_run,
            escalation_reason: incident.escalation_reason,
        }
    }

    /// Run one stage with timeout and bounded retries. Returns the status the
    /// incident moved to.
    async fn run_stage(&self, id: &IncidentId, stage: Stage) -> Result<IncidentStatus> {
        loop {
            let incident = self.store.get(id).await?;

            let start = Instant::now();
            let result = timeout(self.retry.stage_timeout, self.execute_stage(&incident, stage))
                .await
                .unwrap_or_else(|_| {
                    Err(PipelineError::transient(
                        stage.as_str(),
                        format!("attempt timed out after {:?}", self.retry.stage_timeout),
                    ))
                });
            self.metrics.observe_stage_latency(stage, start.elapsed());

            let error = match result {
                Ok(next) => {
                    if incident.failed_attempts > 0 {
                        self.store.clear_failures(id).await?;
                    }
                    return Ok(next);
                }
                Err(e) if e.is_fatal_for_stage() => return Err(e),
                Err(e) => e,
            };

            let message = error.to_string();
            self.metrics.inc_stage_failures(stage);
            self.stats.lock().await.record_error(stage, id, message.clone());

            let updated = self.store.record_failure(id, &message).await?;
            if self.retry.is_exhausted(updated.failed_attempts) {
                let exceeded = PipelineError::RetryBoundExceeded {
                    stage,
                    attempts: updated.failed_attempts,
                    last_error: message,
                };
                return self.escalate(id, stage, &exceeded.to_string()).await;
            }

            let backoff = self.retry.backoff_for(updated.failed_attempts);
            self.logger
                .log_stage_retry(id, stage, updated.failed_attempts, backoff, &message);
            sleep(backoff).await;
        }
    }

    async fn escalate(&self, id: &IncidentId, stage: Stage, reason: &str) -> Result<IncidentStatus> {
        let incident = self.store.escalate(id, stage.working_status(), reason).await?;

        self.metrics.inc_escalations(stage);
        self.logger.log_escalation(id, stage, reason);
        self.stats.lock().await.escalated += 1;
        Ok(incident.status)
    }

    async fn execute_stage(&self, incident: &Incident, stage: Stage) -> Result<IncidentStatus> {
        match stage {
            Stage::Analysis => self.analysis_stage(incident).await,
            Stage::Planning => self.planning_stage(incident).await,
            Stage::Execution => self.execution_stage(incident).await,
            Stage::Documentation => self.documentation_stage(incident).await,
        }
    }

    async fn analysis_stage(&self, incident: &Incident) -> Result<IncidentStatus> {
        if self.store.current_correlation(&incident.id).await?.is_none() {
            let result = self.correlate(incident).await?;
            debug!(
                incident_id = %incident.id,
                candidates = result.ranked_candidates.len(),
                degraded = result.degraded,
                "Correlation complete"
            );
            self.store.save_correlation(result).await?;
        }

        self.advance(incident, IncidentStatus::Analyzing, IncidentStatus::Analyzed)
            .await
    }

    async fn correlate(&self, incident: &Incident) -> Result<CorrelationResult> {
        let now = Utc::now();
        let lookback = chrono::Duration::from_std(self.correlation.config().lookback)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let from = incident.created_at - lookback;

        let metrics = self.telemetry.query(&QuerySpec::metrics(from, now)).await;
        self.health.record(components::TELEMETRY, &metrics).await;
        let observations = observations_from_rows(&metrics?)?;

        let deployments = match self
            .telemetry
            .query(&QuerySpec::deployments(from, incident.created_at))
            .await
            .and_then(|rows| deployments_from_rows(&rows))
        {
            Ok(deployments) => Some(deployments),
            Err(e) => {
                warn!(
                    incident_id = %incident.id,
                    error = %e,
                    "Deployment history unavailable, correlating without it"
                );
                None
            }
        };

        let baselines = self.baselines.snapshot().await;
        let history = self.store.resolved_history(self.config.history_limit).await?;

        let mut result = self.correlation.correlate(&CorrelationInput {
            incident,
            observations: &observations,
            baselines: &baselines,
            deployments: deployments.as_deref(),
            graph: self.graph.as_deref(),
            history: &history,
            now,
        });

        if result.degraded {
            self.health
                .set_degraded(
                    components::TELEMETRY,
                    format!("correlation missing {}", result.missing_factors.join(", ")),
                )
                .await;
        }

        if let Some(analyzer) = &self.narrative {
            let context = NarrativeContext {
                incident: incident.clone(),
                candidates: result.ranked_candidates.clone(),
                related_incidents: result.related_incidents.clone(),
                anomalies: self
                    .scorer
                    .score(&observations, &baselines, now)
                    .into_iter()
                    .collect(),
            };
            let narrative = narrate(analyzer.as_ref(), &context).await;
            self.health.record(components::NARRATIVE, &narrative).await;
            result.narrative = narrative?;
        }

        Ok(result)
    }

    async fn planning_stage(&self, incident: &Incident) -> Result<IncidentStatus> {
        let plan = match self.store.current_plan(&incident.id).await? {
            Some(plan) => plan,
            None => {
                let correlation = self
                    .store
                    .current_correlation(&incident.id)
                    .await?
                    .ok_or_else(|| {
                        PipelineError::DataUnavailable(format!("no correlation result for {}", incident.id))
                    })?;

                let plan = self.policy.plan(incident, &correlation, Utc::now());
                self.logger.log_plan(&plan);
                self.store.save_plan(plan.clone()).await?;
                plan
            }
        };

        let next = if plan.approval_state.permits_execution() {
            IncidentStatus::PlanReady
        } else {
            IncidentStatus::ApprovalRequired
        };
        self.advance(incident, IncidentStatus::Planning, next).await
    }

    async fn execution_stage(&self, incident: &Incident) -> Result<IncidentStatus> {
        let report = match &incident.execution {
            Some(report) => report.clone(),
            None => {
                let plan = self.store.current_plan(&incident.id).await?.ok_or_else(|| {
                    PipelineError::DataUnavailable(format!("no remediation plan for {}", incident.id))
                })?;
                if !plan.approval_state.permits_execution() {
                    return Err(PipelineError::DataUnavailable(format!(
                        "plan {} is {}",
                        plan.id, plan.approval_state
                    )));
                }

                let report = self
                    .executor
                    .execute(&ExecutionRequest {
                        incident_id: incident.id.clone(),
                        workflow_name: plan.workflow.clone(),
                        approval_state: plan.approval_state,
                    })
                    .await?;
                self.store.record_execution(&incident.id, report.clone()).await?;
                report
            }
        };

        match report.outcome {
            ExecutionOutcome::Failure => {
                let reason = format!("workflow execution failed: {}", report.log);
                self.escalate(&incident.id, Stage::Execution, &reason).await
            }
            ExecutionOutcome::Success | ExecutionOutcome::Partial => {
                self.advance(incident, IncidentStatus::Executing, IncidentStatus::Executed)
                    .await
            }
        }
    }

    async fn documentation_stage(&self, incident: &Incident) -> Result<IncidentStatus> {
        if incident.documentation.is_none() {
            let plan = self.store.current_plan(&incident.id).await?.ok_or_else(|| {
                PipelineError::DataUnavailable(format!("no remediation plan for {}", incident.id))
            })?;
            let correlation = self
                .store
                .current_correlation(&incident.id)
                .await?
                .ok_or_else(|| {
                    PipelineError::DataUnavailable(format!("no correlation result for {}", incident.id))
                })?;

            let confirmation = self
                .documenter
                .document(&DocumentationRequest {
                    incident: incident.clone(),
                    plan,
                    correlation,
                    execution: incident.execution.clone(),
                })
                .await?;

            let resolution_time_secs = (Utc::now() - incident.created_at).num_seconds().max(0);
            self.store
                .record_documentation(&incident.id, confirmation, resolution_time_secs)
                .await?;
        }

        let next = self
            .advance(incident, IncidentStatus::Documenting, IncidentStatus::Documented)
            .await?;

        let documented = self.store.get(&incident.id).await?;
        self.metrics.inc_incidents_documented();
        self.logger.log_documented(&documented);
        self.stats.lock().await.completed += 1;
        Ok(next)
    }

    async fn advance(
        &self,
        incident: &Incident,
        from: IncidentStatus,
        to: IncidentStatus,
    ) -> Result<IncidentStatus> {
        Ok(self.store.transition(&incident.id, from, to).await?.status)
    }
}

/// Builder for the orchestrator
pub struct OrchestratorBuilder {
    store: Option<Arc<dyn IncidentStore>>,
    telemetry: Option<Arc<dyn TelemetrySource>>,
    executor: Option<Arc<dyn ExecutionCollaborator>>,
    documenter: Option<Arc<dyn DocumentationCollaborator>>,
    narrative: Option<Arc<dyn NarrativeAnalyzer>>,
    baselines: Option<Arc<BaselineStore>>,
    graph: Option<Arc<DependencyGraph>>,
    scorer: AnomalyScorer,
    correlation: CorrelationEngine,
    policy: PolicyEngine,
    retry: RetryPolicy,
    config: OrchestratorConfig,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            telemetry: None,
            executor: None,
            documenter: None,
            narrative: None,
            baselines: None,
            graph: None,
            scorer: AnomalyScorer::default(),
            correlation: CorrelationEngine::default(),
            policy: PolicyEngine::default(),
            retry: RetryPolicy::default(),
            config: OrchestratorConfig::default(),
            health: None,
            logger: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn IncidentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetrySource>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn ExecutionCollaborator>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn documenter(mut self, documenter: Arc<dyn DocumentationCollaborator>) -> Self {
        self.documenter = Some(documenter);
        self
    }

    /// Without an analyzer, correlation results carry no narrative
    pub fn narrative(mut self, narrative: Arc<dyn NarrativeAnalyzer>) -> Self {
        self.narrative = Some(narrative);
        self
    }

    pub fn baselines(mut self, baselines: Arc<BaselineStore>) -> Self {
        self.baselines = Some(baselines);
        self
    }

    /// Without a graph, every correlation runs degraded
    pub fn graph(mut self, graph: Arc<DependencyGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn scorer(mut self, scorer: AnomalyScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn correlation(mut self, correlation: CorrelationEngine) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn policy(mut self, policy: PolicyEngine) -> Self {
        self.policy = policy;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> anyhow::Result<Orchestrator> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Incident store is required"))?;
        let telemetry = self
            .telemetry
            .ok_or_else(|| anyhow::anyhow!("Telemetry source is required"))?;
        let executor = self
            .executor
            .ok_or_else(|| anyhow::anyhow!("Execution collaborator is required"))?;
        let documenter = self
            .documenter
            .ok_or_else(|| anyhow::anyhow!("Documentation collaborator is required"))?;

        Ok(Orchestrator {
            store,
            telemetry,
            executor,
            documenter,
            narrative: self.narrative,
            baselines: self.baselines.unwrap_or_default(),
            graph: self.graph,
            scorer: self.scorer,
            correlation: self.correlation,
            policy: self.policy,
            retry: self.retry,
            config: self.config,
            health: self.health.unwrap_or_default(),
            metrics: PipelineMetrics::new(),
            logger: self
                .logger
                .unwrap_or_else(|| StructuredLogger::new("pipeline")),
            stats: Mutex::new(PipelineStats::default()),
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
