//! Workflow selection and approval gating

use super::catalog::{
    WorkflowCatalog, WorkflowCatalogEntry, INVESTIGATE_DEPENDENCIES, MANUAL_INTERVENTION,
    ROLLBACK_DEPLOYMENT, SAFE_SERVICE_RESTART, SCALE_PODS_HORIZONTAL,
};
use crate::error::{PipelineError, Result};
use crate::models::{
    ApprovalState, CorrelationResult, FactorKind, Incident, RemediationPlan, RiskTier, Severity,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Failure patterns recognised by the decision table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    ResourcePressure,
    DeploymentCorrelated,
    DependencyPropagation,
    ServiceDegradation,
    LowConfidence,
    Unresolvable,
}

impl Pattern {
    pub fn workflow(&self) -> &'static str {
        match self {
            Pattern::ResourcePressure => SCALE_PODS_HORIZONTAL,
            Pattern::DeploymentCorrelated => ROLLBACK_DEPLOYMENT,
            Pattern::DependencyPropagation => INVESTIGATE_DEPENDENCIES,
            Pattern::ServiceDegradation => SAFE_SERVICE_RESTART,
            Pattern::LowConfidence => INVESTIGATE_DEPENDENCIES,
            Pattern::Unresolvable => MANUAL_INTERVENTION,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Confidence must be strictly above this to auto-approve (default: 0.70)
    pub auto_approve_threshold: f64,
    /// Below this confidence the analysis is treated as inconclusive
    pub low_confidence_threshold: f64,
    /// Below this top score nothing actionable was found
    pub min_actionable_score: f64,
    /// Confidence multiplier when correlation ran degraded
    pub degraded_penalty: f64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            auto_approve_threshold: 0.70,
            low_confidence_threshold: 0.30,
            min_actionable_score: 0.10,
            degraded_penalty: 0.8,
        }
    }
}

/// Auto-approve only eligible, non-HIGH workflows with confidence above threshold
pub fn decide_approval(entry: &WorkflowCatalogEntry, confidence: f64, threshold: f64) -> ApprovalState {
    if entry.name != MANUAL_INTERVENTION
        && entry.auto_approve_eligible
        && entry.risk_tier != RiskTier::High
        && confidence > threshold
    {
        ApprovalState::AutoApproved
    } else {
        ApprovalState::PendingApproval
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    catalog: WorkflowCatalog,
    config: PolicyConfig,
}

impl PolicyEngine {
    pub fn new(catalog: WorkflowCatalog, config: PolicyConfig) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    /// Margin of the top candidate over the runner-up, relative to the top score
    pub fn confidence(&self, correlation: &CorrelationResult) -> f64 {
        let mut scores = correlation.ranked_candidates.iter().map(|c| c.score);
        let confidence = match (scores.next(), scores.next()) {
            (None, _) => 0.0,
            (Some(top), None) => top,
            (Some(top), Some(_)) if top <= 0.0 => 0.0,
            (Some(top), Some(runner_up)) => (top - runner_up) / top,
        };

        let confidence = if correlation.degraded {
            confidence * self.config.degraded_penalty
        } else {
            confidence
        };
        confidence.clamp(0.0, 1.0)
    }

    /// Classify the analysis into a decision-table pattern
    pub fn classify(&self, incident: &Incident, correlation: &CorrelationResult, confidence: f64) -> Pattern {
        let Some(top) = correlation.top() else {
            return Pattern::Unresolvable;
        };
        if top.score < self.config.min_actionable_score {
            return Pattern::Unresolvable;
        }
        if confidence < self.config.low_confidence_threshold {
            return Pattern::LowConfidence;
        }

        match top.dominant_factor().map(|f| f.kind) {
            Some(FactorKind::Deployment) => Pattern::DeploymentCorrelated,
            Some(FactorKind::ResourcePressure) => Pattern::ResourcePressure,
            Some(FactorKind::Dependency) => Pattern::DependencyPropagation,
            Some(FactorKind::RelatedAnomalies)
                if top.service == incident.service && incident.severity >= Severity::High =>
            {
                Pattern::ServiceDegradation
            }
            Some(FactorKind::RelatedAnomalies) => Pattern::DependencyPropagation,
            None => Pattern::Unresolvable,
        }
    }

    fn lookup(&self, name: &str) -> Result<&WorkflowCatalogEntry> {
        self.catalog
            .get(name)
            .ok_or_else(|| PipelineError::PolicyExhausted(format!("workflow `{}` not in catalog", name)))
    }

    /// Select a workflow and approval state for a correlated incident
    pub fn plan(
        &self,
        incident: &Incident,
        correlation: &CorrelationResult,
        now: DateTime<Utc>,
    ) -> RemediationPlan {
        let confidence = self.confidence(correlation);
        let pattern = self.classify(incident, correlation, confidence);

        let entry = match self.lookup(pattern.workflow()) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    incident_id = %incident.id,
                    error = %e,
                    "Falling back to manual intervention"
                );
                self.catalog.manual_intervention()
            }
        };

        let approval_state = decide_approval(entry, confidence, self.config.auto_approve_threshold);
        let target_service = correlation.top().map(|c| c.service.clone());

        let rationale = match (correlation.top(), pattern) {
            (Some(top), Pattern::Unresolvable) | (Some(top), Pattern::LowConfidence) => format!(
                "{:?}: top candidate {} scored {:.2} with confidence {:.2}",
                pattern, top.service, top.score, confidence
            ),
            (Some(top), _) => format!(
                "{:?}: {} ({})",
                pattern,
                top.service,
                top.dominant_factor()
                    .map(|f| f.detail.as_str())
                    .unwrap_or("no dominant factor")
            ),
            (None, _) => format!("{:?}: no candidate root cause found", pattern),
        };

        RemediationPlan {
            id: format!("PLAN-{}-{}", incident.id, now.timestamp_millis()),
            incident_id: incident.id.clone(),
            workflow: entry.name.clone(),
            target_service,
            risk_tier: entry.risk_tier,
            approval_state,
            confidence,
            rationale,
            steps: entry.steps.clone(),
            validation_steps: entry.validation_steps.clone(),
            rollback_steps: entry.rollback_steps.clone(),
            estimated_duration_secs: entry.estimated_duration_secs,
            generated_at: now,
            superseded: false,
        }
    }
}
