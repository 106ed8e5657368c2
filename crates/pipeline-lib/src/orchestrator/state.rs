//! Incident status transition table
//!
//! ```text
//! active -> analyzing -> analyzed -> planning -> plan_ready ---------> executing
//!                                             \-> approval_required -/
//! executing -> executed -> documenting -> documented
//! ```
//!
//! In-progress statuses may be re-entered by a reclaim, every stage may
//! escalate to `failed_escalated`, and an operator may send an incident
//! awaiting approval back to analysis.

use crate::error::{PipelineError, Result};
use crate::models::IncidentStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

use IncidentStatus::*;

/// Units of stage work driven by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Analysis,
    Planning,
    Execution,
    Documentation,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Analysis,
        Stage::Planning,
        Stage::Execution,
        Stage::Documentation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Analysis => "analysis",
            Stage::Planning => "planning",
            Stage::Execution => "execution",
            Stage::Documentation => "documentation",
        }
    }

    /// Status held while the stage runs
    pub fn working_status(&self) -> IncidentStatus {
        match self {
            Stage::Analysis => Analyzing,
            Stage::Planning => Planning,
            Stage::Execution => Executing,
            Stage::Documentation => Documenting,
        }
    }

    /// Resting status the stage is claimed from
    pub fn entry_status(&self) -> IncidentStatus {
        match self {
            Stage::Analysis => Active,
            Stage::Planning => Analyzed,
            Stage::Execution => PlanReady,
            Stage::Documentation => Executed,
        }
    }

    /// Stage that runs in the given in-progress status
    pub fn for_working_status(status: IncidentStatus) -> Option<Stage> {
        match status {
            Analyzing => Some(Stage::Analysis),
            Planning => Some(Stage::Planning),
            Executing => Some(Stage::Execution),
            Documenting => Some(Stage::Documentation),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statuses reachable from `from`
pub fn allowed_transitions(from: IncidentStatus) -> &'static [IncidentStatus] {
    match from {
        Active => &[Analyzing],
        Analyzing => &[Analyzed, Analyzing, FailedEscalated],
        Analyzed => &[Planning],
        Planning => &[PlanReady, ApprovalRequired, Planning, FailedEscalated],
        PlanReady => &[Executing],
        ApprovalRequired => &[Executing, Analyzing, FailedEscalated],
        Executing => &[Executed, Executing, FailedEscalated],
        Executed => &[Documenting],
        Documenting => &[Documented, Documenting, FailedEscalated],
        Documented | FailedEscalated => &[],
    }
}

pub fn is_allowed(from: IncidentStatus, to: IncidentStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

pub fn validate_transition(from: IncidentStatus, to: IncidentStatus) -> Result<()> {
    if is_allowed(from, to) {
        Ok(())
    } else {
        Err(PipelineError::InvalidTransition { from, to })
    }
}

/// For a resting status, the in-progress status that claims the next stage
pub fn claim_target(status: IncidentStatus) -> Option<IncidentStatus> {
    match status {
        Active => Some(Analyzing),
        Analyzed => Some(Planning),
        PlanReady => Some(Executing),
        Executed => Some(Documenting),
        _ => None,
    }
}

/// Statuses the monitor never picks up: terminal or waiting on an operator
pub fn is_parked(status: IncidentStatus) -> bool {
    status.is_terminal() || status == ApprovalRequired
}
