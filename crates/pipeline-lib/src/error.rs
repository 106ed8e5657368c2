//! Error types for the incident pipeline

use crate::models::{IncidentId, IncidentStatus};
use crate::orchestrator::Stage;
use thiserror::Error;

/// Errors raised by pipeline components
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// A required input could not be obtained
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("{collaborator} failed: {message}")]
    TransientCollaboratorFailure {
        collaborator: &'static str,
        message: String,
    },

    #[error("malformed output from {collaborator}: {message}")]
    MalformedCollaboratorOutput {
        collaborator: &'static str,
        message: String,
    },

    /// No catalog workflow matched the analysis
    #[error("no workflow available: {0}")]
    PolicyExhausted(String),

    #[error("{stage} stage failed after {attempts} attempts: {last_error}")]
    RetryBoundExceeded {
        stage: Stage,
        attempts: u32,
        last_error: String,
    },

    /// A compare-and-set on incident status lost the race
    #[error("incident {incident_id} is {actual}, expected {expected}")]
    StaleState {
        incident_id: IncidentId,
        expected: IncidentStatus,
        actual: IncidentStatus,
    },

    #[error("transition {from} -> {to} is not allowed")]
    InvalidTransition {
        from: IncidentStatus,
        to: IncidentStatus,
    },

    #[error("incident {0} not found")]
    NotFound(IncidentId),

    #[error("storage error: {0}")]
    Storage(String),
}

impl PipelineError {
    pub fn transient(collaborator: &'static str, message: impl Into<String>) -> Self {
        PipelineError::TransientCollaboratorFailure {
            collaborator,
            message: message.into(),
        }
    }

    pub fn malformed(collaborator: &'static str, message: impl Into<String>) -> Self {
        PipelineError::MalformedCollaboratorOutput {
            collaborator,
            message: message.into(),
        }
    }

    /// Errors that must abort a stage instead of counting toward its retry bound
    pub fn is_fatal_for_stage(&self) -> bool {
        matches!(
            self,
            PipelineError::StaleState { .. }
                | PipelineError::InvalidTransition { .. }
                | PipelineError::NotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
