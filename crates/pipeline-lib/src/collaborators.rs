//! External collaborator interfaces
//!
//! The telemetry store, remediation executor and documentation sink live
//! outside the pipeline. Each is reached through an async trait so that
//! deployments wire in HTTP clients and tests wire in stubs.

use crate::error::{PipelineError, Result};
use crate::models::{
    ApprovalState, CorrelationResult, DeploymentEvent, DocumentationConfirmation,
    ExecutionReport, Incident, IncidentId, Observation, RemediationPlan, Signal,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub use async_trait::async_trait;

/// Logical dataset held by the telemetry store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dataset {
    Metrics,
    Deployments,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// One row per reading
    Raw,
    /// One averaged row per (service, signal)
    Mean,
}

/// A telemetry query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    pub dataset: Dataset,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Empty means every service
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    pub aggregation: Aggregation,
}

impl QuerySpec {
    pub fn metrics(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            dataset: Dataset::Metrics,
            from,
            to,
            services: Vec::new(),
            aggregation: Aggregation::Raw,
        }
    }

    pub fn deployments(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            dataset: Dataset::Deployments,
            from,
            to,
            services: Vec::new(),
            aggregation: Aggregation::Raw,
        }
    }

    pub fn for_services(mut self, services: Vec<String>) -> Self {
        self.services = services;
        self
    }
}

/// Tabular query result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn column(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| PipelineError::malformed("telemetry", format!("missing column `{}`", name)))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn timestamp_at(row: &[Value], idx: usize) -> Option<DateTime<Utc>> {
    row.get(idx)?
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn string_at(row: &[Value], idx: usize) -> Option<String> {
    row.get(idx)?.as_str().map(str::to_string)
}

/// Convert metric rows (`service`, `signal`, `value`, `timestamp`) into observations.
///
/// Rows with unparseable cells are skipped. Missing columns are an error.
pub fn observations_from_rows(result: &ResultSet) -> Result<Vec<Observation>> {
    let service = result.column("service")?;
    let signal = result.column("signal")?;
    let value = result.column("value")?;
    let timestamp = result.column("timestamp")?;

    let mut skipped = 0usize;
    let observations: Vec<Observation> = result
        .rows
        .iter()
        .filter_map(|row| {
            let parsed = (|| {
                Some(Observation {
                    service: string_at(row, service)?,
                    signal: Signal::parse(row.get(signal)?.as_str()?)?,
                    value: row.get(value)?.as_f64()?,
                    timestamp: timestamp_at(row, timestamp)?,
                })
            })();
            if parsed.is_none() {
                skipped += 1;
            }
            parsed
        })
        .collect();

    if skipped > 0 {
        debug!(skipped, "Skipped unparseable metric rows");
    }

    Ok(observations)
}

/// Convert deployment rows (`service`, `version`, `deployed_at`) into events
pub fn deployments_from_rows(result: &ResultSet) -> Result<Vec<DeploymentEvent>> {
    let service = result.column("service")?;
    let version = result.column("version")?;
    let deployed_at = result.column("deployed_at")?;

    Ok(result
        .rows
        .iter()
        .filter_map(|row| {
            Some(DeploymentEvent {
                service: string_at(row, service)?,
                version: string_at(row, version)?,
                deployed_at: timestamp_at(row, deployed_at)?,
            })
        })
        .collect())
}

/// Read access to the telemetry store
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn query(&self, spec: &QuerySpec) -> Result<ResultSet>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub incident_id: IncidentId,
    pub workflow_name: String,
    pub approval_state: ApprovalState,
}

/// Runs remediation workflows
#[async_trait]
pub trait ExecutionCollaborator: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionReport>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentationRequest {
    pub incident: Incident,
    pub plan: RemediationPlan,
    pub correlation: CorrelationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionReport>,
}

/// Produces the post-incident record
#[async_trait]
pub trait DocumentationCollaborator: Send + Sync {
    async fn document(&self, request: &DocumentationRequest) -> Result<DocumentationConfirmation>;
}
