//! HTTP collaborators
//!
//! Connection failures, timeouts and 5xx/429 responses are transient and
//! count toward the stage retry bound. Other error statuses and bodies that
//! do not decode are reported as malformed output.

use anyhow::Context;
use async_trait::async_trait;
use pipeline_lib::{
    collaborators::{
        DocumentationCollaborator, DocumentationRequest, ExecutionCollaborator, ExecutionRequest,
        QuerySpec, ResultSet, TelemetrySource,
    },
    models::{DocumentationConfirmation, ExecutionReport},
    narrative::{NarrativeAnalyzer, NarrativeContext},
    PipelineError, Result,
};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use url::Url;

/// JSON-over-HTTP client for one collaborator
pub struct HttpCollaborator {
    name: &'static str,
    client: Client,
    base_url: Url,
}

impl HttpCollaborator {
    pub fn new(name: &'static str, base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid {} URL: {}", name, base_url))?;

        Ok(Self {
            name,
            client,
            base_url,
        })
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| PipelineError::malformed(self.name, format!("invalid path {}: {}", path, e)))?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| PipelineError::transient(self.name, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP {}: {}", status, body);
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(PipelineError::transient(self.name, message))
        } else {
            Err(PipelineError::malformed(self.name, message))
        }
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.post(path, body)
            .await?
            .json()
            .await
            .map_err(|e| PipelineError::malformed(self.name, e.to_string()))
    }

    async fn post_text<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<String> {
        self.post(path, body)
            .await?
            .text()
            .await
            .map_err(|e| PipelineError::transient(self.name, e.to_string()))
    }
}

/// Telemetry query service: `POST /query` with a query spec
pub struct HttpTelemetrySource(HttpCollaborator);

impl HttpTelemetrySource {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self(HttpCollaborator::new("telemetry", base_url, timeout)?))
    }
}

#[async_trait]
impl TelemetrySource for HttpTelemetrySource {
    async fn query(&self, spec: &QuerySpec) -> Result<ResultSet> {
        self.0.post_json("query", spec).await
    }
}

/// Narrative analysis service: `POST /analyze`, raw text response
pub struct HttpNarrativeAnalyzer(HttpCollaborator);

impl HttpNarrativeAnalyzer {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self(HttpCollaborator::new("narrative", base_url, timeout)?))
    }
}

#[async_trait]
impl NarrativeAnalyzer for HttpNarrativeAnalyzer {
    async fn analyze(&self, context: &NarrativeContext) -> Result<String> {
        self.0.post_text("analyze", context).await
    }
}

/// Workflow runner: `POST /workflows/{name}/execute`
pub struct HttpWorkflowExecutor(HttpCollaborator);

impl HttpWorkflowExecutor {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self(HttpCollaborator::new("execution", base_url, timeout)?))
    }
}

#[async_trait]
impl ExecutionCollaborator for HttpWorkflowExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionReport> {
        let path = format!("workflows/{}/execute", request.workflow_name);
        self.0.post_json(&path, request).await
    }
}

/// Documentation service: `POST /incidents/{id}/documentation`
pub struct HttpDocumentationService(HttpCollaborator);

impl HttpDocumentationService {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self(HttpCollaborator::new("documentation", base_url, timeout)?))
    }
}

#[async_trait]
impl DocumentationCollaborator for HttpDocumentationService {
    async fn document(&self, request: &DocumentationRequest) -> Result<DocumentationConfirmation> {
        let path = format!("incidents/{}/documentation", request.incident.id);
        self.0.post_json(&path, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pipeline_lib::models::ExecutionOutcome;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_query_decodes_result_set() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/query")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"columns": ["service", "value"], "rows": [["checkout", 0.5]]}"#)
            .create_async()
            .await;

        let source = HttpTelemetrySource::new(&server.url(), TIMEOUT).unwrap();
        let now = Utc::now();
        let result = source
            .query(&QuerySpec::metrics(now - chrono::Duration::minutes(5), now))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.len(), 1);
        assert_eq!(result.column("value").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/query")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let source = HttpTelemetrySource::new(&server.url(), TIMEOUT).unwrap();
        let now = Utc::now();
        let err = source.query(&QuerySpec::metrics(now, now)).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TransientCollaboratorFailure {
                collaborator: "telemetry",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/workflows/scale_pods_horizontal/execute")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let executor = HttpWorkflowExecutor::new(&server.url(), TIMEOUT).unwrap();
        let request = ExecutionRequest {
            incident_id: pipeline_lib::IncidentId::new("INC-001"),
            workflow_name: "scale_pods_horizontal".to_string(),
            approval_state: pipeline_lib::ApprovalState::AutoApproved,
        };
        let err = executor.execute(&request).await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedCollaboratorOutput { .. }));
    }

    #[tokio::test]
    async fn test_execution_report_decodes() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/workflows/rollback_deployment/execute")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"outcome": "SUCCESS", "log": "rolled back"}"#)
            .create_async()
            .await;

        let executor = HttpWorkflowExecutor::new(&server.url(), TIMEOUT).unwrap();
        let request = ExecutionRequest {
            incident_id: pipeline_lib::IncidentId::new("INC-001"),
            workflow_name: "rollback_deployment".to_string(),
            approval_state: pipeline_lib::ApprovalState::Approved,
        };
        let report = executor.execute(&request).await.unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Success);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(HttpTelemetrySource::new("not a url", TIMEOUT).is_err());
    }
}
