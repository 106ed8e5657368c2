//! Pipeline configuration
//!
//! Values come from an optional file named by `PIPELINE_CONFIG`, overridden
//! by `PIPELINE__*` environment variables (e.g. `PIPELINE__RETRY__MAX_ATTEMPTS=5`).

use anyhow::{Context, Result};
use pipeline_lib::{
    anomaly::{ScorerConfig, SeverityThresholds},
    baseline::BaselineRefreshConfig,
    correlation::{DependencyGraph, ServiceNode},
    models::HistoricalIncident,
    orchestrator::{MonitorConfig, OrchestratorConfig, RetryPolicy},
    policy::{PolicyConfig, WorkflowCatalog, WorkflowCatalogEntry},
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Instance name attached to structured log events
    #[serde(default = "default_instance")]
    pub instance: String,

    /// Port for health, metrics and incident endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub endpoints: EndpointConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// JSON list of services and their weighted upstream dependencies
    #[serde(default)]
    pub dependency_graph_path: Option<PathBuf>,

    /// JSON list of workflow entries replacing the built-in catalog
    #[serde(default)]
    pub workflow_catalog_path: Option<PathBuf>,

    #[serde(default)]
    pub scorer: ScorerSettings,

    #[serde(default)]
    pub detection: DetectionSettings,

    #[serde(default)]
    pub baseline: BaselineSettings,

    #[serde(default)]
    pub policy: PolicySettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub monitor: MonitorSettings,
}

/// Collaborator base URLs
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_telemetry_url")]
    pub telemetry: String,
    /// Narrative analysis is skipped when unset
    #[serde(default)]
    pub narrative: Option<String>,
    #[serde(default = "default_executor_url")]
    pub executor: String,
    #[serde(default = "default_documentation_url")]
    pub documentation: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            telemetry: default_telemetry_url(),
            narrative: None,
            executor: default_executor_url(),
            documentation: default_documentation_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// Incident snapshot written through on every change
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    /// Resolved incidents seeded for similarity search
    #[serde(default)]
    pub history_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScorerSettings {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
    pub top_n: usize,
    pub staleness_secs: u64,
}

impl Default for ScorerSettings {
    fn default() -> Self {
        let defaults = ScorerConfig::default();
        Self {
            low: defaults.thresholds.low,
            medium: defaults.thresholds.medium,
            high: defaults.thresholds.high,
            critical: defaults.thresholds.critical,
            top_n: defaults.top_n,
            staleness_secs: defaults.staleness_bound.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Run a detection pass on every monitor tick
    pub enabled: bool,
    pub window_secs: u64,
    pub dedup_window_secs: u64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: 300,
            dedup_window_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BaselineSettings {
    pub refresh_interval_secs: u64,
    pub lookback_hours: u64,
    pub min_samples: usize,
}

impl Default for BaselineSettings {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 3600,
            lookback_hours: 7 * 24,
            min_samples: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub auto_approve_threshold: f64,
    pub low_confidence_threshold: f64,
}

impl Default for PolicySettings {
    fn default() -> Self {
        let defaults = PolicyConfig::default();
        Self {
            auto_approve_threshold: defaults.auto_approve_threshold,
            low_confidence_threshold: defaults.low_confidence_threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub stage_timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            stage_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub poll_interval_secs: u64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub drain_deadline_secs: u64,
    pub stall_timeout_secs: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            workers: 4,
            queue_capacity: 100,
            drain_deadline_secs: 30,
            stall_timeout_secs: 600,
        }
    }
}

fn default_instance() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "incident-pipeline".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_telemetry_url() -> String {
    "http://telemetry:9000".to_string()
}

fn default_executor_url() -> String {
    "http://workflow-runner:9100".to_string()
}

fn default_documentation_url() -> String {
    "http://docs-service:9200".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl PipelineConfig {
    /// Load configuration from an optional file and the environment
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Ok(path) = std::env::var("PIPELINE_CONFIG") {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }

        let config = builder
            .add_source(config::Environment::with_prefix("PIPELINE").separator("__"))
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Invalid pipeline configuration")
    }

    pub fn scorer_config(&self) -> ScorerConfig {
        ScorerConfig {
            thresholds: SeverityThresholds {
                low: self.scorer.low,
                medium: self.scorer.medium,
                high: self.scorer.high,
                critical: self.scorer.critical,
            },
            top_n: self.scorer.top_n,
            staleness_bound: Duration::from_secs(self.scorer.staleness_secs),
            ..ScorerConfig::default()
        }
    }

    pub fn policy_config(&self) -> PolicyConfig {
        PolicyConfig {
            auto_approve_threshold: self.policy.auto_approve_threshold,
            low_confidence_threshold: self.policy.low_confidence_threshold,
            ..PolicyConfig::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            stage_timeout: Duration::from_secs(self.retry.stage_timeout_secs),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            stall_timeout: Duration::from_secs(self.monitor.stall_timeout_secs),
            ..OrchestratorConfig::default()
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_secs(self.monitor.poll_interval_secs),
            workers: self.monitor.workers,
            queue_capacity: self.monitor.queue_capacity,
            drain_deadline: Duration::from_secs(self.monitor.drain_deadline_secs),
        }
    }

    pub fn baseline_refresh_config(&self) -> BaselineRefreshConfig {
        BaselineRefreshConfig {
            interval: Duration::from_secs(self.baseline.refresh_interval_secs),
            lookback: Duration::from_secs(self.baseline.lookback_hours * 3600),
        }
    }

    /// Dependency graph from disk, `None` when not configured
    pub fn dependency_graph(&self) -> Result<Option<DependencyGraph>> {
        let Some(path) = &self.dependency_graph_path else {
            return Ok(None);
        };
        let nodes: Vec<ServiceNode> = read_json(path)?;
        let graph = DependencyGraph::from_nodes(nodes)
            .with_context(|| format!("Invalid dependency graph in {}", path.display()))?;
        Ok(Some(graph))
    }

    pub fn workflow_catalog(&self) -> Result<WorkflowCatalog> {
        match &self.workflow_catalog_path {
            Some(path) => {
                let entries: Vec<WorkflowCatalogEntry> = read_json(path)?;
                Ok(WorkflowCatalog::new(entries))
            }
            None => Ok(WorkflowCatalog::default()),
        }
    }

    pub fn history(&self) -> Result<Vec<HistoricalIncident>> {
        match &self.store.history_path {
            Some(path) => read_json(path),
            None => Ok(Vec::new()),
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
