//! Incident pipeline - autonomous incident management
//!
//! Detects anomalies in service telemetry, opens deduplicated incidents and
//! drives each one through analysis, planning, execution and documentation.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pipeline_lib::{
    anomaly::{AnomalyScorer, IncidentDetector},
    baseline::{BaselineCalculator, BaselineRefreshLoop, BaselineStore},
    collaborators::TelemetrySource,
    correlation::{CorrelationConfig, CorrelationEngine},
    health::{components, HealthRegistry},
    models::IncidentId,
    observability::StructuredLogger,
    orchestrator::{MonitorLoopBuilder, Orchestrator, OrchestratorBuilder},
    policy::PolicyEngine,
    store::{InMemoryIncidentStore, IncidentStore},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod clients;
mod config;

use clients::{
    HttpDocumentationService, HttpNarrativeAnalyzer, HttpTelemetrySource, HttpWorkflowExecutor,
};
use config::PipelineConfig;

const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "incident-pipeline", version, about = "Autonomous incident management pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Detect incidents and drive them continuously (default)
    Monitor,
    /// Drive a single incident as far as it can go, then exit
    Run {
        #[arg(long, env = "PIPELINE_INCIDENT_ID")]
        incident: String,
    },
    /// Run one detection pass and print the report
    Detect,
}

impl Command {
    fn mode(&self) -> &'static str {
        match self {
            Command::Monitor => "monitor",
            Command::Run { .. } => "run",
            Command::Detect => "detect",
        }
    }
}

/// Everything the modes share
struct Pipeline {
    health: HealthRegistry,
    logger: StructuredLogger,
    telemetry: Arc<dyn TelemetrySource>,
    baselines: Arc<BaselineStore>,
    orchestrator: Arc<Orchestrator>,
    detector: Arc<IncidentDetector>,
}

async fn assemble(config: &PipelineConfig, health: HealthRegistry, logger: StructuredLogger) -> Result<Pipeline> {
    let timeout = Duration::from_secs(config.endpoints.request_timeout_secs);

    let mut store = match &config.store.snapshot_path {
        Some(path) => InMemoryIncidentStore::with_persistence(path.clone())?,
        None => InMemoryIncidentStore::new(),
    };
    let history = config.history()?;
    if !history.is_empty() {
        info!(resolved = history.len(), "Loaded resolved incident history");
        store = store.with_history(history);
    }
    let store: Arc<dyn IncidentStore> = Arc::new(store);

    let telemetry: Arc<dyn TelemetrySource> =
        Arc::new(HttpTelemetrySource::new(&config.endpoints.telemetry, timeout)?);
    let executor = Arc::new(HttpWorkflowExecutor::new(&config.endpoints.executor, timeout)?);
    let documenter = Arc::new(HttpDocumentationService::new(
        &config.endpoints.documentation,
        timeout,
    )?);

    let baselines = Arc::new(BaselineStore::new());
    let scorer = AnomalyScorer::new(config.scorer_config());
    let correlation = CorrelationEngine::new(CorrelationConfig::default(), scorer.clone());
    let policy = PolicyEngine::new(config.workflow_catalog()?, config.policy_config());

    let mut builder = OrchestratorBuilder::new()
        .store(store.clone())
        .telemetry(telemetry.clone())
        .executor(executor)
        .documenter(documenter)
        .baselines(baselines.clone())
        .scorer(scorer.clone())
        .correlation(correlation)
        .policy(policy)
        .retry(config.retry_policy())
        .config(config.orchestrator_config())
        .health(health.clone())
        .logger(logger.clone());

    match config.dependency_graph()? {
        Some(graph) => builder = builder.graph(Arc::new(graph)),
        None => warn!("No dependency graph configured, correlation will run degraded"),
    }
    match &config.endpoints.narrative {
        Some(url) => builder = builder.narrative(Arc::new(HttpNarrativeAnalyzer::new(url, timeout)?)),
        None => info!("Narrative analysis disabled"),
    }
    let orchestrator = Arc::new(builder.build()?);

    let detector = IncidentDetector::new(store, baselines.clone(), telemetry.clone())
        .with_scorer(scorer)
        .with_detection_window(Duration::from_secs(config.detection.window_secs))
        .with_dedup_window(Duration::from_secs(config.detection.dedup_window_secs))
        .with_logger(logger.clone());

    Ok(Pipeline {
        health,
        logger,
        telemetry,
        baselines,
        orchestrator,
        detector: Arc::new(detector),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Monitor);

    let config = PipelineConfig::load()?;
    info!(instance = %config.instance, mode = command.mode(), "Pipeline configured");

    let health = HealthRegistry::new();
    health.register_all().await;

    let logger = StructuredLogger::new(&config.instance);
    logger.log_startup(PIPELINE_VERSION, command.mode());

    let pipeline = assemble(&config, health, logger).await?;

    let refresh = BaselineRefreshLoop::new(
        pipeline.telemetry.clone(),
        pipeline.baselines.clone(),
        config.baseline_refresh_config(),
    )
    .with_calculator(BaselineCalculator::new(config.baseline.min_samples));
    match refresh.refresh_once().await {
        Ok(count) => info!(baselines = count, "Initial baselines computed"),
        Err(e) => {
            warn!(error = %e, "Initial baseline computation failed");
            pipeline
                .health
                .set_degraded(components::TELEMETRY, e.to_string())
                .await;
        }
    }

    match command {
        Command::Run { incident } => {
            let id = IncidentId::new(incident);
            let outcome = pipeline
                .orchestrator
                .process(&id)
                .await
                .with_context(|| format!("Failed to process incident {}", id))?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Command::Detect => {
            let report = pipeline
                .detector
                .poll(Utc::now())
                .await
                .context("Detection pass failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Monitor => run_monitor(&config, pipeline, refresh).await,
    }
}

async fn run_monitor(
    config: &PipelineConfig,
    pipeline: Pipeline,
    refresh: BaselineRefreshLoop,
) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut monitor = MonitorLoopBuilder::new()
        .orchestrator(pipeline.orchestrator.clone())
        .health(pipeline.health.clone())
        .config(config.monitor_config());
    if config.detection.enabled {
        monitor = monitor.detector(pipeline.detector.clone());
    }
    let monitor = monitor.build()?;

    let refresh_handle = tokio::spawn(refresh.run(shutdown_tx.subscribe()));
    let monitor_handle = tokio::spawn(monitor.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(
        pipeline.health.clone(),
        pipeline.orchestrator.clone(),
    ));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Mark pipeline as ready after initialization
    pipeline.health.set_ready(true).await;

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    pipeline.logger.log_shutdown("SIGINT received");
    pipeline.health.set_ready(false).await;

    let _ = shutdown_tx.send(());
    if let Err(e) = monitor_handle.await {
        warn!(error = %e, "Monitor task ended abnormally");
    }
    if let Err(e) = refresh_handle.await {
        warn!(error = %e, "Baseline refresh task ended abnormally");
    }
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
