//! Monitor mode
//!
//! A periodic scan feeds eligible incident ids into a bounded queue drained
//! by a fixed worker pool. Ids already queued or being processed are not
//! enqueued again. On shutdown the scan stops at once, queued ids are
//! dropped, and running workers finish their current stage without claiming
//! another, bounded by the drain deadline.

use super::pipeline::Orchestrator;
use crate::anomaly::IncidentDetector;
use crate::error::PipelineError;
use crate::health::{components, HealthRegistry};
use crate::models::IncidentId;
use crate::observability::PipelineMetrics;
use chrono::Utc;
use dashmap::DashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Scan interval (default: 30 seconds)
    pub poll_interval: Duration,
    /// Concurrent incident workers (default: 4)
    pub workers: usize,
    /// Bounded queue between the scan and the workers
    pub queue_capacity: usize,
    /// How long shutdown waits for running workers (default: 30 seconds)
    pub drain_deadline: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            workers: 4,
            queue_capacity: 100,
            drain_deadline: Duration::from_secs(30),
        }
    }
}

pub struct MonitorLoop {
    orchestrator: Arc<Orchestrator>,
    detector: Option<Arc<IncidentDetector>>,
    health: HealthRegistry,
    config: MonitorConfig,
    metrics: PipelineMetrics,
}

impl MonitorLoop {
    pub fn new(orchestrator: Arc<Orchestrator>, config: MonitorConfig) -> Self {
        Self {
            orchestrator,
            detector: None,
            health: HealthRegistry::new(),
            config,
            metrics: PipelineMetrics::new(),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            workers = self.config.workers,
            "Starting incident monitor"
        );

        let (tx, rx) = mpsc::channel::<IncidentId>(self.config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let in_flight: Arc<DashSet<IncidentId>> = Arc::new(DashSet::new());
        let stopping = Arc::new(AtomicBool::new(false));

        let mut workers: Vec<JoinHandle<()>> = (0..self.config.workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    self.orchestrator.clone(),
                    rx.clone(),
                    in_flight.clone(),
                    stopping.clone(),
                ))
            })
            .collect();

        let mut ticker = interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.scan(&tx, &in_flight).await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down incident monitor");
                    break;
                }
            }
        }

        stopping.store(true, Ordering::SeqCst);
        drop(tx);

        let deadline = Instant::now() + self.config.drain_deadline;
        for (worker, handle) in workers.iter_mut().enumerate() {
            if timeout_at(deadline, &mut *handle).await.is_err() {
                warn!(worker, "Worker did not drain before deadline, aborting");
                handle.abort();
            }
        }
        self.metrics.set_queue_depth(0);
        info!("Incident monitor stopped");
    }

    /// One tick: optional detection pass, then enqueue eligible incidents
    async fn scan(&self, tx: &mpsc::Sender<IncidentId>, in_flight: &DashSet<IncidentId>) {
        let now = Utc::now();

        if let Some(detector) = &self.detector {
            let report = detector.poll(now).await;
            self.health.record(components::DETECTOR, &report).await;
            match report {
                Ok(report) if !report.created.is_empty() => {
                    info!(
                        created = report.created.len(),
                        suppressed = report.suppressed.len(),
                        "Detection pass opened incidents"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Detection pass failed"),
            }
        }

        let eligible = match self.orchestrator.eligible_incidents(now).await {
            Ok(ids) => {
                self.health.set_healthy(components::STORE).await;
                ids
            }
            Err(e) => {
                warn!(error = %e, "Failed to list eligible incidents");
                self.health
                    .set_unhealthy(components::STORE, e.to_string())
                    .await;
                return;
            }
        };

        let mut enqueued = 0usize;
        for id in eligible {
            if !in_flight.insert(id.clone()) {
                continue;
            }
            match tx.try_send(id) {
                Ok(()) => enqueued += 1,
                Err(TrySendError::Full(id)) | Err(TrySendError::Closed(id)) => {
                    in_flight.remove(&id);
                    debug!("Work queue full, deferring remaining incidents");
                    break;
                }
            }
        }

        let depth = tx.max_capacity() - tx.capacity();
        self.metrics.set_queue_depth(depth as i64);
        self.health.set_healthy(components::ORCHESTRATOR).await;
        if enqueued > 0 {
            debug!(enqueued, queue_depth = depth, "Enqueued incidents");
        }
    }
}

async fn run_worker(
    worker: usize,
    orchestrator: Arc<Orchestrator>,
    rx: Arc<Mutex<mpsc::Receiver<IncidentId>>>,
    in_flight: Arc<DashSet<IncidentId>>,
    stopping: Arc<AtomicBool>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(id) = next else {
            break;
        };

        if stopping.load(Ordering::SeqCst) {
            in_flight.remove(&id);
            continue;
        }

        match orchestrator.process_until(&id, &stopping).await {
            Ok(outcome) => debug!(
                worker,
                incident_id = %id,
                status = %outcome.final_status,
                stages = outcome.stages_run.len(),
                "Incident processed"
            ),
            Err(PipelineError::StaleState { actual, .. }) => debug!(
                worker,
                incident_id = %id,
                status = %actual,
                "Claim lost to another worker"
            ),
            Err(e) => warn!(worker, incident_id = %id, error = %e, "Incident processing failed"),
        }

        in_flight.remove(&id);
    }

    debug!(worker, "Worker stopped");
}

/// Builder for the monitor loop
pub struct MonitorLoopBuilder {
    orchestrator: Option<Arc<Orchestrator>>,
    detector: Option<Arc<IncidentDetector>>,
    health: Option<HealthRegistry>,
    config: MonitorConfig,
}

impl MonitorLoopBuilder {
    pub fn new() -> Self {
        Self {
            orchestrator: None,
            detector: None,
            health: None,
            config: MonitorConfig::default(),
        }
    }

    pub fn orchestrator(mut self, orchestrator: Arc<Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    /// Run a detection pass at the start of every tick
    pub fn detector(mut self, detector: Arc<IncidentDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn drain_deadline(mut self, deadline: Duration) -> Self {
        self.config.drain_deadline = deadline;
        self
    }

    pub fn config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> anyhow::Result<MonitorLoop> {
        let orchestrator = self
            .orchestrator
            .ok_or_else(|| anyhow::anyhow!("Orchestrator is required"))?;

        let mut monitor = MonitorLoop::new(orchestrator, self.config);
        monitor.detector = self.detector;
        if let Some(health) = self.health {
            monitor.health = health;
        }
        Ok(monitor)
    }
}

impl Default for MonitorLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
