//! Periodic baseline recalculation from telemetry

use super::{BaselineCalculator, BaselineStore};
use crate::collaborators::{observations_from_rows, QuerySpec, TelemetrySource};
use crate::error::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BaselineRefreshConfig {
    /// How often baselines are recomputed (default: 1 hour)
    pub interval: Duration,
    /// History window the baselines are computed over (default: 7 days)
    pub lookback: Duration,
}

impl Default for BaselineRefreshConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60 * 60),
            lookback: Duration::from_secs(7 * 24 * 60 * 60),
        }
    }
}

pub struct BaselineRefreshLoop {
    telemetry: Arc<dyn TelemetrySource>,
    store: Arc<BaselineStore>,
    calculator: BaselineCalculator,
    config: BaselineRefreshConfig,
}

impl BaselineRefreshLoop {
    pub fn new(
        telemetry: Arc<dyn TelemetrySource>,
        store: Arc<BaselineStore>,
        config: BaselineRefreshConfig,
    ) -> Self {
        Self {
            telemetry,
            store,
            calculator: BaselineCalculator::default(),
            config,
        }
    }

    pub fn with_calculator(mut self, calculator: BaselineCalculator) -> Self {
        self.calculator = calculator;
        self
    }

    /// Run one calculation cycle and publish it. Returns the number of baselines.
    pub async fn refresh_once(&self) -> Result<usize> {
        let now = Utc::now();
        let lookback = chrono::Duration::from_std(self.config.lookback)
            .unwrap_or_else(|_| chrono::Duration::days(7));

        let rows = self
            .telemetry
            .query(&QuerySpec::metrics(now - lookback, now))
            .await?;
        let observations = observations_from_rows(&rows)?;
        let baselines = self.calculator.compute_all(&observations, now);

        Ok(self.store.publish(baselines, now).await)
    }

    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting baseline refresh loop"
        );

        let mut ticker = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.refresh_once().await {
                        Ok(count) => info!(baselines = count, "Baselines refreshed"),
                        Err(e) => warn!(error = %e, "Baseline refresh failed, keeping previous snapshot"),
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down baseline refresh loop");
                    break;
                }
            }
        }
    }
}
