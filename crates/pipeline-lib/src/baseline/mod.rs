//! Rolling baselines per (service, signal)
//!
//! Baselines are immutable once computed. Each calculation cycle publishes a
//! new snapshot that supersedes the previous entries key by key; readers take
//! an `Arc` to the snapshot current at stage entry.

mod calculator;
mod refresh;

pub use calculator::BaselineCalculator;
pub use refresh::{BaselineRefreshConfig, BaselineRefreshLoop};

use crate::models::{Baseline, Signal};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Point-in-time view of all baselines
#[derive(Debug, Clone, Default)]
pub struct BaselineSnapshot {
    baselines: HashMap<(String, Signal), Baseline>,
    published_at: Option<DateTime<Utc>>,
}

impl BaselineSnapshot {
    pub fn new(baselines: impl IntoIterator<Item = Baseline>) -> Self {
        let mut snapshot = Self::default();
        for baseline in baselines {
            snapshot
                .baselines
                .insert((baseline.service.clone(), baseline.signal), baseline);
        }
        snapshot
    }

    pub fn get(&self, service: &str, signal: Signal) -> Option<&Baseline> {
        self.baselines.get(&(service.to_string(), signal))
    }

    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }

    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published_at
    }

    pub fn iter(&self) -> impl Iterator<Item = &Baseline> {
        self.baselines.values()
    }
}

/// Shared baseline store
#[derive(Debug, Default)]
pub struct BaselineStore {
    current: RwLock<Arc<BaselineSnapshot>>,
}

impl BaselineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_baselines(baselines: impl IntoIterator<Item = Baseline>) -> Self {
        Self {
            current: RwLock::new(Arc::new(BaselineSnapshot::new(baselines))),
        }
    }

    /// Current snapshot
    pub async fn snapshot(&self) -> Arc<BaselineSnapshot> {
        self.current.read().await.clone()
    }

    /// Publish a calculation cycle. New entries supersede existing ones for
    /// the same key; keys absent from the cycle keep their previous baseline.
    pub async fn publish(&self, baselines: Vec<Baseline>, published_at: DateTime<Utc>) -> usize {
        let mut current = self.current.write().await;

        let mut next = BaselineSnapshot::clone(&current);
        let count = baselines.len();
        for baseline in baselines {
            next.baselines
                .insert((baseline.service.clone(), baseline.signal), baseline);
        }
        next.published_at = Some(published_at);

        *current = Arc::new(next);
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QualityFlag;

    fn baseline(service: &str, signal: Signal, mean: f64) -> Baseline {
        Baseline {
            service: service.to_string(),
            signal,
            mean,
            stddev: 1.0,
            p95: mean + 2.0,
            sample_count: 200,
            computed_at: Utc::now(),
            quality_flag: QualityFlag::Ok,
        }
    }

    #[tokio::test]
    async fn test_publish_supersedes_per_key() {
        let store = BaselineStore::with_baselines(vec![
            baseline("checkout", Signal::ErrorRate, 1.0),
            baseline("checkout", Signal::Cpu, 0.5),
        ]);

        let before = store.snapshot().await;

        store
            .publish(vec![baseline("checkout", Signal::ErrorRate, 2.0)], Utc::now())
            .await;

        let after = store.snapshot().await;
        assert_eq!(after.get("checkout", Signal::ErrorRate).unwrap().mean, 2.0);
        assert_eq!(after.get("checkout", Signal::Cpu).unwrap().mean, 0.5);
        assert!(after.published_at().is_some());

        // Readers holding the old snapshot are unaffected
        assert_eq!(before.get("checkout", Signal::ErrorRate).unwrap().mean, 1.0);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let store = BaselineStore::new();
        let snapshot = store.snapshot().await;
        assert!(snapshot.is_empty());
        assert!(snapshot.get("checkout", Signal::Latency).is_none());
    }
}
