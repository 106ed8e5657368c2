//! Baseline computation from historical samples

use crate::models::{Baseline, Observation, QualityFlag, Signal};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Minimum samples for a baseline to be considered reliable
const DEFAULT_MIN_SAMPLES: usize = 100;

/// Computes mean, population standard deviation and p95 per (service, signal)
#[derive(Debug, Clone)]
pub struct BaselineCalculator {
    pub min_samples: usize,
}

impl Default for BaselineCalculator {
    fn default() -> Self {
        Self {
            min_samples: DEFAULT_MIN_SAMPLES,
        }
    }
}

impl BaselineCalculator {
    pub fn new(min_samples: usize) -> Self {
        Self { min_samples }
    }

    /// Compute a baseline from raw samples
    pub fn compute(
        &self,
        service: &str,
        signal: Signal,
        samples: &[f64],
        computed_at: DateTime<Utc>,
    ) -> Baseline {
        let finite: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
        let n = finite.len();

        let quality_flag = if n == 0 {
            QualityFlag::Empty
        } else if n < self.min_samples {
            QualityFlag::LowSampleCount
        } else {
            QualityFlag::Ok
        };

        if n == 0 {
            return Baseline {
                service: service.to_string(),
                signal,
                mean: 0.0,
                stddev: 0.0,
                p95: 0.0,
                sample_count: 0,
                computed_at,
                quality_flag,
            };
        }

        let mean = finite.iter().sum::<f64>() / n as f64;
        let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;

        Baseline {
            service: service.to_string(),
            signal,
            mean,
            stddev: variance.sqrt(),
            p95: percentile(&finite, 0.95),
            sample_count: n as u64,
            computed_at,
            quality_flag,
        }
    }

    /// Group observations per (service, signal) and compute one baseline each
    pub fn compute_all(
        &self,
        observations: &[Observation],
        computed_at: DateTime<Utc>,
    ) -> Vec<Baseline> {
        let mut grouped: BTreeMap<(&str, Signal), Vec<f64>> = BTreeMap::new();
        for obs in observations {
            grouped
                .entry((obs.service.as_str(), obs.signal))
                .or_default()
                .push(obs.value);
        }

        grouped
            .into_iter()
            .map(|((service, signal), samples)| self.compute(service, signal, &samples, computed_at))
            .collect()
    }
}

/// Percentile with linear interpolation between closest ranks
fn percentile(samples: &[f64], q: f64) -> f64 {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = q * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_population_stddev() {
        let calc = BaselineCalculator::new(4);
        let baseline = calc.compute("checkout", Signal::Latency, &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], Utc::now());

        assert!((baseline.mean - 5.0).abs() < 1e-9);
        assert!((baseline.stddev - 2.0).abs() < 1e-9);
        assert_eq!(baseline.sample_count, 8);
        assert_eq!(baseline.quality_flag, QualityFlag::Ok);
    }

    #[test]
    fn test_p95_interpolation() {
        let samples: Vec<f64> = (1..=21).map(|v| v as f64).collect();
        // rank = 0.95 * 20 = 19 -> exact sample
        assert!((percentile(&samples, 0.95) - 20.0).abs() < 1e-9);

        // rank = 0.95 * 3 = 2.85 -> 30 + 0.85 * 10
        assert!((percentile(&[40.0, 10.0, 30.0, 20.0], 0.95) - 38.5).abs() < 1e-9);
    }

    #[test]
    fn test_low_sample_count_flag() {
        let calc = BaselineCalculator::default();
        let baseline = calc.compute("auth", Signal::Cpu, &[0.4, 0.5, 0.6], Utc::now());
        assert_eq!(baseline.quality_flag, QualityFlag::LowSampleCount);
    }

    #[test]
    fn test_empty_samples() {
        let calc = BaselineCalculator::default();
        let baseline = calc.compute("auth", Signal::Cpu, &[f64::NAN], Utc::now());
        assert_eq!(baseline.quality_flag, QualityFlag::Empty);
        assert_eq!(baseline.stddev, 0.0);
    }

    #[test]
    fn test_compute_all_groups_by_key() {
        let now = Utc::now();
        let observations = vec![
            Observation::new("checkout", Signal::ErrorRate, 0.01, now),
            Observation::new("checkout", Signal::ErrorRate, 0.03, now),
            Observation::new("checkout", Signal::Cpu, 0.5, now),
            Observation::new("auth", Signal::ErrorRate, 0.02, now),
        ];

        let baselines = BaselineCalculator::default().compute_all(&observations, now);
        assert_eq!(baselines.len(), 3);

        let checkout = baselines
            .iter()
            .find(|b| b.service == "checkout" && b.signal == Signal::ErrorRate)
            .unwrap();
        assert!((checkout.mean - 0.02).abs() < 1e-12);
        assert_eq!(checkout.sample_count, 2);
    }
}
