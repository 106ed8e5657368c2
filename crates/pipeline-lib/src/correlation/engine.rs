//! Weighted multi-factor root-cause ranking

use super::graph::DependencyGraph;
use super::similarity::find_similar;
use crate::anomaly::AnomalyScorer;
use crate::baseline::BaselineSnapshot;
use crate::models::{
    Anomaly, ContributingFactor, CorrelationResult, DeploymentEvent, FactorKind,
    HistoricalIncident, Incident, Observation, RankedCandidate,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Relative weight of each factor in a candidate's score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationWeights {
    pub deployment: f64,
    pub resource_pressure: f64,
    pub dependency: f64,
    pub related_anomalies: f64,
}

impl Default for CorrelationWeights {
    fn default() -> Self {
        Self {
            deployment: 0.35,
            resource_pressure: 0.25,
            dependency: 0.20,
            related_anomalies: 0.20,
        }
    }
}

impl CorrelationWeights {
    fn for_kind(&self, kind: FactorKind) -> f64 {
        match kind {
            FactorKind::Deployment => self.deployment,
            FactorKind::ResourcePressure => self.resource_pressure,
            FactorKind::Dependency => self.dependency,
            FactorKind::RelatedAnomalies => self.related_anomalies,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    /// Window before incident start searched for evidence (default: 30 minutes)
    pub lookback: Duration,
    pub weights: CorrelationWeights,
    pub max_dependency_depth: usize,
    pub max_related: usize,
    /// z-score at which resource pressure saturates
    pub resource_z_saturation: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(30 * 60),
            weights: CorrelationWeights::default(),
            max_dependency_depth: 3,
            max_related: 5,
            resource_z_saturation: 5.0,
        }
    }
}

/// Inputs for one correlation run.
///
/// `deployments` and `graph` are `None` when their source was unavailable;
/// the run then completes in degraded mode.
pub struct CorrelationInput<'a> {
    pub incident: &'a Incident,
    pub observations: &'a [Observation],
    pub baselines: &'a BaselineSnapshot,
    pub deployments: Option<&'a [DeploymentEvent]>,
    pub graph: Option<&'a DependencyGraph>,
    pub history: &'a [HistoricalIncident],
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CorrelationEngine {
    config: CorrelationConfig,
    scorer: AnomalyScorer,
}

impl CorrelationEngine {
    pub fn new(config: CorrelationConfig, scorer: AnomalyScorer) -> Self {
        Self { config, scorer }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    pub fn correlate(&self, input: &CorrelationInput<'_>) -> CorrelationResult {
        let incident = input.incident;
        let lookback = chrono::Duration::from_std(self.config.lookback)
            .unwrap_or_else(|_| chrono::Duration::minutes(30));
        let window_start = incident.created_at - lookback;

        let mut missing_factors = Vec::new();
        if input.deployments.is_none() {
            missing_factors.push("deployments".to_string());
        }
        if input.graph.is_none() {
            missing_factors.push("dependency_graph".to_string());
        }

        let anomalies = self
            .scorer
            .score_all(input.observations, input.baselines, input.now);
        let mut anomalies_by_service: BTreeMap<&str, Vec<&Anomaly>> = BTreeMap::new();
        for anomaly in anomalies.anomalies() {
            anomalies_by_service
                .entry(anomaly.service.as_str())
                .or_default()
                .push(anomaly);
        }

        let deployments: Vec<&DeploymentEvent> = input
            .deployments
            .unwrap_or(&[])
            .iter()
            .filter(|d| d.deployed_at <= incident.created_at && d.deployed_at >= window_start)
            .collect();

        let mut candidates: BTreeSet<&str> = BTreeSet::new();
        candidates.insert(incident.service.as_str());
        candidates.extend(input.observations.iter().map(|o| o.service.as_str()));
        candidates.extend(deployments.iter().map(|d| d.service.as_str()));
        let upstream = input
            .graph
            .map(|g| g.upstream_of(&incident.service, self.config.max_dependency_depth))
            .unwrap_or_default();
        candidates.extend(upstream.iter().map(String::as_str));

        let mut ranked: Vec<RankedCandidate> = candidates
            .into_iter()
            .filter_map(|service| {
                let mut factors = Vec::new();

                if let Some(factor) = self.deployment_factor(service, &deployments, incident.created_at) {
                    factors.push(factor);
                }
                let service_anomalies = anomalies_by_service
                    .get(service)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                if let Some(factor) = self.resource_factor(service_anomalies) {
                    factors.push(factor);
                }
                let dependency_weight = input
                    .graph
                    .map(|g| g.influence(service, &incident.service, self.config.max_dependency_depth))
                    .unwrap_or(0.0);
                if dependency_weight > 0.0 {
                    factors.push(self.weighted(
                        FactorKind::Dependency,
                        dependency_weight,
                        format!("{} depends on {} (weight {:.2})", incident.service, service, dependency_weight),
                    ));
                }
                if let Some(factor) = self.anomaly_factor(service_anomalies) {
                    factors.push(factor);
                }

                let score: f64 = factors.iter().map(|f| f.weighted).sum();
                (score > 0.0).then(|| RankedCandidate {
                    service: service.to_string(),
                    score: score.clamp(0.0, 1.0),
                    dependency_weight,
                    factors,
                })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.dependency_weight.total_cmp(&a.dependency_weight))
                .then_with(|| a.service.cmp(&b.service))
        });

        CorrelationResult {
            id: format!("COR-{}-{}", incident.id, input.now.timestamp_millis()),
            incident_id: incident.id.clone(),
            ranked_candidates: ranked,
            related_incidents: find_similar(incident, input.history, self.config.max_related),
            degraded: !missing_factors.is_empty(),
            missing_factors,
            narrative: None,
            computed_at: input.now,
            superseded: false,
        }
    }

    fn weighted(&self, kind: FactorKind, score: f64, detail: String) -> ContributingFactor {
        let score = score.clamp(0.0, 1.0);
        ContributingFactor {
            kind,
            score,
            weighted: score * self.config.weights.for_kind(kind),
            detail,
        }
    }

    /// Proximity of the latest deployment before incident start
    fn deployment_factor(
        &self,
        service: &str,
        deployments: &[&DeploymentEvent],
        incident_start: DateTime<Utc>,
    ) -> Option<ContributingFactor> {
        let latest = deployments
            .iter()
            .filter(|d| d.service == service)
            .max_by_key(|d| d.deployed_at)?;

        let lookback_secs = self.config.lookback.as_secs_f64().max(1.0);
        let delta = (incident_start - latest.deployed_at).num_milliseconds() as f64 / 1000.0;
        let proximity = 1.0 - delta / lookback_secs;

        Some(self.weighted(
            FactorKind::Deployment,
            proximity,
            format!(
                "{} deployed {} {:.0}m before incident",
                service,
                latest.version,
                delta / 60.0
            ),
        ))
    }

    fn resource_factor(&self, anomalies: &[&Anomaly]) -> Option<ContributingFactor> {
        let strongest = anomalies
            .iter()
            .filter(|a| a.signal.is_resource() && a.z_score > 0.0)
            .max_by(|a, b| a.z_score.total_cmp(&b.z_score))?;

        Some(self.weighted(
            FactorKind::ResourcePressure,
            strongest.z_score / self.config.resource_z_saturation,
            format!("{} pressure z={:.1}", strongest.signal, strongest.z_score),
        ))
    }

    fn anomaly_factor(&self, anomalies: &[&Anomaly]) -> Option<ContributingFactor> {
        let max_severity = anomalies.iter().map(|a| a.severity).max()?;
        let count = anomalies.len();
        let score = 0.7 * max_severity.weight() + 0.3 * (count.min(3) as f64 / 3.0);

        Some(self.weighted(
            FactorKind::RelatedAnomalies,
            score,
            format!("{} anomalous signal(s), max severity {}", count, max_severity),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Baseline, IncidentId, IncidentStatus, QualityFlag, Severity, Signal};

    fn incident(service: &str, created_at: DateTime<Utc>) -> Incident {
        Incident {
            id: IncidentId::from_sequence(1),
            service: service.to_string(),
            error_type: "ErrorRateSpike".to_string(),
            error_signature: "sig".to_string(),
            description: format!("ErrorRateSpike detected on {}", service),
            severity: Severity::Critical,
            status: IncidentStatus::Analyzing,
            created_at,
            updated_at: created_at,
            revision: 1,
            resolution_time_secs: None,
            correlation_result_id: None,
            plan_id: None,
            execution: None,
            documentation: None,
            failed_attempts: 0,
            last_error: None,
            escalation_reason: None,
        }
    }

    fn baseline(service: &str, signal: Signal, mean: f64, stddev: f64) -> Baseline {
        Baseline {
            service: service.to_string(),
            signal,
            mean,
            stddev,
            p95: mean + 2.0 * stddev,
            sample_count: 1000,
            computed_at: Utc::now(),
            quality_flag: QualityFlag::Ok,
        }
    }

    fn graph() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for s in ["checkout", "payments-db", "auth"] {
            graph.add_service(s);
        }
        graph.add_dependency("checkout", "payments-db", 0.9);
        graph.add_dependency("checkout", "auth", 0.6);
        graph
    }

    #[test]
    fn test_recent_deployment_ranks_top() {
        let now = Utc::now();
        let inc = incident("checkout", now);
        let baselines = BaselineSnapshot::new(vec![baseline("checkout", Signal::ErrorRate, 0.02, 0.01)]);
        let observations = vec![Observation::new("checkout", Signal::ErrorRate, 0.082, now)];
        let deployments = vec![DeploymentEvent {
            service: "payments-db".to_string(),
            version: "v2.4.1".to_string(),
            deployed_at: now - chrono::Duration::minutes(3),
        }];
        let graph = graph();

        let result = CorrelationEngine::default().correlate(&CorrelationInput {
            incident: &inc,
            observations: &observations,
            baselines: &baselines,
            deployments: Some(&deployments),
            graph: Some(&graph),
            history: &[],
            now,
        });

        assert!(!result.degraded);
        let top = result.top().unwrap();
        assert_eq!(top.service, "payments-db");
        assert_eq!(top.dominant_factor().unwrap().kind, FactorKind::Deployment);
        // 0.35 * 0.9 + 0.2 * 0.9
        assert!((top.score - 0.495).abs() < 1e-9);
        assert_eq!(result.ranked_candidates[1].service, "checkout");
    }

    #[test]
    fn test_tie_breaks_on_dependency_weight_then_name() {
        let now = Utc::now();
        let inc = incident("checkout", now);
        let deployments = vec![
            DeploymentEvent {
                service: "zeta".to_string(),
                version: "v1".to_string(),
                deployed_at: now - chrono::Duration::minutes(6),
            },
            DeploymentEvent {
                service: "alpha".to_string(),
                version: "v1".to_string(),
                deployed_at: now - chrono::Duration::minutes(6),
            },
            DeploymentEvent {
                service: "beta".to_string(),
                version: "v1".to_string(),
                deployed_at: now - chrono::Duration::minutes(6),
            },
        ];
        let baselines = BaselineSnapshot::default();

        let result = CorrelationEngine::default().correlate(&CorrelationInput {
            incident: &inc,
            observations: &[],
            baselines: &baselines,
            deployments: Some(&deployments),
            graph: None,
            history: &[],
            now,
        });

        let order: Vec<&str> = result
            .ranked_candidates
            .iter()
            .map(|c| c.service.as_str())
            .collect();
        assert_eq!(order, vec!["alpha", "beta", "zeta"]);

        // Same input, same order
        let again = CorrelationEngine::default().correlate(&CorrelationInput {
            incident: &inc,
            observations: &[],
            baselines: &baselines,
            deployments: Some(&deployments),
            graph: None,
            history: &[],
            now,
        });
        assert_eq!(again.ranked_candidates, result.ranked_candidates);
    }

    #[test]
    fn test_equal_scores_prefer_stronger_dependency() {
        let now = Utc::now();
        let inc = incident("checkout", now);
        let baselines = BaselineSnapshot::new(vec![
            baseline("payments-db", Signal::Cpu, 0.5, 0.1),
            baseline("auth", Signal::Cpu, 0.5, 0.1),
        ]);
        // Same pressure on both, graph weights differ, weights zeroed for dependency
        let observations = vec![
            Observation::new("payments-db", Signal::Cpu, 0.9, now),
            Observation::new("auth", Signal::Cpu, 0.9, now),
        ];
        let graph = graph();
        let engine = CorrelationEngine::new(
            CorrelationConfig {
                weights: CorrelationWeights {
                    dependency: 0.0,
                    ..Default::default()
                },
                ..Default::default()
            },
            AnomalyScorer::default(),
        );

        let result = engine.correlate(&CorrelationInput {
            incident: &inc,
            observations: &observations,
            baselines: &baselines,
            deployments: Some(&[]),
            graph: Some(&graph),
            history: &[],
            now,
        });

        assert_eq!(result.ranked_candidates[0].service, "payments-db");
        assert_eq!(result.ranked_candidates[1].service, "auth");
        assert_eq!(result.ranked_candidates[0].score, result.ranked_candidates[1].score);
    }

    #[test]
    fn test_missing_sources_degrade() {
        let now = Utc::now();
        let inc = incident("checkout", now);
        let baselines = BaselineSnapshot::new(vec![baseline("checkout", Signal::Memory, 100.0, 10.0)]);
        let observations = vec![Observation::new("checkout", Signal::Memory, 150.0, now)];

        let result = CorrelationEngine::default().correlate(&CorrelationInput {
            incident: &inc,
            observations: &observations,
            baselines: &baselines,
            deployments: None,
            graph: None,
            history: &[],
            now,
        });

        assert!(result.degraded);
        assert_eq!(result.missing_factors, vec!["deployments", "dependency_graph"]);
        let top = result.top().unwrap();
        assert_eq!(top.service, "checkout");
        assert_eq!(top.dominant_factor().unwrap().kind, FactorKind::ResourcePressure);
    }

    #[test]
    fn test_deployments_outside_window_ignored() {
        let now = Utc::now();
        let inc = incident("checkout", now);
        let deployments = vec![
            DeploymentEvent {
                service: "auth".to_string(),
                version: "v9".to_string(),
                deployed_at: now - chrono::Duration::hours(2),
            },
            DeploymentEvent {
                service: "search".to_string(),
                version: "v3".to_string(),
                deployed_at: now + chrono::Duration::minutes(1),
            },
        ];
        let baselines = BaselineSnapshot::default();

        let result = CorrelationEngine::default().correlate(&CorrelationInput {
            incident: &inc,
            observations: &[],
            baselines: &baselines,
            deployments: Some(&deployments),
            graph: None,
            history: &[],
            now,
        });

        assert!(result.ranked_candidates.is_empty());
    }

    #[test]
    fn test_related_incidents_attached() {
        let now = Utc::now();
        let inc = incident("checkout", now);
        let history = vec![HistoricalIncident {
            id: IncidentId::new("INC-900"),
            service: "checkout".to_string(),
            description: "ErrorRateSpike detected on checkout".to_string(),
            root_cause: Some("bad deploy of payments-db".to_string()),
            resolution: Some("rollback_deployment".to_string()),
        }];
        let baselines = BaselineSnapshot::default();

        let result = CorrelationEngine::default().correlate(&CorrelationInput {
            incident: &inc,
            observations: &[],
            baselines: &baselines,
            deployments: Some(&[]),
            graph: None,
            history: &history,
            now,
        });

        assert_eq!(result.related_incidents.len(), 1);
        assert!(result.related_incidents[0].similarity > 0.9);
        assert!(result.related_incidents[0].similarity <= 1.0);
    }
}
