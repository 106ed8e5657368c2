//! Static catalog of remediation workflows

use crate::models::RiskTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const SAFE_SERVICE_RESTART: &str = "safe_service_restart";
pub const SCALE_PODS_HORIZONTAL: &str = "scale_pods_horizontal";
pub const ROLLBACK_DEPLOYMENT: &str = "rollback_deployment";
pub const INVESTIGATE_DEPENDENCIES: &str = "investigate_dependencies";
pub const MANUAL_INTERVENTION: &str = "manual_intervention";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCatalogEntry {
    pub name: String,
    pub description: String,
    pub risk_tier: RiskTier,
    pub auto_approve_eligible: bool,
    pub estimated_duration_secs: u64,
    pub prerequisites: Vec<String>,
    pub steps: Vec<String>,
    pub validation_steps: Vec<String>,
    pub rollback_steps: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn manual_intervention() -> WorkflowCatalogEntry {
    WorkflowCatalogEntry {
        name: MANUAL_INTERVENTION.to_string(),
        description: "Escalate to on-call engineers for manual investigation".to_string(),
        risk_tier: RiskTier::High,
        auto_approve_eligible: false,
        estimated_duration_secs: 1800,
        prerequisites: vec![],
        steps: strings(&[
            "Page the on-call engineer for the affected service",
            "Attach the correlation result and related incidents",
            "Open an incident bridge",
        ]),
        validation_steps: strings(&["Confirm an engineer acknowledged the page"]),
        rollback_steps: vec![],
    }
}

/// Read-only workflow catalog. `manual_intervention` is always present.
#[derive(Debug, Clone)]
pub struct WorkflowCatalog {
    entries: BTreeMap<String, WorkflowCatalogEntry>,
}

impl Default for WorkflowCatalog {
    fn default() -> Self {
        Self::new(vec![
            WorkflowCatalogEntry {
                name: SAFE_SERVICE_RESTART.to_string(),
                description: "Rolling restart of the affected service".to_string(),
                risk_tier: RiskTier::Low,
                auto_approve_eligible: true,
                estimated_duration_secs: 180,
                prerequisites: strings(&["At least two healthy replicas"]),
                steps: strings(&[
                    "Verify replica count allows a rolling restart",
                    "Restart pods one at a time",
                    "Wait for readiness of each pod",
                ]),
                validation_steps: strings(&[
                    "Error rate back within baseline",
                    "All replicas ready",
                ]),
                rollback_steps: strings(&["None required; restart is non-destructive"]),
            },
            WorkflowCatalogEntry {
                name: SCALE_PODS_HORIZONTAL.to_string(),
                description: "Add replicas to relieve resource pressure".to_string(),
                risk_tier: RiskTier::Medium,
                auto_approve_eligible: true,
                estimated_duration_secs: 300,
                prerequisites: strings(&["Cluster capacity for additional replicas"]),
                steps: strings(&[
                    "Record the current replica count",
                    "Scale replicas up by 50%",
                    "Wait for new pods to become ready",
                ]),
                validation_steps: strings(&[
                    "CPU and memory back under baseline p95",
                    "Latency back within baseline",
                ]),
                rollback_steps: strings(&["Scale back to the recorded replica count"]),
            },
            WorkflowCatalogEntry {
                name: ROLLBACK_DEPLOYMENT.to_string(),
                description: "Roll back the most recent deployment of the suspect service".to_string(),
                risk_tier: RiskTier::High,
                auto_approve_eligible: false,
                estimated_duration_secs: 600,
                prerequisites: strings(&[
                    "Previous revision available",
                    "No irreversible schema migration in the release",
                ]),
                steps: strings(&[
                    "Identify the previous stable revision",
                    "Roll back the deployment",
                    "Monitor rollout status",
                ]),
                validation_steps: strings(&[
                    "Error rate of affected services back within baseline",
                    "Rolled-back revision serving traffic",
                ]),
                rollback_steps: strings(&["Re-deploy the rolled-back revision"]),
            },
            WorkflowCatalogEntry {
                name: INVESTIGATE_DEPENDENCIES.to_string(),
                description: "Gather diagnostics across upstream dependencies".to_string(),
                risk_tier: RiskTier::Low,
                auto_approve_eligible: true,
                estimated_duration_secs: 120,
                prerequisites: vec![],
                steps: strings(&[
                    "Collect health of upstream dependencies",
                    "Capture recent logs of ranked candidates",
                    "Attach diagnostics to the incident",
                ]),
                validation_steps: strings(&["Diagnostics attached"]),
                rollback_steps: vec![],
            },
            manual_intervention(),
        ])
    }
}

impl WorkflowCatalog {
    pub fn new(entries: Vec<WorkflowCatalogEntry>) -> Self {
        let mut entries: BTreeMap<String, WorkflowCatalogEntry> =
            entries.into_iter().map(|e| (e.name.clone(), e)).collect();
        entries
            .entry(MANUAL_INTERVENTION.to_string())
            .or_insert_with(manual_intervention);
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowCatalogEntry> {
        self.entries.get(name)
    }

    pub fn manual_intervention(&self) -> &WorkflowCatalogEntry {
        // Inserted by the constructor
        &self.entries[MANUAL_INTERVENTION]
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_contents() {
        let catalog = WorkflowCatalog::default();
        assert_eq!(catalog.len(), 5);

        let rollback = catalog.get(ROLLBACK_DEPLOYMENT).unwrap();
        assert_eq!(rollback.risk_tier, RiskTier::High);
        assert!(!rollback.auto_approve_eligible);

        let scale = catalog.get(SCALE_PODS_HORIZONTAL).unwrap();
        assert_eq!(scale.risk_tier, RiskTier::Medium);
        assert!(scale.auto_approve_eligible);
        assert!(!scale.rollback_steps.is_empty());
    }

    #[test]
    fn test_manual_intervention_always_present() {
        let catalog = WorkflowCatalog::new(vec![]);
        let manual = catalog.manual_intervention();
        assert_eq!(manual.name, MANUAL_INTERVENTION);
        assert_eq!(manual.risk_tier, RiskTier::High);
        assert!(!manual.auto_approve_eligible);
    }
}
