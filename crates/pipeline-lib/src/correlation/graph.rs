//! Service dependency graph
//!
//! Edges point from a service to the upstream services it depends on, each
//! with a weight in [0, 1] describing how strongly failures propagate.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    #[error("service `{referenced_by}` depends on unknown service `{service}`")]
    UnknownService {
        service: String,
        referenced_by: String,
    },

    #[error("dependency weight {weight} for `{from}` -> `{to}` is outside [0, 1]")]
    InvalidWeight { from: String, to: String, weight: f64 },

    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub service: String,
    pub weight: f64,
}

/// Declarative form, as loaded from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<Dependency>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    services: BTreeSet<String>,
    /// service -> upstream dependencies
    edges: BTreeMap<String, Vec<Dependency>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and validate a graph from declared nodes
    pub fn from_nodes(nodes: Vec<ServiceNode>) -> Result<Self, GraphError> {
        let mut graph = Self::new();
        for node in nodes {
            graph.add_service(&node.name);
            for dep in node.depends_on {
                graph.add_dependency(&node.name, &dep.service, dep.weight);
            }
        }
        graph.validate()?;
        Ok(graph)
    }

    pub fn add_service(&mut self, name: &str) {
        self.services.insert(name.to_string());
    }

    /// `service` depends on `upstream` with the given weight
    pub fn add_dependency(&mut self, service: &str, upstream: &str, weight: f64) {
        self.services.insert(service.to_string());
        self.edges
            .entry(service.to_string())
            .or_default()
            .push(Dependency {
                service: upstream.to_string(),
                weight,
            });
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains(service)
    }

    pub fn dependencies_of(&self, service: &str) -> &[Dependency] {
        self.edges.get(service).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All services reachable upstream of `service` within `max_depth` hops
    pub fn upstream_of(&self, service: &str, max_depth: usize) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut frontier = vec![service.to_string()];
        for _ in 0..max_depth {
            let mut next = Vec::new();
            for node in &frontier {
                for dep in self.dependencies_of(node) {
                    if dep.service != service && seen.insert(dep.service.clone()) {
                        next.push(dep.service.clone());
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        seen
    }

    /// Strength with which a failure in `candidate` reaches `affected`: the
    /// maximum product of edge weights over upstream paths of at most
    /// `max_depth` hops. Zero for the service itself or when unreachable.
    pub fn influence(&self, candidate: &str, affected: &str, max_depth: usize) -> f64 {
        if candidate == affected {
            return 0.0;
        }

        let mut best: HashMap<&str, f64> = HashMap::new();
        let mut frontier: Vec<(&str, f64)> = vec![(affected, 1.0)];
        let mut result = 0.0_f64;

        for _ in 0..max_depth {
            let mut next = Vec::new();
            for (node, strength) in frontier {
                for dep in self.dependencies_of(node) {
                    let reach = strength * dep.weight.clamp(0.0, 1.0);
                    if dep.service == candidate {
                        result = result.max(reach);
                        continue;
                    }
                    let entry = best.entry(dep.service.as_str()).or_insert(0.0);
                    if reach > *entry {
                        *entry = reach;
                        next.push((dep.service.as_str(), reach));
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        result
    }

    /// Check references, weights and acyclicity
    pub fn validate(&self) -> Result<(), GraphError> {
        for (service, deps) in &self.edges {
            for dep in deps {
                if !self.services.contains(&dep.service) {
                    return Err(GraphError::UnknownService {
                        service: dep.service.clone(),
                        referenced_by: service.clone(),
                    });
                }
                if !(0.0..=1.0).contains(&dep.weight) {
                    return Err(GraphError::InvalidWeight {
                        from: service.clone(),
                        to: dep.service.clone(),
                        weight: dep.weight,
                    });
                }
            }
        }

        let mut visited = BTreeSet::new();
        for service in &self.services {
            let mut path = Vec::new();
            self.find_cycle(service, &mut visited, &mut path)?;
        }
        Ok(())
    }

    fn find_cycle<'a>(
        &'a self,
        service: &'a str,
        visited: &mut BTreeSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Result<(), GraphError> {
        if let Some(pos) = path.iter().position(|s| *s == service) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(service.to_string());
            return Err(GraphError::Cycle(cycle));
        }
        if !visited.insert(service) {
            return Ok(());
        }

        path.push(service);
        for dep in self.dependencies_of(service) {
            self.find_cycle(&dep.service, visited, path)?;
        }
        path.pop();
        Ok(())
    }
}
