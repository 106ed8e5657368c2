//! Similarity search over resolved incidents
//!
//! Hybrid score: token overlap of descriptions plus a service-name match.

use crate::models::{HistoricalIncident, Incident, RelatedIncident};
use std::collections::BTreeSet;

const TEXT_WEIGHT: f64 = 0.6;
const SERVICE_WEIGHT: f64 = 0.4;

/// Matches below this are not reported
const MIN_SIMILARITY: f64 = 0.1;

/// Lowercased alphanumeric tokens of at least two characters
pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_lowercase)
        .collect()
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// 1.0 for the same service, 0.5 for related names, 0.0 otherwise
pub fn service_match(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let segments = |s: &str| -> BTreeSet<String> {
        s.split(['-', '_', '.'])
            .filter(|p| !p.is_empty())
            .map(str::to_lowercase)
            .collect()
    };
    if a.contains(b) || b.contains(a) || !segments(a).is_disjoint(&segments(b)) {
        0.5
    } else {
        0.0
    }
}

pub fn similarity(incident: &Incident, historical: &HistoricalIncident) -> f64 {
    let text = jaccard(
        &tokenize(&format!("{} {}", incident.error_type, incident.description)),
        &tokenize(&historical.description),
    );
    let score = TEXT_WEIGHT * text + SERVICE_WEIGHT * service_match(&incident.service, &historical.service);
    score.clamp(0.0, 1.0)
}

/// Most similar resolved incidents, best first
pub fn find_similar(
    incident: &Incident,
    history: &[HistoricalIncident],
    limit: usize,
) -> Vec<RelatedIncident> {
    let mut related: Vec<RelatedIncident> = history
        .iter()
        .filter(|h| h.id != incident.id)
        .filter_map(|h| {
            let similarity = similarity(incident, h);
            (similarity >= MIN_SIMILARITY).then(|| RelatedIncident {
                incident_id: h.id.clone(),
                service: h.service.clone(),
                similarity,
                root_cause: h.root_cause.clone(),
                resolution: h.resolution.clone(),
            })
        })
        .collect();

    related.sort_by(|a, b| {
        b.similarity
            .total_cmp(&a.similarity)
            .then_with(|| a.incident_id.cmp(&b.incident_id))
    });
    related.truncate(limit);
    related
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IncidentId, IncidentStatus, Severity};
    use chrono::Utc;

    fn incident(service: &str, description: &str) -> Incident {
        Incident {
            id: IncidentId::from_sequence(100),
            service: service.to_string(),
            error_type: "ErrorRateSpike".to_string(),
            error_signature: "sig".to_string(),
            description: description.to_string(),
            severity: Severity::High,
            status: IncidentStatus::Analyzing,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            revision: 0,
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

    fn historical(id: u64, service: &str, description: &str) -> HistoricalIncident {
        HistoricalIncident {
            id: IncidentId::from_sequence(id),
            service: service.to_string(),
            description: description.to_string(),
            root_cause: None,
            resolution: None,
        }
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("Error-rate spike on checkout: 5xx, a");
        assert!(tokens.contains("error"));
        assert!(tokens.contains("5xx"));
        assert!(!tokens.contains("a"));
    }

    #[test]
    fn test_service_match() {
        assert_eq!(service_match("checkout", "checkout"), 1.0);
        assert_eq!(service_match("payments-db", "payments-api"), 0.5);
        assert_eq!(service_match("checkout", "checkout-v2"), 0.5);
        assert_eq!(service_match("auth", "search"), 0.0);
    }

    #[test]
    fn test_similarity_bounds() {
        let inc = incident("checkout", "ErrorRateSpike detected on checkout");
        let same = historical(1, "checkout", "ErrorRateSpike detected on checkout");
        let s = similarity(&inc, &same);
        assert!(s <= 1.0 && s > 0.9);

        let unrelated = historical(2, "search", "index rebuild stalled");
        assert_eq!(similarity(&inc, &unrelated), 0.0);
    }

    #[test]
    fn test_find_similar_ranks_and_caps() {
        let inc = incident("checkout", "ErrorRateSpike detected on checkout");
        let history: Vec<HistoricalIncident> = (1..=8)
            .map(|i| historical(i, "checkout", "ErrorRateSpike detected on checkout"))
            .chain(std::iter::once(historical(20, "search", "disk full")))
            .collect();

        let related = find_similar(&inc, &history, 5);
        assert_eq!(related.len(), 5);
        // Equal scores break ties by id
        assert_eq!(related[0].incident_id.as_str(), "INC-001");
        assert!(related.iter().all(|r| r.service == "checkout"));
    }
}
