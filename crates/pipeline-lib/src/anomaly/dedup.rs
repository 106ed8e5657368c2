//! Incident deduplication within a sliding window
//!
//! Each (service, error signature) key remembers the incident it created.
//! An entry expires exactly one window after its own creation time; expiry
//! is evaluated lazily when the key is looked up, with a sweep on insert to
//! keep the map bounded.

use crate::models::{IncidentId, Severity};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

/// Default deduplication window (5 minutes)
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 5 * 60;

/// Stable signature for a (service, error type) pair
pub fn error_signature(service: &str, error_type: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", service, error_type).as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// A would-be incident produced by the scorer
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentCandidate {
    pub service: String,
    pub error_type: String,
    pub error_signature: String,
    pub severity: Severity,
    pub description: String,
    pub detected_at: DateTime<Utc>,
}

impl IncidentCandidate {
    pub fn new(
        service: impl Into<String>,
        error_type: impl Into<String>,
        severity: Severity,
        detected_at: DateTime<Utc>,
    ) -> Self {
        let service = service.into();
        let error_type = error_type.into();
        Self {
            error_signature: error_signature(&service, &error_type),
            description: format!("{} detected on {}", error_type, service),
            service,
            error_type,
            severity,
            detected_at,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DedupDecision {
    Create,
    /// An open incident already covers this key
    Suppress { existing: IncidentId },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DedupKey {
    service: String,
    error_signature: String,
}

impl DedupKey {
    fn of(candidate: &IncidentCandidate) -> Self {
        Self {
            service: candidate.service.clone(),
            error_signature: candidate.error_signature.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct DedupEntry {
    incident_id: IncidentId,
    created_at: DateTime<Utc>,
}

/// Sliding-window deduplicator. One instance per detector.
#[derive(Debug)]
pub struct IncidentDeduplicator {
    window: chrono::Duration,
    entries: HashMap<DedupKey, DedupEntry>,
}

impl Default for IncidentDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

impl IncidentDeduplicator {
    /// Create a deduplicator with the default 5-minute window
    pub fn new() -> Self {
        Self {
            window: chrono::Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS as i64),
            entries: HashMap::new(),
        }
    }

    /// Set custom deduplication window
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = chrono::Duration::from_std(window)
            .unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_DEDUP_WINDOW_SECS as i64));
        self
    }

    pub fn window(&self) -> chrono::Duration {
        self.window
    }

    /// Decide whether a candidate opens a new incident.
    ///
    /// `is_open` reports whether a previously created incident is still open;
    /// closed incidents never suppress.
    pub fn should_create(
        &mut self,
        candidate: &IncidentCandidate,
        is_open: impl Fn(&IncidentId) -> bool,
    ) -> DedupDecision {
        let key = DedupKey::of(candidate);

        let Some(entry) = self.entries.get(&key) else {
            return DedupDecision::Create;
        };

        if candidate.detected_at >= entry.created_at + self.window {
            self.entries.remove(&key);
            return DedupDecision::Create;
        }

        if !is_open(&entry.incident_id) {
            self.entries.remove(&key);
            return DedupDecision::Create;
        }

        DedupDecision::Suppress {
            existing: entry.incident_id.clone(),
        }
    }

    /// Record the incident created for a candidate
    pub fn record(&mut self, candidate: &IncidentCandidate, incident_id: IncidentId) {
        let now = candidate.detected_at;
        let window = self.window;

        self.entries.insert(
            DedupKey::of(candidate),
            DedupEntry {
                incident_id,
                created_at: now,
            },
        );

        // Clean up old entries
        self.entries.retain(|_, entry| now < entry.created_at + window);
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

    fn candidate(at: DateTime<Utc>) -> IncidentCandidate {
        IncidentCandidate::new("checkout", "ErrorRateSpike", Severity::High, at)
    }

    #[test]
    fn test_signature_is_stable() {
        let a = error_signature("checkout", "ErrorRateSpike");
        let b = error_signature("checkout", "ErrorRateSpike");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, error_signature("checkout", "LatencyDegradation"));
        assert_ne!(a, error_signature("payments", "ErrorRateSpike"));
    }

    #[test]
    fn test_first_candidate_creates() {
        let mut dedup = IncidentDeduplicator::new();
        assert_eq!(dedup.should_create(&candidate(Utc::now()), |_| true), DedupDecision::Create);
    }

    #[test]
    fn test_duplicate_within_window_is_suppressed() {
        let mut dedup = IncidentDeduplicator::new();
        let t0 = Utc::now();
        let first = candidate(t0);
        dedup.record(&first, IncidentId::from_sequence(1));

        let second = candidate(t0 + chrono::Duration::seconds(299));
        assert_eq!(
            dedup.should_create(&second, |_| true),
            DedupDecision::Suppress {
                existing: IncidentId::from_sequence(1)
            }
        );
    }

    #[test]
    fn test_entry_expires_exactly_at_window() {
        let mut dedup = IncidentDeduplicator::new();
        let t0 = Utc::now();
        dedup.record(&candidate(t0), IncidentId::from_sequence(1));

        let later = candidate(t0 + chrono::Duration::minutes(5));
        assert_eq!(dedup.should_create(&later, |_| true), DedupDecision::Create);
        assert!(dedup.is_empty());
    }

    #[test]
    fn test_expiry_is_per_entry_not_per_suppression() {
        let mut dedup = IncidentDeduplicator::new();
        let t0 = Utc::now();
        dedup.record(&candidate(t0), IncidentId::from_sequence(1));

        // A suppression does not extend the window
        let mid = candidate(t0 + chrono::Duration::minutes(4));
        assert!(matches!(dedup.should_create(&mid, |_| true), DedupDecision::Suppress { .. }));

        let after = candidate(t0 + chrono::Duration::minutes(6));
        assert_eq!(dedup.should_create(&after, |_| true), DedupDecision::Create);
    }

    #[test]
    fn test_closed_incident_does_not_suppress() {
        let mut dedup = IncidentDeduplicator::new();
        let t0 = Utc::now();
        dedup.record(&candidate(t0), IncidentId::from_sequence(1));

        let again = candidate(t0 + chrono::Duration::seconds(30));
        assert_eq!(dedup.should_create(&again, |_| false), DedupDecision::Create);
    }

    #[test]
    fn test_custom_window() {
        let mut dedup = IncidentDeduplicator::new().with_window(Duration::from_secs(60));
        let t0 = Utc::now();
        dedup.record(&candidate(t0), IncidentId::from_sequence(3));

        assert_eq!(dedup.window(), chrono::Duration::seconds(60));
        let later = candidate(t0 + chrono::Duration::seconds(61));
        assert_eq!(dedup.should_create(&later, |_| true), DedupDecision::Create);
    }

    #[test]
    fn test_record_sweeps_expired_entries() {
        let mut dedup = IncidentDeduplicator::new();
        let t0 = Utc::now();
        dedup.record(&candidate(t0), IncidentId::from_sequence(1));

        let other = IncidentCandidate::new(
            "auth",
            "LatencyDegradation",
            Severity::Low,
            t0 + chrono::Duration::minutes(10),
        );
        dedup.record(&other, IncidentId::from_sequence(2));

        assert_eq!(dedup.len(), 1);
    }
}
