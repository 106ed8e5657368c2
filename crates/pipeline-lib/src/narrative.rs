//! Narrative root-cause summaries
//!
//! A generative collaborator may add a prose summary to the deterministic
//! ranking. Its raw output is untrusted: anything that does not parse into
//! the expected JSON object is discarded and the ranking stands alone.

use crate::collaborators::async_trait;
use crate::error::{PipelineError, Result};
use crate::models::{Anomaly, Incident, Narrative, RankedCandidate, RelatedIncident};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Context handed to the narrative collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeContext {
    pub incident: Incident,
    pub candidates: Vec<RankedCandidate>,
    pub related_incidents: Vec<RelatedIncident>,
    pub anomalies: Vec<Anomaly>,
}

#[async_trait]
pub trait NarrativeAnalyzer: Send + Sync {
    /// Raw response text, expected to contain a JSON object with
    /// `root_cause_summary`, `confidence` and `reasoning`
    async fn analyze(&self, context: &NarrativeContext) -> Result<String>;
}

#[derive(Deserialize)]
struct RawNarrative {
    root_cause_summary: Option<String>,
    confidence: Option<f64>,
    reasoning: Option<String>,
}

/// Extract the outermost JSON object, tolerating code fences and chatter
fn json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

/// Parse collaborator output into a narrative
pub fn parse_narrative(raw: &str) -> Result<Narrative> {
    let body = json_object(raw)
        .ok_or_else(|| PipelineError::malformed("narrative", "no JSON object in response"))?;

    let parsed: RawNarrative = serde_json::from_str(body)
        .map_err(|e| PipelineError::malformed("narrative", e.to_string()))?;

    let root_cause_summary = parsed
        .root_cause_summary
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| PipelineError::malformed("narrative", "missing root_cause_summary"))?;
    let confidence = parsed
        .confidence
        .ok_or_else(|| PipelineError::malformed("narrative", "missing confidence"))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(PipelineError::malformed(
            "narrative",
            format!("confidence {} outside [0, 1]", confidence),
        ));
    }
    let reasoning = parsed
        .reasoning
        .ok_or_else(|| PipelineError::malformed("narrative", "missing reasoning"))?;

    Ok(Narrative {
        root_cause_summary,
        confidence,
        reasoning,
    })
}

/// Ask the analyzer for a narrative.
///
/// Malformed output yields `Ok(None)` so the caller keeps its deterministic
/// result. Transport failures propagate for the stage retry path.
pub async fn narrate(
    analyzer: &dyn NarrativeAnalyzer,
    context: &NarrativeContext,
) -> Result<Option<Narrative>> {
    let raw = analyzer.analyze(context).await?;

    match parse_narrative(&raw) {
        Ok(narrative) => Ok(Some(narrative)),
        Err(e) => {
            warn!(
                incident_id = %context.incident.id,
                error = %e,
                "Discarding malformed narrative, using deterministic ranking"
            );
            Ok(None)
        }
    }
}
