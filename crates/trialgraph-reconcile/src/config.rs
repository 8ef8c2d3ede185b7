//! Heuristic constants for one reconciliation pass.
//!
//! None of these thresholds has a clinical derivation. Every field has a
//! default, so a partial JSON file overrides only what it names.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileConfig {
    /// Namespace prefix for side-channel record keys.
    pub namespace: String,
    /// Resolver answers below this confidence count as unresolved.
    pub min_resolver_confidence: f32,
    /// Product of stratification levels above which a scheme is flagged.
    pub max_stratification_cells: usize,
    /// Words that mark arm names as crossover sequences.
    pub sequence_arm_terms: Vec<String>,
    /// Substrings that signal titration/escalation rather than crossover.
    pub titration_terms: Vec<String>,
    /// Leading words that mark a "treatment name" as a prose fragment.
    pub treatment_name_stopwords: Vec<String>,
    /// Longest plausible treatment name, in words.
    pub max_treatment_name_words: usize,
    /// Minimum token similarity for fuzzy timing-reference repair.
    pub fuzzy_match_threshold: f64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            namespace: "x-trialgraph".to_string(),
            min_resolver_confidence: 0.5,
            max_stratification_cells: 16,
            sequence_arm_terms: strings(&["sequence", "seq"]),
            titration_terms: strings(&["titrat", "escalat", "up-dos", "dose ramp"]),
            treatment_name_stopwords: strings(&[
                "a", "an", "the", "and", "or", "of", "with", "for", "to", "in", "on", "at",
                "each", "all", "if", "when", "after", "before", "during", "patients",
                "subjects", "participants", "will", "should", "may", "is", "are",
            ]),
            max_treatment_name_words: 6,
            fuzzy_match_threshold: 0.5,
        }
    }
}

impl ReconcileConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Fully qualified side-channel key, e.g. `x-trialgraph/visitWindows`.
    pub fn record_key(&self, record: &str) -> String {
        format!("{}/{}", self.namespace, record)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ReconcileConfig::from_json(r#"{"maxStratificationCells": 32}"#).expect("parses");
        assert_eq!(cfg.max_stratification_cells, 32);
        assert_eq!(cfg.namespace, "x-trialgraph");
        assert_eq!(cfg.record_key("repetitions"), "x-trialgraph/repetitions");
    }
}
