//! Canonical side-channel records.
//!
//! Facts that do not become graph entities are stored under
//! `design.extensions["<namespace>/<record>"]`, one key per fact type. Each
//! pass replaces the key wholesale, so re-running never appends.

use crate::config::ReconcileConfig;
use crate::resolver::{ResolutionMethod, ResolvedMapping};
use serde::{Deserialize, Serialize};
use trialgraph_model::{Issue, IssueLog, StudyDesign};

pub const TIME_ANCHORS: &str = "timeAnchors";
pub const REPETITIONS: &str = "repetitions";
pub const ACTIVITY_BINDINGS: &str = "activityBindings";
pub const CROSSOVER_DESIGN: &str = "crossoverDesign";
pub const TRAVERSAL_CONSTRAINTS: &str = "traversalConstraints";
pub const FOOTNOTE_CONDITIONS: &str = "footnoteConditions";
pub const DOSING_REGIMENS: &str = "dosingRegimens";
pub const VISIT_WINDOWS: &str = "visitWindows";
pub const RANDOMIZATION: &str = "randomization";
pub const ENDPOINT_ALGORITHMS: &str = "endpointAlgorithms";
pub const DERIVED_VARIABLES: &str = "derivedVariables";
pub const STATE_MACHINES: &str = "stateMachines";
pub const SAMPLING_CONSTRAINTS: &str = "samplingConstraints";
pub const ACTIVITY_CLASSIFICATIONS: &str = "activityClassifications";

/// Every record a pass may write.
pub const ALL_RECORDS: [&str; 14] = [
    TIME_ANCHORS,
    REPETITIONS,
    ACTIVITY_BINDINGS,
    CROSSOVER_DESIGN,
    TRAVERSAL_CONSTRAINTS,
    FOOTNOTE_CONDITIONS,
    DOSING_REGIMENS,
    VISIT_WINDOWS,
    RANDOMIZATION,
    ENDPOINT_ALGORITHMS,
    DERIVED_VARIABLES,
    STATE_MACHINES,
    SAMPLING_CONSTRAINTS,
    ACTIVITY_CLASSIFICATIONS,
];

/// One label of a fact and what it resolved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedRef {
    pub label: String,
    /// Collection the label was resolved against (`epochs`, `derivedVariables`, ...).
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<ResolutionMethod>,
}

impl ResolvedRef {
    pub fn unresolved(label: &str, target: &str) -> Self {
        Self {
            label: label.to_string(),
            target: target.to_string(),
            entity_id: None,
            confidence: 0.0,
            method: None,
        }
    }

    pub fn from_mapping(target: &str, mapping: &ResolvedMapping) -> Self {
        Self {
            label: mapping.label.clone(),
            target: target.to_string(),
            entity_id: Some(mapping.entity_id.clone()),
            confidence: mapping.confidence,
            method: Some(mapping.method),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.entity_id.is_some()
    }
}

/// A fact plus the resolution of every label it carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRecord<T> {
    #[serde(flatten)]
    pub fact: T,
    #[serde(default)]
    pub references: Vec<ResolvedRef>,
}

impl<T> CanonicalRecord<T> {
    pub fn new(fact: T, references: Vec<ResolvedRef>) -> Self {
        Self { fact, references }
    }
}

/// Replace the record stored under `key`.
pub fn write_record<T: Serialize>(
    design: &mut StudyDesign,
    issues: &mut IssueLog,
    key: &str,
    value: &T,
) {
    match serde_json::to_value(value) {
        Ok(v) => design.set_extension(key, v),
        Err(e) => {
            issues.push(Issue::warning(
                "record_serialization_failed",
                format!("/extensions/{key}"),
                format!("failed to serialize side-channel record: {e}"),
            ));
        }
    }
}

/// Remove every record of [`ALL_RECORDS`] under the configured namespace.
///
/// Keys outside the namespace are left alone.
pub fn clear_records(design: &mut StudyDesign, config: &ReconcileConfig) {
    for record in ALL_RECORDS {
        design.remove_extension(&config.record_key(record));
    }
}

/// Decode a record previously written with [`write_record`].
pub fn read_record<T: for<'de> Deserialize<'de>>(design: &StudyDesign, key: &str) -> Option<T> {
    design
        .extension(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}
