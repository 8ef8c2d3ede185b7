//! The Fact Bundle: merged, unreconciled output of every sub-extractor.
//!
//! Facts reference the design through free-text labels (`"Screening"`,
//! `"Week 4 visit"`), never through graph IDs. Resolution happens later.

use crate::design::TitrationStep;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeAnchor {
    pub id: String,
    pub name: String,
    /// e.g. `FirstDose`, `Randomization`, `Screening`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_label: Option<String>,
    #[serde(default)]
    pub provenance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Repetition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_label: Option<String>,
    pub start_day: i32,
    pub end_day: i32,
    pub interval_days: u32,
    #[serde(default)]
    pub provenance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossoverDesign {
    pub id: String,
    /// Treatment orders, e.g. `["AB", "BA"]` or `["A/B/C", "B/C/A", "C/A/B"]`.
    pub sequences: Vec<String>,
    #[serde(default)]
    pub periods: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub washout_days: Option<u32>,
    /// Source sentence(s) the claim was drawn from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default)]
    pub provenance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversalConstraint {
    pub id: String,
    /// Ordered phase labels a subject must pass through.
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exit_labels: Vec<String>,
    #[serde(default)]
    pub provenance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FootnoteCondition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activity_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encounter_labels: Vec<String>,
    #[serde(default)]
    pub provenance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DosingRegimen {
    pub id: String,
    pub treatment_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_day: Option<i32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub titration: Vec<TitrationStep>,
    #[serde(default)]
    pub provenance: String,
}

impl DosingRegimen {
    /// Count of populated optional fields, used to pick a canonical record.
    pub fn completeness(&self) -> usize {
        [
            self.dose.is_some(),
            self.frequency.is_some(),
            self.route.is_some(),
            self.duration.is_some(),
            self.start_day.is_some(),
            !self.titration.is_empty(),
        ]
        .into_iter()
        .filter(|present| *present)
        .count()
    }

    /// Fill every empty field from `other`, keeping populated ones.
    pub fn absorb(&mut self, other: &DosingRegimen) {
        fn fill<T: Clone>(slot: &mut Option<T>, from: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(from);
            }
        }
        fill(&mut self.dose, &other.dose);
        fill(&mut self.frequency, &other.frequency);
        fill(&mut self.route, &other.route);
        fill(&mut self.duration, &other.duration);
        fill(&mut self.start_day, &other.start_day);
        if self.titration.is_empty() {
            self.titration.clone_from(&other.titration);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitWindow {
    pub id: String,
    pub visit_label: String,
    pub target_day: i32,
    #[serde(default)]
    pub before_days: u32,
    #[serde(default)]
    pub after_days: u32,
    #[serde(default)]
    pub provenance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StratificationFactor {
    pub name: String,
    pub levels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomizationScheme {
    pub id: String,
    /// Allocation ratio per arm, e.g. `[2, 1]`.
    #[serde(default)]
    pub ratio: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub stratification: Vec<StratificationFactor>,
    #[serde(default)]
    pub provenance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointAlgorithm {
    pub id: String,
    pub endpoint_name: String,
    pub algorithm: String,
    /// Activities or derived variables the algorithm reads.
    #[serde(default)]
    pub input_labels: Vec<String>,
    #[serde(default)]
    pub provenance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedVariable {
    pub id: String,
    pub name: String,
    pub derivation: String,
    #[serde(default)]
    pub source_labels: Vec<String>,
    #[serde(default)]
    pub provenance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateTransition {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStateMachine {
    pub id: String,
    pub initial_state: String,
    pub states: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<StateTransition>,
    #[serde(default)]
    pub provenance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingConstraint {
    pub id: String,
    pub activity_label: String,
    #[serde(default)]
    pub encounter_labels: Vec<String>,
    /// Relative timepoints, e.g. `"pre-dose"`, `"2h post-dose"`.
    #[serde(default)]
    pub timepoints: Vec<String>,
    #[serde(default)]
    pub provenance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityClassification {
    pub id: String,
    pub activity_label: String,
    pub category: String,
    #[serde(default)]
    pub provenance: String,
}

/// Union of every sub-extractor's output, one collection per fact kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FactBundle {
    pub time_anchors: Vec<TimeAnchor>,
    pub repetitions: Vec<Repetition>,
    pub crossover_designs: Vec<CrossoverDesign>,
    pub traversal_constraints: Vec<TraversalConstraint>,
    pub footnote_conditions: Vec<FootnoteCondition>,
    pub dosing_regimens: Vec<DosingRegimen>,
    pub visit_windows: Vec<VisitWindow>,
    pub randomization_schemes: Vec<RandomizationScheme>,
    pub endpoint_algorithms: Vec<EndpointAlgorithm>,
    pub derived_variables: Vec<DerivedVariable>,
    pub state_machines: Vec<SubjectStateMachine>,
    pub sampling_constraints: Vec<SamplingConstraint>,
    pub activity_classifications: Vec<ActivityClassification>,
}

impl FactBundle {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Append every fact of `other`; duplicates are left for reconciliation.
    pub fn merge(&mut self, other: FactBundle) {
        self.time_anchors.extend(other.time_anchors);
        self.repetitions.extend(other.repetitions);
        self.crossover_designs.extend(other.crossover_designs);
        self.traversal_constraints.extend(other.traversal_constraints);
        self.footnote_conditions.extend(other.footnote_conditions);
        self.dosing_regimens.extend(other.dosing_regimens);
        self.visit_windows.extend(other.visit_windows);
        self.randomization_schemes.extend(other.randomization_schemes);
        self.endpoint_algorithms.extend(other.endpoint_algorithms);
        self.derived_variables.extend(other.derived_variables);
        self.state_machines.extend(other.state_machines);
        self.sampling_constraints.extend(other.sampling_constraints);
        self.activity_classifications
            .extend(other.activity_classifications);
    }

    pub fn fact_count(&self) -> usize {
        self.time_anchors.len()
            + self.repetitions.len()
            + self.crossover_designs.len()
            + self.traversal_constraints.len()
            + self.footnote_conditions.len()
            + self.dosing_regimens.len()
            + self.visit_windows.len()
            + self.randomization_schemes.len()
            + self.endpoint_algorithms.len()
            + self.derived_variables.len()
            + self.state_machines.len()
            + self.sampling_constraints.len()
            + self.activity_classifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fact_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regimen(id: &str) -> DosingRegimen {
        DosingRegimen {
            id: id.to_string(),
            treatment_name: "Drug X".to_string(),
            dose: None,
            frequency: None,
            route: None,
            duration: None,
            start_day: None,
            titration: vec![],
            provenance: String::new(),
        }
    }

    #[test]
    fn absorb_fills_only_missing_fields() {
        let mut a = regimen("a");
        a.dose = Some("10 mg".to_string());
        let mut b = regimen("b");
        b.dose = Some("20 mg".to_string());
        b.route = Some("oral".to_string());

        a.absorb(&b);
        assert_eq!(a.dose.as_deref(), Some("10 mg"));
        assert_eq!(a.route.as_deref(), Some("oral"));
        assert_eq!(a.completeness(), 2);
    }

    #[test]
    fn bundle_decodes_with_missing_collections() {
        let bundle = FactBundle::from_json(r#"{"visitWindows": []}"#).expect("decodes");
        assert!(bundle.is_empty());
    }
}
