//! Integration tests for the complete Trialgraph pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - JSON design + fact bundle on disk → Enricher → enriched JSON on disk
//! - Enriched graph → Integrity validator
//!
//! Run with: cargo test --test integration_tests

use std::fs;
use tempfile::tempdir;
use trialgraph_model::{EntityKind, FactBundle, GraphError, Severity, StudyDesign};
use trialgraph_reconcile::{validate, DocumentContext, Enricher, ReconcileConfig};

const DESIGN: &str = r#"{
  "id": "study_42",
  "name": "Two-period crossover of Drug X",
  "epochs": [
    {"id": "ep_scr", "name": "Screening"},
    {"id": "ep_trt", "name": "Treatment"},
    {"id": "ep_fu", "name": "Follow-up"}
  ],
  "encounters": [
    {"id": "enc_scr", "name": "Screening", "epochId": "ep_scr", "scheduledDay": -21},
    {"id": "enc_d1", "name": "Day 1", "epochId": "ep_trt", "scheduledDay": 1},
    {"id": "enc_d14", "name": "Day 14", "epochId": "ep_trt", "scheduledDay": 14},
    {"id": "enc_d28", "name": "Day 28", "epochId": "ep_fu", "scheduledDay": 28}
  ],
  "activities": [
    {"id": "act_pk", "name": "PK sampling"},
    {"id": "act_vitals", "name": "Vital signs"}
  ],
  "arms": [
    {"id": "arm_ab", "name": "Sequence AB"},
    {"id": "arm_ba", "name": "Sequence BA"}
  ],
  "interventions": [
    {"id": "int_x", "name": "Drug X"},
    {"id": "int_pbo", "name": "Placebo"}
  ],
  "timings": [
    {"id": "tm_1", "name": "Pre-dose", "relativeToInstance": "FIRST_DOSE", "offsetDays": 0}
  ],
  "extensions": {
    "x-sponsor/notes": {"keep": true}
  }
}"#;

const FACTS: &str = r#"{
  "timeAnchors": [
    {"id": "ta_1", "name": "First Dose", "anchorType": "FirstDose", "day": 1, "encounterLabel": "Day 1"}
  ],
  "repetitions": [
    {"id": "rep_pk", "activityLabel": "PK sampling", "startDay": 1, "endDay": 28, "intervalDays": 13}
  ],
  "crossoverDesigns": [
    {"id": "xo_1", "sequences": ["AB", "BA"], "periods": 2, "washoutDays": 7}
  ],
  "dosingRegimens": [
    {"id": "dr_1", "treatmentName": "Drug X", "dose": "10 mg", "route": "oral"},
    {"id": "dr_2", "treatmentName": "drug x", "frequency": "once daily"},
    {"id": "dr_3", "treatmentName": "the patients should fast overnight."}
  ],
  "visitWindows": [
    {"id": "vw_1", "visitLabel": "Day 14", "targetDay": 14, "beforeDays": 2, "afterDays": 2}
  ],
  "randomizationSchemes": [
    {"id": "rs_1", "ratio": [1, 1], "blockSize": 4, "stratification": [{"name": "Site", "levels": ["US", "EU"]}]}
  ]
}"#;

// ============================================================================
// File round-trip
// ============================================================================

#[test]
fn test_enrich_from_files_round_trip() {
    let dir = tempdir().expect("tempdir");
    let design_path = dir.path().join("design.json");
    let facts_path = dir.path().join("facts.json");
    let out_path = dir.path().join("design.enriched.json");
    fs::write(&design_path, DESIGN).expect("write design");
    fs::write(&facts_path, FACTS).expect("write facts");

    let mut design = StudyDesign::from_json(&fs::read_to_string(&design_path).expect("read")).expect("design");
    let bundle = FactBundle::from_json(&fs::read_to_string(&facts_path).expect("read")).expect("facts");

    let report = Enricher::new(ReconcileConfig::default()).enrich(&mut design, &bundle, &DocumentContext::default());
    fs::write(&out_path, design.to_json_pretty().expect("encode")).expect("write out");

    let reloaded = StudyDesign::from_json(&fs::read_to_string(&out_path).expect("read")).expect("reload");
    assert_eq!(reloaded, design);

    // foreign extension keys survive untouched
    assert_eq!(reloaded.extension("x-sponsor/notes"), Some(&serde_json::json!({"keep": true})));
    assert!(reloaded.extension("x-trialgraph/crossoverDesign").is_some());
    assert!(reloaded.extension("x-trialgraph/randomization").is_some());

    assert!(reloaded.contains(EntityKind::Epoch, "epoch_washout"));
    assert!(reloaded.contains(EntityKind::ScheduledInstance, "si_anchor_first_dose"));
    assert_eq!(reloaded.timings[0].relative_to_instance.as_deref(), Some("si_anchor_first_dose"));
    assert_eq!(reloaded.administrations.len(), 1);
    assert_eq!(report.by_category("dosing_treatment_name_rejected").count(), 1);
    assert!(!report.has_blocking());
}

#[test]
fn test_report_serializes_for_consumers() {
    let mut design = StudyDesign::from_json(DESIGN).expect("design");
    let bundle = FactBundle::from_json(FACTS).expect("facts");
    let report = Enricher::default().enrich(&mut design, &bundle, &DocumentContext::default());

    let json = serde_json::to_value(&report).expect("encode report");
    assert!(json["issues"].is_array());
    assert!(json["generatedAt"].is_string());
    assert_eq!(json["stats"]["droppedFacts"], serde_json::json!(1));
}

// ============================================================================
// Validation over an enriched graph
// ============================================================================

#[test]
fn test_validator_agrees_with_enrichment() {
    let mut design = StudyDesign::from_json(DESIGN).expect("design");
    let bundle = FactBundle::from_json(FACTS).expect("facts");
    let config = ReconcileConfig::default();
    let report = Enricher::new(config.clone()).enrich(&mut design, &bundle, &DocumentContext::default());

    let standalone = validate(&design, &config);
    let from_report = report
        .issues
        .iter()
        .filter(|i| i.category.starts_with("binding_") || i.category == "duplicate_epoch_name")
        .count();
    let from_validator = standalone
        .iter()
        .filter(|i| i.category.starts_with("binding_") || i.category == "duplicate_epoch_name")
        .count();
    assert_eq!(from_report, from_validator);
    assert!(standalone.iter().all(|i| i.severity != Severity::Blocking));
}

#[test]
fn test_missing_required_collection_is_fatal() {
    let err = StudyDesign::from_json(r#"{"epochs": [], "encounters": []}"#).unwrap_err();
    assert!(matches!(err, GraphError::MissingCollection("activities")));
}

#[test]
fn test_custom_namespace_moves_records() {
    let mut design = StudyDesign::from_json(DESIGN).expect("design");
    let bundle = FactBundle::from_json(FACTS).expect("facts");
    let config = ReconcileConfig::from_json(r#"{"namespace": "x-acme"}"#).expect("config");

    Enricher::new(config).enrich(&mut design, &bundle, &DocumentContext::default());

    assert!(design.extension("x-acme/timeAnchors").is_some());
    assert!(design.extension("x-trialgraph/timeAnchors").is_none());
}
