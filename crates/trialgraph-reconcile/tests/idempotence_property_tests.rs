//! Property tests: a second enrichment pass over its own output changes nothing.

use proptest::prelude::*;
use trialgraph_model::{
    Arm, CrossoverDesign, EntityKind, FactBundle, Repetition, StudyDesign, TimeAnchor, Timing,
    VisitWindow,
};
use trialgraph_reconcile::{DocumentContext, EnrichmentReport, Enricher, ReconcileConfig};

// ============================================================================
// Strategies
// ============================================================================

fn base_design() -> StudyDesign {
    let value = serde_json::json!({
        "id": "study_prop",
        "epochs": [
            {"id": "ep_scr", "name": "Screening"},
            {"id": "ep_trt", "name": "Treatment"},
            {"id": "ep_fu", "name": "Follow-up"}
        ],
        "encounters": [
            {"id": "enc_scr", "name": "Screening Visit", "epochId": "ep_scr", "scheduledDay": -7},
            {"id": "enc_d1", "name": "Day 1", "epochId": "ep_trt", "scheduledDay": 1},
            {"id": "enc_d8", "name": "Day 8", "epochId": "ep_trt", "scheduledDay": 8},
            {"id": "enc_d15", "name": "Day 15", "epochId": "ep_trt", "scheduledDay": 15},
            {"id": "enc_d29", "name": "Day 29", "epochId": "ep_fu", "scheduledDay": 29}
        ],
        "activities": [
            {"id": "act_vitals", "name": "Vital signs"},
            {"id": "act_ecg", "name": "ECG"}
        ]
    });
    StudyDesign::from_value(value).expect("fixture design decodes")
}

fn anchor_strategy() -> impl Strategy<Value = TimeAnchor> {
    (
        prop::sample::select(vec!["First Dose", "Randomization", "Screening Consent", "Last Dose"]),
        prop::option::of(-7i32..30),
    )
        .prop_map(|(name, day)| TimeAnchor {
            id: format!("ta_{}", name.len()),
            name: name.to_string(),
            anchor_type: None,
            day,
            encounter_label: None,
            epoch_label: None,
            provenance: String::new(),
        })
}

fn repetition_strategy() -> impl Strategy<Value = Repetition> {
    (
        0usize..3,
        prop::sample::select(vec!["Vital signs", "ECG", "Unknown test"]),
        -7i32..15,
        0i32..30,
        0u32..10,
    )
        .prop_map(|(n, label, start, span, interval)| Repetition {
            id: format!("rep_{n}"),
            activity_label: Some(label.to_string()),
            start_day: start,
            end_day: start + span,
            interval_days: interval,
            provenance: String::new(),
        })
}

fn window_strategy() -> impl Strategy<Value = VisitWindow> {
    (0usize..4, prop::sample::select(vec![1i32, 8, 15, 29, 40]))
        .prop_map(|(n, day)| VisitWindow {
            id: format!("vw_{n}_{day}"),
            visit_label: format!("Day {day}"),
            target_day: day,
            before_days: 1,
            after_days: 1,
            provenance: String::new(),
        })
}

fn timing_strategy() -> impl Strategy<Value = Vec<Timing>> {
    prop::collection::vec(
        prop::sample::select(vec!["FIRST_DOSE", "RANDOMIZATION", "DAY_15", "MYSTERY_EVENT", "enc_d1"]),
        0..5,
    )
    .prop_map(|targets| {
        targets
            .into_iter()
            .enumerate()
            .map(|(i, target)| Timing {
                id: format!("tm_{i}"),
                name: format!("timing {i}"),
                relative_to_instance: Some(target.to_string()),
                relative_from_instance: None,
                offset_days: Some(0),
                text: None,
            })
            .collect()
    })
}

/// Plain arm names, never sequence-styled.
fn arms_strategy() -> impl Strategy<Value = Vec<Arm>> {
    (0usize..5).prop_map(|n| {
        (1..=n)
            .map(|i| Arm {
                id: format!("arm_{i}"),
                name: format!("Cohort {i}"),
                arm_type: None,
            })
            .collect()
    })
}

fn crossover_strategy() -> impl Strategy<Value = Vec<CrossoverDesign>> {
    prop::option::of(prop::sample::select(vec![vec!["AB", "BA"], vec!["ABC", "BCA", "CAB"]])).prop_map(
        |sequences| {
            sequences
                .into_iter()
                .map(|seqs| CrossoverDesign {
                    id: format!("xo_{}", seqs.len()),
                    periods: seqs.len() as u32,
                    sequences: seqs.into_iter().map(str::to_string).collect(),
                    washout_days: Some(7),
                    evidence: None,
                    provenance: String::new(),
                })
                .collect()
        },
    )
}

fn bundle_strategy() -> impl Strategy<Value = FactBundle> {
    (
        prop::collection::vec(anchor_strategy(), 0..4),
        prop::collection::vec(repetition_strategy(), 0..3),
        prop::collection::vec(window_strategy(), 0..4),
        crossover_strategy(),
    )
        .prop_map(|(time_anchors, repetitions, visit_windows, crossover_designs)| FactBundle {
            time_anchors,
            repetitions,
            visit_windows,
            crossover_designs,
            ..FactBundle::default()
        })
}

/// Issue categories, sorted, without the reference repairs that only a
/// first pass can make.
fn categories(report: &EnrichmentReport) -> Vec<String> {
    let mut found: Vec<String> = report
        .issues
        .iter()
        .map(|i| i.category.clone())
        .filter(|c| c != "timing_reference_remapped" && c != "anchor_auto_created")
        .collect();
    found.sort();
    found
}

fn duplicate_ids(design: &StudyDesign) -> Vec<String> {
    let mut dupes = Vec::new();
    for kind in EntityKind::ALL {
        let mut ids: Vec<&str> = design.iter_kind(kind).map(|e| e.id()).collect();
        ids.sort_unstable();
        for pair in ids.windows(2) {
            if pair[0] == pair[1] {
                dupes.push(format!("{kind}:{}", pair[0]));
            }
        }
    }
    dupes
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn second_pass_changes_nothing(
        bundle in bundle_strategy(),
        timings in timing_strategy(),
        arms in arms_strategy(),
    ) {
        let enricher = Enricher::new(ReconcileConfig::default());
        let context = DocumentContext::default();
        let mut design = base_design();
        design.timings = timings;
        design.arms = arms;

        let first = enricher.enrich(&mut design, &bundle, &context);
        let once = design.clone();
        let second = enricher.enrich(&mut design, &bundle, &context);

        prop_assert_eq!(&design, &once);
        prop_assert_eq!(categories(&first), categories(&second));
        prop_assert_eq!(first.stats.dropped_facts, second.stats.dropped_facts);
        prop_assert!(duplicate_ids(&design).is_empty(), "duplicates: {:?}", duplicate_ids(&design));
    }

    #[test]
    fn every_timing_reference_resolves(bundle in bundle_strategy(), timings in timing_strategy()) {
        let mut design = base_design();
        design.timings = timings;

        Enricher::default().enrich(&mut design, &bundle, &DocumentContext::default());

        for timing in &design.timings {
            if let Some(target) = &timing.relative_to_instance {
                prop_assert!(
                    design.contains(EntityKind::ScheduledInstance, target),
                    "{} still points at {}", timing.id, target
                );
            }
        }
    }
}
