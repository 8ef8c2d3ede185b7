//! Integrity Validator: read-only checks over the enriched graph.
//!
//! Runs last and never mutates anything; its Issues are what a consumer uses
//! to decide whether the graph may be published.

use crate::config::ReconcileConfig;
use crate::promotion::repetition::ActivityBinding;
use crate::records::{self, CanonicalRecord};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;
use trialgraph_model::{
    normalize_label, EntityKind, Issue, IssueLog, Repetition, StudyDesign, TraversalConstraint,
};

fn negative_day_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bday\s*[-−–]\s*\d+").ok())
        .as_ref()
}

/// True when the text states a negative study day (`"Day -7"`, `"day −14"`).
pub fn states_negative_day(text: &str) -> bool {
    negative_day_pattern().is_some_and(|re| re.is_match(text))
}

pub fn validate(design: &StudyDesign, config: &ReconcileConfig) -> Vec<Issue> {
    let mut log = IssueLog::new();
    check_bindings(design, config, &mut log);
    check_traversals(design, config, &mut log);
    check_titration(design, &mut log);
    check_day_signs(design, &mut log);
    check_epoch_names(design, &mut log);
    tracing::debug!(issues = log.len(), "validation finished");
    log.into_issues()
}

fn check_bindings(design: &StudyDesign, config: &ReconcileConfig, log: &mut IssueLog) {
    let key = config.record_key(records::ACTIVITY_BINDINGS);
    let Some(bindings) = records::read_record::<Vec<ActivityBinding>>(design, &key) else {
        return;
    };
    let repetitions: BTreeSet<String> =
        records::read_record::<Vec<CanonicalRecord<Repetition>>>(design, &config.record_key(records::REPETITIONS))
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.fact.id)
            .collect();

    for (i, binding) in bindings.iter().enumerate() {
        let path = format!("/extensions/{key}/{i}");
        if !repetitions.contains(&binding.repetition_id) {
            log.push(
                Issue::warning(
                    "binding_repetition_dangling",
                    &path,
                    format!("activity binding names repetition {}, which is not recorded", binding.repetition_id),
                )
                .with_ids([binding.repetition_id.clone(), binding.instance_id.clone()]),
            );
        }
        if !design.contains(EntityKind::ScheduledInstance, &binding.instance_id) {
            log.push(
                Issue::warning(
                    "binding_instance_dangling",
                    &path,
                    format!("activity binding names instance {}, which does not exist", binding.instance_id),
                )
                .with_ids([binding.instance_id.clone()]),
            );
        }
    }
}

fn check_traversals(design: &StudyDesign, config: &ReconcileConfig, log: &mut IssueLog) {
    let key = config.record_key(records::TRAVERSAL_CONSTRAINTS);
    let Some(constraints) = records::read_record::<Vec<CanonicalRecord<TraversalConstraint>>>(design, &key) else {
        return;
    };
    for (i, record) in constraints.iter().enumerate() {
        let constraint = &record.fact;
        let dangling: Vec<&str> = constraint
            .steps
            .iter()
            .filter(|step| !design.contains(EntityKind::Epoch, step))
            .map(String::as_str)
            .collect();
        if dangling.is_empty() {
            continue;
        }
        log.push(
            Issue::warning(
                "traversal_step_unresolved",
                format!("/extensions/{key}/{i}/steps"),
                format!(
                    "traversal {}: step(s) {} are not epoch IDs",
                    constraint.id,
                    dangling.join(", ")
                ),
            )
            .with_ids([constraint.id.clone()]),
        );
    }
}

fn check_titration(design: &StudyDesign, log: &mut IssueLog) {
    for (i, adm) in design.administrations.iter().enumerate() {
        let open: Vec<&str> = adm
            .titration
            .iter()
            .filter(|step| step.start_day.is_none() || step.end_day.is_none())
            .map(|step| step.dose.as_str())
            .collect();
        if open.is_empty() {
            continue;
        }
        log.push(
            Issue::warning(
                "titration_day_bounds_incomplete",
                format!("/administrations/{i}/titration"),
                format!(
                    "administration {}: titration step(s) {} lack a start or end day",
                    adm.id,
                    open.join(", ")
                ),
            )
            .with_ids([adm.id.clone()]),
        );
    }
}

fn check_day_signs(design: &StudyDesign, log: &mut IssueLog) {
    for (i, timing) in design.timings.iter().enumerate() {
        let stated = timing.text.as_deref().is_some_and(states_negative_day) || states_negative_day(&timing.name);
        if stated && timing.offset_days.is_some_and(|d| d > 0) {
            log.push(
                Issue::warning(
                    "day_offset_sign_mismatch",
                    format!("/timings/{i}/offsetDays"),
                    format!(
                        "timing {} states a negative day but stores offset {}",
                        timing.id,
                        timing.offset_days.unwrap_or_default()
                    ),
                )
                .with_ids([timing.id.clone()]),
            );
        }
    }
    for (i, encounter) in design.encounters.iter().enumerate() {
        let stated = states_negative_day(&encounter.name)
            || encounter.label.as_deref().is_some_and(states_negative_day);
        if stated && encounter.scheduled_day.is_some_and(|d| d > 0) {
            log.push(
                Issue::warning(
                    "day_offset_sign_mismatch",
                    format!("/encounters/{i}/scheduledDay"),
                    format!(
                        "encounter {} ({:?}) states a negative day but is scheduled on day {}",
                        encounter.id,
                        encounter.name,
                        encounter.scheduled_day.unwrap_or_default()
                    ),
                )
                .with_ids([encounter.id.clone()]),
            );
        }
    }
}

fn check_epoch_names(design: &StudyDesign, log: &mut IssueLog) {
    let mut by_name: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for epoch in &design.epochs {
        by_name
            .entry(normalize_label(&epoch.name))
            .or_default()
            .push(&epoch.id);
    }
    for (name, ids) in by_name {
        if ids.len() < 2 {
            continue;
        }
        log.push(
            Issue::blocking(
                "duplicate_epoch_name",
                "/epochs",
                format!("{} epochs share the name {name:?}: {}", ids.len(), ids.join(", ")),
            )
            .with_ids(ids.iter().copied())
            .with_suggestion("merge the epochs or give each a distinct name"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trialgraph_model::{Administration, Encounter, Entity, Epoch, Severity, Timing, TitrationStep};

    fn epoch(id: &str, name: &str) -> Entity {
        Entity::Epoch(Epoch {
            id: id.to_string(),
            name: name.to_string(),
            label: None,
            epoch_type: None,
        })
    }

    #[test]
    fn detects_negative_day_wording() {
        assert!(states_negative_day("Day -7 (±2)"));
        assert!(states_negative_day("screening, day −14"));
        assert!(!states_negative_day("Day 7"));
        assert!(!states_negative_day("Days 1-7"));
    }

    #[test]
    fn flags_structural_problems() {
        let config = ReconcileConfig::default();
        let mut design = StudyDesign::default();
        design.upsert(epoch("ep_1", "Treatment"));
        design.upsert(epoch("ep_2", "treatment"));
        design.upsert(Entity::Encounter(Encounter {
            id: "enc_scr".to_string(),
            name: "Screening (Day -14)".to_string(),
            label: None,
            epoch_id: None,
            scheduled_day: Some(14),
            window: None,
        }));
        design.upsert(Entity::Timing(Timing {
            id: "t1".to_string(),
            name: "pre-dose".to_string(),
            relative_to_instance: None,
            relative_from_instance: None,
            offset_days: Some(7),
            text: Some("Day -7".to_string()),
        }));
        design.upsert(Entity::Administration(Administration {
            id: "adm_x".to_string(),
            name: "Drug X".to_string(),
            intervention_id: None,
            dose: None,
            frequency: None,
            route: None,
            duration: None,
            titration: vec![TitrationStep {
                dose: "5 mg".to_string(),
                start_day: Some(1),
                end_day: None,
            }],
            source_fact: None,
        }));
        design.set_extension(
            config.record_key(records::ACTIVITY_BINDINGS),
            serde_json::json!([{"repetitionId": "rep_gone", "activityId": "act", "instanceId": "si_gone", "day": 3}]),
        );

        let issues = validate(&design, &config);
        let count = |category: &str| issues.iter().filter(|i| i.category == category).count();
        assert_eq!(count("duplicate_epoch_name"), 1);
        assert_eq!(count("day_offset_sign_mismatch"), 2);
        assert_eq!(count("titration_day_bounds_incomplete"), 1);
        assert_eq!(count("binding_repetition_dangling"), 1);
        assert_eq!(count("binding_instance_dangling"), 1);
        assert!(issues
            .iter()
            .any(|i| i.severity == Severity::Blocking && i.category == "duplicate_epoch_name"));
    }

    #[test]
    fn validation_does_not_mutate() {
        let config = ReconcileConfig::default();
        let mut design = StudyDesign::default();
        design.upsert(epoch("ep_1", "Screening"));
        let before = design.clone();
        let _ = validate(&design, &config);
        assert_eq!(design, before);
    }
}
