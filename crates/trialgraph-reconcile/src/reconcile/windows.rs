//! Visit-window normalization.
//!
//! Windows are grouped by target day to detect collisions, then paired with
//! an encounter (by name, then by scheduled day). The pairing is written onto
//! the encounter itself as well as into the side-channel record.

use crate::pass::Pass;
use crate::records::{self, CanonicalRecord, ResolvedRef};
use crate::resolver::ResolvedMapping;
use std::collections::{BTreeMap, BTreeSet};
use trialgraph_model::{EncounterWindow, EntityKind, Issue, StudyDesign, VisitWindow};

/// Drop every pairing written by an earlier pass.
pub fn clear_windows(design: &mut StudyDesign) {
    for encounter in &mut design.encounters {
        encounter.window = None;
    }
}

pub fn normalize_windows(pass: &mut Pass<'_>, design: &mut StudyDesign, windows: &[VisitWindow]) {
    report_collisions(pass, windows);

    let mut paired: BTreeSet<String> = BTreeSet::new();
    let mut out: Vec<CanonicalRecord<VisitWindow>> = Vec::with_capacity(windows.len());

    for window in windows {
        let Some(encounter_id) = match_encounter(pass, design, window) else {
            pass.issues.push(
                Issue::warning(
                    "visit_window_unmatched",
                    "/encounters",
                    format!(
                        "visit window {} ({:?}, day {}) matches no encounter",
                        window.id, window.visit_label, window.target_day
                    ),
                )
                .with_ids([window.id.clone()]),
            );
            out.push(CanonicalRecord::new(
                window.clone(),
                vec![ResolvedRef::unresolved(&window.visit_label, EntityKind::Encounter.collection())],
            ));
            continue;
        };

        // First window wins when several land on one encounter.
        if paired.insert(encounter_id.clone()) {
            if let Some(encounter) = design.encounter_mut(&encounter_id) {
                encounter.window = Some(EncounterWindow {
                    target_day: window.target_day,
                    before_days: window.before_days,
                    after_days: window.after_days,
                    visit_window_id: window.id.clone(),
                });
            }
        }
        out.push(CanonicalRecord::new(
            window.clone(),
            vec![ResolvedRef::from_mapping(
                EntityKind::Encounter.collection(),
                &ResolvedMapping::from_alias(&window.visit_label, &encounter_id),
            )],
        ));
    }

    let key = pass.record_key(records::VISIT_WINDOWS);
    records::write_record(design, &mut pass.issues, &key, &out);
}

fn report_collisions(pass: &mut Pass<'_>, windows: &[VisitWindow]) {
    let mut by_day: BTreeMap<i32, Vec<&VisitWindow>> = BTreeMap::new();
    for window in windows {
        by_day.entry(window.target_day).or_default().push(window);
    }

    for (day, group) in by_day {
        if group.len() < 2 {
            continue;
        }
        let ids: Vec<String> = group.iter().map(|w| w.id.clone()).collect();
        let labels: Vec<&str> = group.iter().map(|w| w.visit_label.as_str()).collect();
        let issue = if day == 1 {
            Issue::blocking(
                "visit_window_day1_collision",
                "/encounters",
                format!("{} visit windows target day 1: {}", group.len(), labels.join(", ")),
            )
            .with_suggestion("day 1 anchors the schedule; keep exactly one window there")
        } else {
            Issue::warning(
                "visit_window_collision",
                "/encounters",
                format!("{} visit windows target day {day}: {}", group.len(), labels.join(", ")),
            )
        };
        pass.issues.push(issue.with_ids(ids));
    }
}

fn match_encounter(pass: &Pass<'_>, design: &StudyDesign, window: &VisitWindow) -> Option<String> {
    if design.contains(EntityKind::Encounter, &window.visit_label) {
        return Some(window.visit_label.clone());
    }
    if let Some(id) = pass.aliases.lookup(EntityKind::Encounter, &window.visit_label) {
        return Some(id.to_string());
    }
    design
        .encounters
        .iter()
        .find(|e| e.scheduled_day == Some(window.target_day))
        .map(|e| e.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasIndex;
    use crate::config::ReconcileConfig;
    use crate::resolver::DocumentContext;
    use trialgraph_model::{Encounter, Entity, Severity};

    fn window(id: &str, label: &str, day: i32) -> VisitWindow {
        VisitWindow {
            id: id.to_string(),
            visit_label: label.to_string(),
            target_day: day,
            before_days: 2,
            after_days: 2,
            provenance: String::new(),
        }
    }

    fn design() -> StudyDesign {
        let mut d = StudyDesign::default();
        for (id, name, day) in [("enc_v2", "Visit 2", 1), ("enc_w6", "Week 6", 43)] {
            d.upsert(Entity::Encounter(Encounter {
                id: id.to_string(),
                name: name.to_string(),
                label: None,
                epoch_id: None,
                scheduled_day: Some(day),
                window: None,
            }));
        }
        d
    }

    #[test]
    fn pairs_by_name_then_by_day() {
        let config = ReconcileConfig::default();
        let context = DocumentContext::default();
        let mut design = design();
        let mut pass = Pass::new(&config, &context, None);
        pass.aliases = AliasIndex::build(&design);

        normalize_windows(
            &mut pass,
            &mut design,
            &[window("vw1", "Week 6 visit", 43), window("vw2", "Baseline", 1), window("vw3", "Week 52", 365)],
        );

        let w6 = design.encounter("enc_w6").and_then(|e| e.window.clone());
        assert_eq!(w6.map(|w| w.visit_window_id), Some("vw1".to_string()));
        let v2 = design.encounter("enc_v2").and_then(|e| e.window.clone());
        assert_eq!(v2.map(|w| w.visit_window_id), Some("vw2".to_string()));
        assert_eq!(pass.issues.by_category("visit_window_unmatched").count(), 1);
        assert!(design
            .extension(&config.record_key(records::VISIT_WINDOWS))
            .is_some());
    }

    #[test]
    fn day_one_collision_blocks_other_days_warn() {
        let config = ReconcileConfig::default();
        let context = DocumentContext::default();
        let mut design = design();
        let mut pass = Pass::new(&config, &context, None);
        pass.aliases = AliasIndex::build(&design);

        normalize_windows(
            &mut pass,
            &mut design,
            &[
                window("a", "Day 1", 1),
                window("b", "Randomization", 1),
                window("c", "Day 40", 40),
                window("d", "Day 40 PK", 40),
            ],
        );

        let blocking: Vec<_> = pass
            .issues
            .issues()
            .iter()
            .filter(|i| i.severity == Severity::Blocking)
            .collect();
        assert_eq!(blocking.len(), 1);
        assert_eq!(blocking[0].category, "visit_window_day1_collision");
        assert_eq!(pass.issues.by_category("visit_window_collision").count(), 1);
    }
}
