//! Repetition expansion: one scheduled instance per occurrence day.
//!
//! Occurrences only land on encounters that already exist on that day.
//! Days without one are skipped and reported; visits are never invented.

use crate::pass::Pass;
use crate::records::{self, CanonicalRecord, ResolvedRef};
use serde::{Deserialize, Serialize};
use trialgraph_model::{
    day_token, Entity, EntityKind, Issue, Repetition, ScheduledInstance, StudyDesign,
};

/// Links a repetition occurrence to the instance generated for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityBinding {
    pub repetition_id: String,
    pub activity_id: String,
    pub instance_id: String,
    pub day: i32,
}

pub fn expand_repetitions(pass: &mut Pass<'_>, design: &mut StudyDesign, repetitions: &[Repetition]) {
    let path = format!("/extensions/{}", pass.record_key(records::REPETITIONS));
    let mut bindings: Vec<ActivityBinding> = Vec::new();
    let mut out = Vec::with_capacity(repetitions.len());

    for rep in repetitions {
        let activity = rep
            .activity_label
            .as_deref()
            .map(|label| pass.resolve_ref(design, &[EntityKind::Activity], label));
        let activity_id = activity.as_ref().and_then(|r| r.entity_id.clone());
        out.push(CanonicalRecord::new(rep.clone(), activity.clone().into_iter().collect::<Vec<ResolvedRef>>()));

        let Some(activity_id) = activity_id else {
            let message = match &rep.activity_label {
                Some(label) => format!("repetition {} names activity {label:?}, which matches no activity", rep.id),
                None => format!("repetition {} is not bound to an activity", rep.id),
            };
            pass.issues.push(Issue::info("repetition_unbound", &path, message).with_ids([rep.id.clone()]));
            continue;
        };

        if rep.interval_days == 0 || rep.end_day < rep.start_day {
            pass.issues.push(
                Issue::warning(
                    "repetition_invalid_range",
                    &path,
                    format!(
                        "repetition {}: days {}..={} every {} day(s) is not a valid range",
                        rep.id, rep.start_day, rep.end_day, rep.interval_days
                    ),
                )
                .with_ids([rep.id.clone()]),
            );
            continue;
        }

        let days = occurrence_days(design, rep);
        for &day in &days {
            let Some(encounter) = design
                .encounters
                .iter()
                .find(|e| e.scheduled_day == Some(day))
                .cloned()
            else {
                continue;
            };

            let instance_id = format!("si_rep_{}_d{}", rep.id, day_token(day));
            design.upsert(Entity::ScheduledInstance(ScheduledInstance {
                id: instance_id.clone(),
                name: format!("{} (day {day})", rep.activity_label.as_deref().unwrap_or(&rep.id)),
                encounter_id: Some(encounter.id.clone()),
                epoch_id: encounter.epoch_id.clone(),
                activity_ids: vec![activity_id.clone()],
                day: Some(day),
                repetition_id: Some(rep.id.clone()),
                origin: Some(format!("repetition:{}", rep.id)),
            }));
            pass.stats.promoted_instances += 1;
            bindings.push(ActivityBinding {
                repetition_id: rep.id.clone(),
                activity_id: activity_id.clone(),
                instance_id,
                day,
            });
        }

        let total = occurrence_count(rep);
        let missing = total - days.len() as i64;
        if missing > 0 {
            let mut listed: Vec<String> = skipped_days(rep, &days).iter().map(i32::to_string).collect();
            if missing > listed.len() as i64 {
                listed.push("...".to_string());
            }
            pass.issues.push(
                Issue::info(
                    "repetition_days_skipped",
                    &path,
                    format!(
                        "repetition {}: no encounter on {missing} of {total} occurrence day(s) ({}); occurrences skipped",
                        rep.id,
                        listed.join(", ")
                    ),
                )
                .with_ids([rep.id.clone()]),
            );
        }
    }

    let key = pass.record_key(records::REPETITIONS);
    records::write_record(design, &mut pass.issues, &key, &out);
    let key = pass.record_key(records::ACTIVITY_BINDINGS);
    records::write_record(design, &mut pass.issues, &key, &bindings);
}

/// Skipped days named in a `repetition_days_skipped` message.
const SKIPPED_DAYS_LISTED: usize = 10;

/// Encounter days that fall on an occurrence of `rep`, ascending.
///
/// Only existing encounter days are visited, so the cost does not depend on
/// how wide the repetition range is.
fn occurrence_days(design: &StudyDesign, rep: &Repetition) -> Vec<i32> {
    let start = i64::from(rep.start_day);
    let interval = i64::from(rep.interval_days);
    let mut days: Vec<i32> = design
        .encounters
        .iter()
        .filter_map(|e| e.scheduled_day)
        .filter(|&d| d >= rep.start_day && d <= rep.end_day)
        .filter(|&d| (i64::from(d) - start) % interval == 0)
        .collect();
    days.sort_unstable();
    days.dedup();
    days
}

fn occurrence_count(rep: &Repetition) -> i64 {
    (i64::from(rep.end_day) - i64::from(rep.start_day)) / i64::from(rep.interval_days) + 1
}

/// The first few occurrence days with no encounter.
fn skipped_days(rep: &Repetition, hits: &[i32]) -> Vec<i32> {
    let mut skipped = Vec::new();
    let mut day = i64::from(rep.start_day);
    let end = i64::from(rep.end_day);
    while skipped.len() < SKIPPED_DAYS_LISTED && day <= end {
        if let Ok(d) = i32::try_from(day) {
            if hits.binary_search(&d).is_err() {
                skipped.push(d);
            }
        }
        day += i64::from(rep.interval_days);
    }
    skipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasIndex;
    use crate::config::ReconcileConfig;
    use crate::resolver::DocumentContext;
    use trialgraph_model::{Activity, Encounter};

    fn design() -> StudyDesign {
        let mut d = StudyDesign::default();
        d.upsert(Entity::Activity(Activity {
            id: "act_ecg".to_string(),
            name: "12-lead ECG".to_string(),
            label: None,
        }));
        for day in [1, 15, 43] {
            d.upsert(Entity::Encounter(Encounter {
                id: format!("enc_d{day}"),
                name: format!("Day {day}"),
                label: None,
                epoch_id: Some("ep_trt".to_string()),
                scheduled_day: Some(day),
                window: None,
            }));
        }
        d
    }

    fn repetition(id: &str, label: Option<&str>, start: i32, end: i32, every: u32) -> Repetition {
        Repetition {
            id: id.to_string(),
            activity_label: label.map(str::to_string),
            start_day: start,
            end_day: end,
            interval_days: every,
            provenance: String::new(),
        }
    }

    #[test]
    fn expands_onto_existing_days_only() {
        let config = ReconcileConfig::default();
        let context = DocumentContext::default();
        let mut design = design();
        let mut pass = Pass::new(&config, &context, None);
        pass.aliases = AliasIndex::build(&design);

        expand_repetitions(&mut pass, &mut design, &[repetition("rep1", Some("12 lead ECG"), 1, 43, 14)]);

        // days 1, 15, 29, 43: 29 has no encounter
        assert!(design.contains(EntityKind::ScheduledInstance, "si_rep_rep1_d1"));
        assert!(design.contains(EntityKind::ScheduledInstance, "si_rep_rep1_d15"));
        assert!(design.contains(EntityKind::ScheduledInstance, "si_rep_rep1_d43"));
        assert!(!design.contains(EntityKind::ScheduledInstance, "si_rep_rep1_d29"));
        assert_eq!(pass.issues.by_category("repetition_days_skipped").count(), 1);

        let bindings: Vec<ActivityBinding> =
            records::read_record(&design, &config.record_key(records::ACTIVITY_BINDINGS)).unwrap_or_default();
        assert_eq!(bindings.len(), 3);
        assert!(bindings.iter().all(|b| b.activity_id == "act_ecg"));
    }

    #[test]
    fn unbound_and_invalid_repetitions_are_reported() {
        let config = ReconcileConfig::default();
        let context = DocumentContext::default();
        let mut design = design();
        let mut pass = Pass::new(&config, &context, None);
        pass.aliases = AliasIndex::build(&design);

        expand_repetitions(
            &mut pass,
            &mut design,
            &[
                repetition("rep1", None, 1, 10, 1),
                repetition("rep2", Some("ECG 12-lead"), 10, 1, 1),
                repetition("rep3", Some("12-lead ECG"), 1, 10, 0),
            ],
        );

        assert_eq!(pass.issues.by_category("repetition_unbound").count(), 2);
        assert_eq!(pass.issues.by_category("repetition_invalid_range").count(), 1);
        assert_eq!(design.scheduled_instances.len(), 0);
    }

    #[test]
    fn extreme_range_visits_encounter_days_only() {
        let config = ReconcileConfig::default();
        let context = DocumentContext::default();
        let mut design = design();
        let mut pass = Pass::new(&config, &context, None);
        pass.aliases = AliasIndex::build(&design);

        expand_repetitions(
            &mut pass,
            &mut design,
            &[repetition("rep_wide", Some("12-lead ECG"), i32::MIN, i32::MAX, 1)],
        );

        for day in [1, 15, 43] {
            assert!(design.contains(EntityKind::ScheduledInstance, &format!("si_rep_rep_wide_d{day}")));
        }
        let skipped: Vec<_> = pass.issues.by_category("repetition_days_skipped").collect();
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].message.ends_with("occurrences skipped"));
        assert!(skipped[0].message.contains("..."));
    }
}
