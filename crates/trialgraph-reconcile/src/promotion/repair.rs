//! Dangling timing references.
//!
//! A `Timing.relativeToInstance` or `relativeFromInstance` that names no
//! scheduled instance is repaired in this order: the anchor-promotion map, a fuzzy name match, a day match,
//! and finally a synthesized placeholder instance. Placeholders are created
//! once per missing reference per pass and reused afterwards.

use crate::pass::Pass;
use crate::promotion::{humanize_reference, AnchorMap};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use trialgraph_model::{
    slugify, token_similarity, Entity, EntityKind, Issue, IssueRef, ScheduledInstance, StudyDesign,
    Timing,
};

fn day_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bday (m|minus )?(\d+)\b").ok())
        .as_ref()
}

/// Which end of a timing a reference sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    To,
    From,
}

impl End {
    fn field(self) -> &'static str {
        match self {
            End::To => "relativeToInstance",
            End::From => "relativeFromInstance",
        }
    }

    fn slot(self, timing: &mut Timing) -> &mut Option<String> {
        match self {
            End::To => &mut timing.relative_to_instance,
            End::From => &mut timing.relative_from_instance,
        }
    }

    fn target(self, timing: &Timing) -> Option<&String> {
        match self {
            End::To => timing.relative_to_instance.as_ref(),
            End::From => timing.relative_from_instance.as_ref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Repair {
    Remap { to: String, via: String },
    Placeholder { id: String },
}

/// Day number stated in a humanized reference (`"first dose day 1"` → 1,
/// `"day m 7"` → -7).
pub fn stated_day(human: &str) -> Option<i32> {
    let compact = human.replace("day m ", "day m");
    let caps = day_pattern()?.captures(&compact)?;
    let n: i32 = caps.get(2)?.as_str().parse().ok()?;
    Some(if caps.get(1).is_some() { -n } else { n })
}

pub fn repair_timing_references(pass: &mut Pass<'_>, design: &mut StudyDesign, anchors: &AnchorMap) {
    // placeholder ID → (ID, its anchor_auto_created issue)
    let mut synthesized: BTreeMap<String, (String, IssueRef)> = BTreeMap::new();

    for i in 0..design.timings.len() {
        for end in [End::To, End::From] {
            repair_reference(pass, design, anchors, &mut synthesized, i, end);
        }
    }
}

fn repair_reference(
    pass: &mut Pass<'_>,
    design: &mut StudyDesign,
    anchors: &AnchorMap,
    synthesized: &mut BTreeMap<String, (String, IssueRef)>,
    i: usize,
    end: End,
) {
    let Some(target) = end.target(&design.timings[i]).cloned() else {
        return;
    };
    if design.contains(EntityKind::ScheduledInstance, &target) {
        return;
    }
    let timing_id = design.timings[i].id.clone();
    let path = format!("/timings/{i}/{}", end.field());
    let placeholder_id = format!("si_placeholder_{}", slugify(&humanize_reference(&target)));

    if let Some((placeholder, issue)) = synthesized.get(&placeholder_id) {
        pass.issues.add_affected_id(*issue, timing_id);
        *end.slot(&mut design.timings[i]) = Some(placeholder.clone());
        pass.stats.repaired_references += 1;
        return;
    }

    let repair = match find_existing(pass, design, anchors, &target) {
        Some(found) => found,
        None => Repair::Placeholder { id: placeholder_id },
    };

    match repair {
        Repair::Remap { to, via } => {
            pass.issues.push(
                Issue::warning(
                    "timing_reference_remapped",
                    path,
                    format!("timing {timing_id}: dangling reference {target:?} remapped to {to} ({via})"),
                )
                .with_ids([timing_id, to.clone()]),
            );
            *end.slot(&mut design.timings[i]) = Some(to);
        }
        Repair::Placeholder { id } => {
            design.upsert(Entity::ScheduledInstance(ScheduledInstance {
                id: id.clone(),
                name: humanize_reference(&target),
                encounter_id: None,
                epoch_id: None,
                activity_ids: Vec::new(),
                day: stated_day(&humanize_reference(&target)),
                repetition_id: None,
                origin: Some(format!("placeholder:{target}")),
            }));
            pass.stats.synthesized_instances += 1;
            let issue = pass.issues.push(
                Issue::info(
                    "anchor_auto_created",
                    path,
                    format!("timing {timing_id}: no instance matches {target:?}; placeholder {id} created"),
                )
                .with_ids([id.clone(), timing_id])
                .with_suggestion("attach the placeholder to a real encounter or fix the reference"),
            );
            *end.slot(&mut design.timings[i]) = Some(id.clone());
            synthesized.insert(id.clone(), (id, issue));
        }
    }
    pass.stats.repaired_references += 1;
}

fn find_existing(pass: &Pass<'_>, design: &StudyDesign, anchors: &AnchorMap, target: &str) -> Option<Repair> {
    let human = humanize_reference(target);
    if human.is_empty() {
        return None;
    }

    if let Some(id) = anchors.get(&human) {
        return Some(Repair::Remap {
            to: id.clone(),
            via: "anchor map".to_string(),
        });
    }
    let padded = format!(" {human} ");
    if let Some((_, id)) = anchors
        .iter()
        .find(|(label, _)| !label.is_empty() && padded.contains(&format!(" {label} ")))
    {
        return Some(Repair::Remap {
            to: id.clone(),
            via: "anchor map".to_string(),
        });
    }

    if let Some(id) = pass.aliases.lookup(EntityKind::ScheduledInstance, &human) {
        return Some(Repair::Remap {
            to: id.to_string(),
            via: "alias".to_string(),
        });
    }

    let real = || {
        design
            .scheduled_instances
            .iter()
            .filter(|si| !si.origin.as_deref().is_some_and(|o| o.starts_with("placeholder:")))
    };

    let mut best: Option<(f64, &str)> = None;
    for instance in real() {
        let score = token_similarity(&instance.name, &human);
        if score >= pass.config.fuzzy_match_threshold && best.map_or(true, |(top, _)| score > top) {
            best = Some((score, instance.id.as_str()));
        }
    }
    if let Some((score, id)) = best {
        return Some(Repair::Remap {
            to: id.to_string(),
            via: format!("name similarity {score:.2}"),
        });
    }

    let day = stated_day(&human)?;
    real().find(|si| si.day == Some(day)).map(|si| Repair::Remap {
        to: si.id.clone(),
        via: format!("day {day}"),
    })
}
