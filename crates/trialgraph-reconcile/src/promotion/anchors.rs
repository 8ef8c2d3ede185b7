//! Time-anchor promotion.

use crate::pass::Pass;
use crate::promotion::humanize_reference;
use crate::records::{self, CanonicalRecord, ResolvedRef};
use crate::resolver::ResolvedMapping;
use std::collections::BTreeMap;
use trialgraph_model::{
    normalize_label, slugify, Entity, EntityKind, Issue, ScheduledInstance, StudyDesign, TimeAnchor,
};

/// Keywords tried against the alias index when an anchor names no visit.
const ANCHOR_KEYWORDS: &[&str] = &[
    "screening",
    "baseline",
    "randomization",
    "first dose",
    "follow up",
];

/// Normalized anchor name/type → promoted instance ID.
pub type AnchorMap = BTreeMap<String, String>;

#[derive(Debug, Default)]
struct Attachment {
    encounter_id: Option<String>,
    epoch_id: Option<String>,
    via: &'static str,
}

/// Merge duplicate anchors (same normalized name), keeping first-seen order.
pub fn dedupe_anchors(anchors: &[TimeAnchor]) -> Vec<TimeAnchor> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: BTreeMap<String, TimeAnchor> = BTreeMap::new();
    for anchor in anchors {
        let key = normalize_label(&anchor.name);
        match merged.get_mut(&key) {
            Some(existing) => {
                if existing.anchor_type.is_none() {
                    existing.anchor_type.clone_from(&anchor.anchor_type);
                }
                if existing.day.is_none() {
                    existing.day = anchor.day;
                }
                if existing.encounter_label.is_none() {
                    existing.encounter_label.clone_from(&anchor.encounter_label);
                }
                if existing.epoch_label.is_none() {
                    existing.epoch_label.clone_from(&anchor.epoch_label);
                }
            }
            None => {
                order.push(key.clone());
                merged.insert(key, anchor.clone());
            }
        }
    }
    order
        .into_iter()
        .filter_map(|key| merged.remove(&key))
        .collect()
}

/// One scheduled instance per distinct anchor, attached to the nearest
/// sensible encounter or epoch.
pub fn promote_anchors(pass: &mut Pass<'_>, design: &mut StudyDesign, anchors: &[TimeAnchor]) -> AnchorMap {
    let mut map = AnchorMap::new();
    if anchors.is_empty() {
        return map;
    }

    let distinct = dedupe_anchors(anchors);
    if distinct.len() < anchors.len() {
        tracing::debug!(before = anchors.len(), after = distinct.len(), "time anchors merged by name");
    }

    let mut out = Vec::with_capacity(distinct.len());
    for anchor in distinct {
        let attachment = attach(pass, design, &anchor);
        let id = format!("si_anchor_{}", slugify(&anchor.name));

        if attachment.encounter_id.is_none() && attachment.epoch_id.is_none() {
            pass.issues.push(
                Issue::warning(
                    "anchor_unattached",
                    "/scheduledInstances",
                    format!(
                        "time anchor {:?} ({}) has no encounter or epoch to attach to",
                        anchor.name, anchor.id
                    ),
                )
                .with_ids([anchor.id.clone(), id.clone()]),
            );
        }

        design.upsert(Entity::ScheduledInstance(ScheduledInstance {
            id: id.clone(),
            name: anchor.name.clone(),
            encounter_id: attachment.encounter_id.clone(),
            epoch_id: attachment.epoch_id.clone(),
            activity_ids: Vec::new(),
            day: anchor.day,
            repetition_id: None,
            origin: Some(format!("anchor:{}", anchor.id)),
        }));
        pass.stats.promoted_instances += 1;
        pass.aliases.register(EntityKind::ScheduledInstance, &anchor.name, &id);
        tracing::debug!(anchor = %anchor.name, instance = %id, via = attachment.via, "time anchor promoted");

        map.insert(normalize_label(&anchor.name), id.clone());
        if let Some(kind) = &anchor.anchor_type {
            let human = humanize_reference(kind);
            if !human.is_empty() {
                pass.aliases.register(EntityKind::ScheduledInstance, &human, &id);
                map.entry(human).or_insert_with(|| id.clone());
            }
        }

        let mut references = vec![ResolvedRef::from_mapping(
            EntityKind::ScheduledInstance.collection(),
            &ResolvedMapping::from_alias(&anchor.name, &id),
        )];
        if let Some(encounter_id) = &attachment.encounter_id {
            let label = anchor.encounter_label.as_deref().unwrap_or(attachment.via);
            references.push(ResolvedRef::from_mapping(
                EntityKind::Encounter.collection(),
                &ResolvedMapping::from_alias(label, encounter_id),
            ));
        }
        if let Some(epoch_id) = &attachment.epoch_id {
            let label = anchor.epoch_label.as_deref().unwrap_or(attachment.via);
            references.push(ResolvedRef::from_mapping(
                EntityKind::Epoch.collection(),
                &ResolvedMapping::from_alias(label, epoch_id),
            ));
        }
        out.push(CanonicalRecord::new(anchor, references));
    }

    let key = pass.record_key(records::TIME_ANCHORS);
    records::write_record(design, &mut pass.issues, &key, &out);
    map
}

fn attach(pass: &Pass<'_>, design: &StudyDesign, anchor: &TimeAnchor) -> Attachment {
    let from_encounter = |id: &str, via: &'static str| Attachment {
        encounter_id: Some(id.to_string()),
        epoch_id: design.encounter(id).and_then(|e| e.epoch_id.clone()),
        via,
    };
    let from_epoch = |id: &str, via: &'static str| Attachment {
        encounter_id: None,
        epoch_id: Some(id.to_string()),
        via,
    };

    if let Some(label) = &anchor.encounter_label {
        let r = pass.resolve_ref(design, &[EntityKind::Encounter], label);
        if let Some(id) = &r.entity_id {
            return from_encounter(id.as_str(), "encounter label");
        }
    }

    if let Some(day) = anchor.day {
        let nearest = design
            .encounters
            .iter()
            .filter_map(|e| e.scheduled_day.map(|d| (e, (i64::from(d) - i64::from(day)).abs())))
            .min_by_key(|(_, distance)| *distance);
        if let Some((encounter, _)) = nearest {
            return from_encounter(encounter.id.as_str(), "nearest day");
        }
    }

    if let Some(label) = &anchor.epoch_label {
        let r = pass.resolve_ref(design, &[EntityKind::Epoch], label);
        if let Some(id) = &r.entity_id {
            return from_epoch(id.as_str(), "epoch label");
        }
    }

    let text = format!(
        " {} {} ",
        normalize_label(&anchor.name),
        anchor.anchor_type.as_deref().map(humanize_reference).unwrap_or_default()
    );
    for keyword in ANCHOR_KEYWORDS {
        if !text.contains(&format!(" {keyword} ")) {
            continue;
        }
        if let Some(id) = pass.aliases.lookup(EntityKind::Encounter, keyword) {
            return from_encounter(id, "anchor keyword");
        }
        if let Some(id) = pass.aliases.lookup(EntityKind::Epoch, keyword) {
            return from_epoch(id, "anchor keyword");
        }
    }

    if let Some(first) = design.encounters.first() {
        return from_encounter(first.id.as_str(), "first encounter");
    }
    if let Some(first) = design.epochs.first() {
        return from_epoch(first.id.as_str(), "first epoch");
    }
    Attachment::default()
}
