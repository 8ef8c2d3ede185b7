//! Alias Index: normalized labels ⇄ concrete entity IDs, rebuilt every pass.
//!
//! Keys are `(kind, normalized label)`. Each entity registers its name and
//! label under both the full and the core normalized form (see
//! [`trialgraph_model::normalize`]). A label that reaches more than one ID of
//! the same kind is ambiguous and resolves to nothing.

use std::collections::{BTreeMap, BTreeSet};
use trialgraph_model::{core_label, normalize_label, EntityKind, StudyDesign};

/// Kinds whose names participate in alias lookup.
pub const INDEXED_KINDS: [EntityKind; 6] = [
    EntityKind::Epoch,
    EntityKind::Encounter,
    EntityKind::Activity,
    EntityKind::Arm,
    EntityKind::Intervention,
    EntityKind::ScheduledInstance,
];

/// Fixed domain synonyms: concept → alternative wordings.
///
/// A concept attaches to an epoch/encounter only when exactly one entity of
/// that kind carries the concept words in its name.
pub const SYNONYM_SEED: &[(&str, &[&str])] = &[
    (
        "screening",
        &["screen", "pre screening", "prescreening", "selection", "pre treatment"],
    ),
    (
        "baseline",
        &["randomization", "randomisation", "first dose", "day 1", "week 0"],
    ),
    (
        "treatment",
        &["on treatment", "dosing", "active treatment", "double blind treatment"],
    ),
    (
        "maintenance",
        &["maintenance treatment", "continuation", "long term treatment"],
    ),
    (
        "follow up",
        &["followup", "post treatment", "safety follow up", "off treatment"],
    ),
    (
        "end of study",
        &[
            "eos",
            "study completion",
            "completion",
            "end of treatment",
            "eot",
            "early termination",
            "early discontinuation",
            "discontinuation",
            "withdrawal",
        ],
    ),
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EntityAlias {
    pub label: String,
    pub kind: EntityKind,
    pub entity_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct AliasIndex {
    forward: BTreeMap<(EntityKind, String), BTreeSet<String>>,
    reverse: BTreeMap<(EntityKind, String), BTreeSet<String>>,
}

impl AliasIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every named entity of the design, then apply the synonym seed.
    pub fn build(design: &StudyDesign) -> Self {
        let mut index = Self::new();
        for kind in INDEXED_KINDS {
            for entity in design.iter_kind(kind) {
                if let Some(name) = entity.name() {
                    index.register(kind, name, entity.id());
                }
                if let Some(label) = entity.label() {
                    index.register(kind, label, entity.id());
                }
            }
        }
        for kind in [EntityKind::Epoch, EntityKind::Encounter] {
            index.apply_seed(design, kind);
        }
        tracing::debug!(aliases = index.forward.len(), "alias index built");
        index
    }

    fn apply_seed(&mut self, design: &StudyDesign, kind: EntityKind) {
        for (concept, synonyms) in SYNONYM_SEED {
            let needle = format!(" {concept} ");
            let carriers: BTreeSet<&str> = design
                .iter_kind(kind)
                .filter(|e| {
                    [e.name(), e.label()]
                        .into_iter()
                        .flatten()
                        .any(|text| format!(" {} ", normalize_label(text)).contains(&needle))
                })
                .map(|e| e.id())
                .collect();
            if carriers.len() != 1 {
                continue;
            }
            let Some(only) = carriers.into_iter().next().map(str::to_string) else {
                continue;
            };
            for label in std::iter::once(*concept).chain(synonyms.iter().copied()) {
                self.register_if_free(kind, label, &only);
            }
        }
    }

    /// Register `label` for `id` under both normalized forms.
    pub fn register(&mut self, kind: EntityKind, label: &str, id: &str) {
        for key in [normalize_label(label), core_label(label)] {
            if key.is_empty() {
                continue;
            }
            self.forward
                .entry((kind, key.clone()))
                .or_default()
                .insert(id.to_string());
            self.reverse
                .entry((kind, id.to_string()))
                .or_default()
                .insert(key);
        }
    }

    /// Like [`register`](Self::register), but never turns an existing label ambiguous.
    fn register_if_free(&mut self, kind: EntityKind, label: &str, id: &str) {
        let full = normalize_label(label);
        let taken = self
            .forward
            .get(&(kind, full))
            .is_some_and(|ids| ids.iter().any(|existing| existing != id));
        if !taken {
            self.register(kind, label, id);
        }
    }

    /// Resolve a label: full form first, then core form. Ambiguous → `None`.
    pub fn lookup(&self, kind: EntityKind, label: &str) -> Option<&str> {
        let full = normalize_label(label);
        if full.is_empty() {
            return None;
        }
        if let Some(ids) = self.forward.get(&(kind, full)) {
            return single(ids);
        }
        self.forward
            .get(&(kind, core_label(label)))
            .and_then(single)
    }

    /// Full-form lookup only; no core-form fallback.
    pub fn lookup_exact(&self, kind: EntityKind, label: &str) -> Option<&str> {
        self.forward
            .get(&(kind, normalize_label(label)))
            .and_then(single)
    }

    pub fn is_ambiguous(&self, kind: EntityKind, label: &str) -> bool {
        self.forward
            .get(&(kind, normalize_label(label)))
            .is_some_and(|ids| ids.len() > 1)
    }

    /// All normalized labels an entity is reachable through.
    pub fn labels_of(&self, kind: EntityKind, id: &str) -> Vec<&str> {
        self.reverse
            .get(&(kind, id.to_string()))
            .map(|labels| labels.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn aliases(&self) -> Vec<EntityAlias> {
        let mut out = Vec::new();
        for ((kind, label), ids) in &self.forward {
            for id in ids {
                out.push(EntityAlias {
                    label: label.clone(),
                    kind: *kind,
                    entity_id: id.clone(),
                });
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

fn single(ids: &BTreeSet<String>) -> Option<&str> {
    if ids.len() == 1 {
        ids.iter().next().map(String::as_str)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trialgraph_model::{Encounter, Entity, Epoch};

    fn design() -> StudyDesign {
        let mut d = StudyDesign::default();
        for (id, name) in [
            ("ep_scr", "Screening Period"),
            ("ep_trt", "Treatment Period"),
            ("ep_fu", "Safety Follow-up"),
        ] {
            d.upsert(Entity::Epoch(Epoch {
                id: id.to_string(),
                name: name.to_string(),
                label: None,
                epoch_type: None,
            }));
        }
        for (id, name) in [("enc_1", "Visit 1"), ("enc_2", "Visit 1")] {
            d.upsert(Entity::Encounter(Encounter {
                id: id.to_string(),
                name: name.to_string(),
                label: None,
                epoch_id: None,
                scheduled_day: None,
                window: None,
            }));
        }
        d
    }

    #[test]
    fn resolves_full_core_and_seeded_labels() {
        let index = AliasIndex::build(&design());
        assert_eq!(index.lookup(EntityKind::Epoch, "screening period"), Some("ep_scr"));
        assert_eq!(index.lookup(EntityKind::Epoch, "SCREENING"), Some("ep_scr"));
        assert_eq!(index.lookup(EntityKind::Epoch, "Post-treatment"), Some("ep_fu"));
        assert_eq!(index.lookup(EntityKind::Epoch, "Dosing"), Some("ep_trt"));
        assert_eq!(index.lookup(EntityKind::Encounter, "Screening"), None);
    }

    #[test]
    fn duplicate_names_are_ambiguous() {
        let index = AliasIndex::build(&design());
        assert!(index.is_ambiguous(EntityKind::Encounter, "visit 1"));
        assert_eq!(index.lookup(EntityKind::Encounter, "Visit 1"), None);
    }

    #[test]
    fn reverse_direction_lists_labels() {
        let mut index = AliasIndex::build(&design());
        index.register(EntityKind::Epoch, "Period 1", "epoch_period_1");
        let labels = index.labels_of(EntityKind::Epoch, "epoch_period_1");
        assert!(labels.contains(&"period 1"));
        assert_eq!(index.lookup(EntityKind::Epoch, "period 1"), Some("epoch_period_1"));
    }
}
