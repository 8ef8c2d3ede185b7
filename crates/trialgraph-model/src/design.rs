//! The base study-design graph.
//!
//! Entities live in one typed collection per kind. Cross-references are plain
//! string IDs (unique within a kind). Read access goes through [`EntityRef`],
//! writes through [`StudyDesign::upsert`], which replaces an existing entity
//! with the same kind and ID in place so repeated promotion never duplicates.

use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Entity kinds & handles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Epoch,
    Encounter,
    Activity,
    Arm,
    StudyCell,
    Intervention,
    ScheduledInstance,
    Timing,
    Administration,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Epoch,
        EntityKind::Encounter,
        EntityKind::Activity,
        EntityKind::Arm,
        EntityKind::StudyCell,
        EntityKind::Intervention,
        EntityKind::ScheduledInstance,
        EntityKind::Timing,
        EntityKind::Administration,
    ];

    /// JSON collection name in the serialized design.
    pub const fn collection(self) -> &'static str {
        match self {
            EntityKind::Epoch => "epochs",
            EntityKind::Encounter => "encounters",
            EntityKind::Activity => "activities",
            EntityKind::Arm => "arms",
            EntityKind::StudyCell => "studyCells",
            EntityKind::Intervention => "interventions",
            EntityKind::ScheduledInstance => "scheduledInstances",
            EntityKind::Timing => "timings",
            EntityKind::Administration => "administrations",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// Position of an entity inside its kind's collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub kind: EntityKind,
    pub index: usize,
}

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Epoch {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_type: Option<String>,
}

/// Visit window surfaced onto the encounter it was matched to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterWindow {
    pub target_day: i32,
    pub before_days: u32,
    pub after_days: u32,
    pub visit_window_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encounter {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_day: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<EncounterWindow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Arm {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arm_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyCell {
    pub id: String,
    pub arm_id: String,
    pub epoch_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intervention {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledInstance {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activity_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_id: Option<String>,
    /// Why a promoted instance exists (`anchor:<fact>`, `repetition:<fact>`, `placeholder:<ref>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_to_instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_from_instance: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_days: Option<i32>,
    /// Source wording, e.g. `"Day -7 (±2)"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitrationStep {
    pub dose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_day: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_day: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Administration {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intervention_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub titration: Vec<TitrationStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_fact: Option<String>,
}

/// Owned tagged union over every graph entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Epoch(Epoch),
    Encounter(Encounter),
    Activity(Activity),
    Arm(Arm),
    StudyCell(StudyCell),
    Intervention(Intervention),
    ScheduledInstance(ScheduledInstance),
    Timing(Timing),
    Administration(Administration),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Epoch(_) => EntityKind::Epoch,
            Entity::Encounter(_) => EntityKind::Encounter,
            Entity::Activity(_) => EntityKind::Activity,
            Entity::Arm(_) => EntityKind::Arm,
            Entity::StudyCell(_) => EntityKind::StudyCell,
            Entity::Intervention(_) => EntityKind::Intervention,
            Entity::ScheduledInstance(_) => EntityKind::ScheduledInstance,
            Entity::Timing(_) => EntityKind::Timing,
            Entity::Administration(_) => EntityKind::Administration,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Epoch(e) => &e.id,
            Entity::Encounter(e) => &e.id,
            Entity::Activity(e) => &e.id,
            Entity::Arm(e) => &e.id,
            Entity::StudyCell(e) => &e.id,
            Entity::Intervention(e) => &e.id,
            Entity::ScheduledInstance(e) => &e.id,
            Entity::Timing(e) => &e.id,
            Entity::Administration(e) => &e.id,
        }
    }
}

/// Borrowed view of any entity.
#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Epoch(&'a Epoch),
    Encounter(&'a Encounter),
    Activity(&'a Activity),
    Arm(&'a Arm),
    StudyCell(&'a StudyCell),
    Intervention(&'a Intervention),
    ScheduledInstance(&'a ScheduledInstance),
    Timing(&'a Timing),
    Administration(&'a Administration),
}

impl<'a> EntityRef<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            EntityRef::Epoch(e) => &e.id,
            EntityRef::Encounter(e) => &e.id,
            EntityRef::Activity(e) => &e.id,
            EntityRef::Arm(e) => &e.id,
            EntityRef::StudyCell(e) => &e.id,
            EntityRef::Intervention(e) => &e.id,
            EntityRef::ScheduledInstance(e) => &e.id,
            EntityRef::Timing(e) => &e.id,
            EntityRef::Administration(e) => &e.id,
        }
    }

    /// Display name; study cells have none.
    pub fn name(&self) -> Option<&'a str> {
        match self {
            EntityRef::Epoch(e) => Some(&e.name),
            EntityRef::Encounter(e) => Some(&e.name),
            EntityRef::Activity(e) => Some(&e.name),
            EntityRef::Arm(e) => Some(&e.name),
            EntityRef::StudyCell(_) => None,
            EntityRef::Intervention(e) => Some(&e.name),
            EntityRef::ScheduledInstance(e) => Some(&e.name),
            EntityRef::Timing(e) => Some(&e.name),
            EntityRef::Administration(e) => Some(&e.name),
        }
    }

    /// Secondary label, where the kind has one.
    pub fn label(&self) -> Option<&'a str> {
        match self {
            EntityRef::Epoch(e) => e.label.as_deref(),
            EntityRef::Encounter(e) => e.label.as_deref(),
            EntityRef::Activity(e) => e.label.as_deref(),
            _ => None,
        }
    }
}

// ============================================================================
// Study design
// ============================================================================

/// Collections whose absence makes a design unusable.
pub const REQUIRED_COLLECTIONS: [&str; 3] = ["epochs", "encounters", "activities"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyDesign {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub epochs: Vec<Epoch>,
    pub encounters: Vec<Encounter>,
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub arms: Vec<Arm>,
    #[serde(default)]
    pub study_cells: Vec<StudyCell>,
    #[serde(default)]
    pub interventions: Vec<Intervention>,
    #[serde(default)]
    pub scheduled_instances: Vec<ScheduledInstance>,
    #[serde(default)]
    pub timings: Vec<Timing>,
    #[serde(default)]
    pub administrations: Vec<Administration>,
    /// Canonical side-channel records keyed `"<namespace>/<record>"`.
    #[serde(default)]
    pub extensions: BTreeMap<String, serde_json::Value>,
}

impl StudyDesign {
    /// Decode a design, failing loudly only on missing required collections.
    pub fn from_json(text: &str) -> Result<Self, GraphError> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, GraphError> {
        let obj = value.as_object().ok_or(GraphError::NotAnObject)?;
        for name in REQUIRED_COLLECTIONS {
            match obj.get(name) {
                None => return Err(GraphError::MissingCollection(name)),
                Some(v) if !v.is_array() => return Err(GraphError::NotACollection(name)),
                Some(_) => {}
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, GraphError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn len_of(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Epoch => self.epochs.len(),
            EntityKind::Encounter => self.encounters.len(),
            EntityKind::Activity => self.activities.len(),
            EntityKind::Arm => self.arms.len(),
            EntityKind::StudyCell => self.study_cells.len(),
            EntityKind::Intervention => self.interventions.len(),
            EntityKind::ScheduledInstance => self.scheduled_instances.len(),
            EntityKind::Timing => self.timings.len(),
            EntityKind::Administration => self.administrations.len(),
        }
    }

    pub fn get(&self, handle: Handle) -> Option<EntityRef<'_>> {
        let i = handle.index;
        Some(match handle.kind {
            EntityKind::Epoch => EntityRef::Epoch(self.epochs.get(i)?),
            EntityKind::Encounter => EntityRef::Encounter(self.encounters.get(i)?),
            EntityKind::Activity => EntityRef::Activity(self.activities.get(i)?),
            EntityKind::Arm => EntityRef::Arm(self.arms.get(i)?),
            EntityKind::StudyCell => EntityRef::StudyCell(self.study_cells.get(i)?),
            EntityKind::Intervention => EntityRef::Intervention(self.interventions.get(i)?),
            EntityKind::ScheduledInstance => {
                EntityRef::ScheduledInstance(self.scheduled_instances.get(i)?)
            }
            EntityKind::Timing => EntityRef::Timing(self.timings.get(i)?),
            EntityKind::Administration => EntityRef::Administration(self.administrations.get(i)?),
        })
    }

    /// Every entity of one kind, in collection order.
    pub fn iter_kind(&self, kind: EntityKind) -> impl Iterator<Item = EntityRef<'_>> + '_ {
        (0..self.len_of(kind)).filter_map(move |index| self.get(Handle { kind, index }))
    }

    pub fn find(&self, kind: EntityKind, id: &str) -> Option<Handle> {
        self.iter_kind(kind)
            .position(|e| e.id() == id)
            .map(|index| Handle { kind, index })
    }

    pub fn contains(&self, kind: EntityKind, id: &str) -> bool {
        self.find(kind, id).is_some()
    }

    /// Insert an entity, replacing one with the same kind and ID in place.
    pub fn upsert(&mut self, entity: Entity) -> Handle {
        let kind = entity.kind();
        let existing = self.find(kind, entity.id());
        macro_rules! put {
            ($coll:expr, $value:expr) => {{
                match existing {
                    Some(h) => {
                        $coll[h.index] = $value;
                        h
                    }
                    None => {
                        $coll.push($value);
                        Handle {
                            kind,
                            index: $coll.len() - 1,
                        }
                    }
                }
            }};
        }
        match entity {
            Entity::Epoch(e) => put!(self.epochs, e),
            Entity::Encounter(e) => put!(self.encounters, e),
            Entity::Activity(e) => put!(self.activities, e),
            Entity::Arm(e) => put!(self.arms, e),
            Entity::StudyCell(e) => put!(self.study_cells, e),
            Entity::Intervention(e) => put!(self.interventions, e),
            Entity::ScheduledInstance(e) => put!(self.scheduled_instances, e),
            Entity::Timing(e) => put!(self.timings, e),
            Entity::Administration(e) => put!(self.administrations, e),
        }
    }

    pub fn epoch(&self, id: &str) -> Option<&Epoch> {
        self.epochs.iter().find(|e| e.id == id)
    }

    pub fn encounter(&self, id: &str) -> Option<&Encounter> {
        self.encounters.iter().find(|e| e.id == id)
    }

    pub fn encounter_mut(&mut self, id: &str) -> Option<&mut Encounter> {
        self.encounters.iter_mut().find(|e| e.id == id)
    }

    pub fn instance(&self, id: &str) -> Option<&ScheduledInstance> {
        self.scheduled_instances.iter().find(|e| e.id == id)
    }

    /// Replace a side-channel record wholesale.
    pub fn set_extension(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.extensions.insert(key.into(), value);
    }

    pub fn extension(&self, key: &str) -> Option<&serde_json::Value> {
        self.extensions.get(key)
    }

    pub fn remove_extension(&mut self, key: &str) -> Option<serde_json::Value> {
        self.extensions.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(id: &str, name: &str) -> Epoch {
        Epoch {
            id: id.to_string(),
            name: name.to_string(),
            label: None,
            epoch_type: None,
        }
    }

    #[test]
    fn upsert_replaces_same_id_in_place() {
        let mut design = StudyDesign::default();
        let a = design.upsert(Entity::Epoch(epoch("e1", "Screening")));
        let b = design.upsert(Entity::Epoch(epoch("e2", "Treatment")));
        let again = design.upsert(Entity::Epoch(epoch("e1", "Screening (renamed)")));

        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(design.epochs.len(), 2);
        assert_eq!(design.epochs[0].name, "Screening (renamed)");
    }

    #[test]
    fn find_and_get_round_trip_through_handles() {
        let mut design = StudyDesign::default();
        design.upsert(Entity::Epoch(epoch("e1", "Screening")));
        let h = design.find(EntityKind::Epoch, "e1").expect("present");
        let entity = design.get(h).expect("valid handle");
        assert_eq!(entity.name(), Some("Screening"));
        assert!(design.find(EntityKind::Encounter, "e1").is_none());
    }

    #[test]
    fn missing_required_collection_fails_loudly() {
        let err = StudyDesign::from_json(r#"{"epochs": [], "encounters": []}"#).unwrap_err();
        assert!(matches!(err, GraphError::MissingCollection("activities")));

        let err = StudyDesign::from_json(r#"{"epochs": {}, "encounters": [], "activities": []}"#)
            .unwrap_err();
        assert!(matches!(err, GraphError::NotACollection("epochs")));

        let err = StudyDesign::from_json("[]").unwrap_err();
        assert!(matches!(err, GraphError::NotAnObject));
    }

    #[test]
    fn optional_collections_default_to_empty() {
        let design =
            StudyDesign::from_json(r#"{"epochs": [], "encounters": [], "activities": []}"#)
                .expect("minimal design decodes");
        assert!(design.arms.is_empty());
        assert!(design.extensions.is_empty());
    }
}
