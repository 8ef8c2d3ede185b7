//! Traversal constraints: ordered phase labels → epoch IDs.

use crate::pass::Pass;
use crate::records::{self, CanonicalRecord, ResolvedRef};
use crate::resolver::{Candidate, ResolvedMapping};
use std::collections::BTreeMap;
use trialgraph_model::{EntityKind, Issue, StudyDesign, TraversalConstraint};

/// Resolve every step (and exit label) of every constraint.
///
/// Alias index first; the leftovers of all constraints go to the semantic
/// resolver in one batch. Steps that still do not resolve stay verbatim and
/// get a Warning naming them.
pub fn resolve_traversals(
    pass: &mut Pass<'_>,
    design: &mut StudyDesign,
    constraints: &[TraversalConstraint],
) {
    let mut resolved: BTreeMap<String, ResolvedMapping> = BTreeMap::new();
    let mut pending: Vec<String> = Vec::new();

    for constraint in constraints {
        for label in constraint.steps.iter().chain(&constraint.exit_labels) {
            if resolved.contains_key(label) || pending.contains(label) {
                continue;
            }
            if design.contains(EntityKind::Epoch, label) {
                resolved.insert(label.clone(), ResolvedMapping::from_alias(label, label));
            } else if let Some(id) = pass.aliases.lookup(EntityKind::Epoch, label) {
                resolved.insert(label.clone(), ResolvedMapping::from_alias(label, id));
            } else {
                pending.push(label.clone());
            }
        }
    }

    if !pending.is_empty() {
        let candidates: Vec<Candidate> = design
            .epochs
            .iter()
            .map(|e| Candidate {
                id: e.id.clone(),
                name: e.name.clone(),
                kind: EntityKind::Epoch,
            })
            .collect();
        let outcome = pass
            .resolver
            .resolve(EntityKind::Epoch, &pending, &candidates, pass.context);
        pass.note_transport_error(outcome.transport_error.clone());
        for (label, mapping) in outcome.mappings {
            if let Some(mapping) = mapping {
                resolved.insert(label, mapping);
            }
        }
    }

    let record_path = format!("/extensions/{}", pass.record_key(records::TRAVERSAL_CONSTRAINTS));
    let mut out: Vec<CanonicalRecord<TraversalConstraint>> = Vec::with_capacity(constraints.len());
    for constraint in constraints {
        let mut fact = constraint.clone();
        let mut references = Vec::new();
        for (i, label) in constraint.steps.iter().enumerate() {
            match resolved.get(label) {
                Some(mapping) => {
                    fact.steps[i] = mapping.entity_id.clone();
                    references.push(ResolvedRef::from_mapping(EntityKind::Epoch.collection(), mapping));
                }
                None => {
                    references.push(ResolvedRef::unresolved(label, EntityKind::Epoch.collection()));
                    pass.issues.push(
                        Issue::warning(
                            "traversal_label_unresolved",
                            &record_path,
                            format!(
                                "traversal step {label:?} of {} matches no epoch; left verbatim",
                                constraint.id
                            ),
                        )
                        .with_ids([constraint.id.clone()])
                        .with_suggestion("add an epoch with this name or an alias for it"),
                    );
                }
            }
        }
        for (i, label) in constraint.exit_labels.iter().enumerate() {
            match resolved.get(label) {
                Some(mapping) => {
                    fact.exit_labels[i] = mapping.entity_id.clone();
                    references.push(ResolvedRef::from_mapping(EntityKind::Epoch.collection(), mapping));
                }
                None => {
                    references.push(ResolvedRef::unresolved(label, EntityKind::Epoch.collection()));
                    pass.issues.push(
                        Issue::warning(
                            "traversal_label_unresolved",
                            &record_path,
                            format!("exit label {label:?} of {} matches no epoch; left verbatim", constraint.id),
                        )
                        .with_ids([constraint.id.clone()]),
                    );
                }
            }
        }
        out.push(CanonicalRecord::new(fact, references));
    }

    pass.stats.resolver_calls = pass.resolver.calls();
    let key = pass.record_key(records::TRAVERSAL_CONSTRAINTS);
    records::write_record(design, &mut pass.issues, &key, &out);
}
