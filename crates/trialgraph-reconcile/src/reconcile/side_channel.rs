//! Facts that stay out of the entity collections.
//!
//! Footnotes, endpoints, derived variables, sampling constraints, activity
//! classifications, state machines and randomization schemes are stored as
//! canonical records with every label resolved (or explained by an Issue).

use crate::pass::Pass;
use crate::records::{self, CanonicalRecord, ResolvedRef};
use crate::resolver::ResolutionMethod;
use std::collections::BTreeSet;
use trialgraph_model::{
    normalize_label, DerivedVariable, EntityKind, FactBundle, Issue, RandomizationScheme,
    StudyDesign,
};

const ACTIVITY: &[EntityKind] = &[EntityKind::Activity];
const ENCOUNTER: &[EntityKind] = &[EntityKind::Encounter];

pub fn resolve_side_channel(pass: &mut Pass<'_>, design: &mut StudyDesign, bundle: &FactBundle) {
    if !bundle.footnote_conditions.is_empty() {
        let path = record_path(pass, records::FOOTNOTE_CONDITIONS);
        let mut out = Vec::with_capacity(bundle.footnote_conditions.len());
        for fact in &bundle.footnote_conditions {
            let mut refs = pass.resolve_refs(design, ACTIVITY, &fact.activity_labels, &path, &fact.id);
            refs.extend(pass.resolve_refs(design, ENCOUNTER, &fact.encounter_labels, &path, &fact.id));
            out.push(CanonicalRecord::new(fact.clone(), refs));
        }
        write(pass, design, records::FOOTNOTE_CONDITIONS, &out);
    }

    if !bundle.derived_variables.is_empty() {
        let path = record_path(pass, records::DERIVED_VARIABLES);
        let mut out = Vec::with_capacity(bundle.derived_variables.len());
        for fact in &bundle.derived_variables {
            let refs = fact
                .source_labels
                .iter()
                .map(|label| input_ref(pass, design, &bundle.derived_variables, label, &path, &fact.id))
                .collect();
            out.push(CanonicalRecord::new(fact.clone(), refs));
        }
        write(pass, design, records::DERIVED_VARIABLES, &out);
    }

    if !bundle.endpoint_algorithms.is_empty() {
        let path = record_path(pass, records::ENDPOINT_ALGORITHMS);
        let mut out = Vec::with_capacity(bundle.endpoint_algorithms.len());
        for fact in &bundle.endpoint_algorithms {
            let refs = fact
                .input_labels
                .iter()
                .map(|label| input_ref(pass, design, &bundle.derived_variables, label, &path, &fact.id))
                .collect();
            out.push(CanonicalRecord::new(fact.clone(), refs));
        }
        write(pass, design, records::ENDPOINT_ALGORITHMS, &out);
    }

    if !bundle.sampling_constraints.is_empty() {
        let path = record_path(pass, records::SAMPLING_CONSTRAINTS);
        let mut out = Vec::with_capacity(bundle.sampling_constraints.len());
        for fact in &bundle.sampling_constraints {
            let mut refs = pass.resolve_refs(
                design,
                ACTIVITY,
                std::slice::from_ref(&fact.activity_label),
                &path,
                &fact.id,
            );
            refs.extend(pass.resolve_refs(design, ENCOUNTER, &fact.encounter_labels, &path, &fact.id));
            out.push(CanonicalRecord::new(fact.clone(), refs));
        }
        write(pass, design, records::SAMPLING_CONSTRAINTS, &out);
    }

    if !bundle.activity_classifications.is_empty() {
        let path = record_path(pass, records::ACTIVITY_CLASSIFICATIONS);
        let mut out = Vec::with_capacity(bundle.activity_classifications.len());
        for fact in &bundle.activity_classifications {
            let refs = pass.resolve_refs(
                design,
                ACTIVITY,
                std::slice::from_ref(&fact.activity_label),
                &path,
                &fact.id,
            );
            out.push(CanonicalRecord::new(fact.clone(), refs));
        }
        write(pass, design, records::ACTIVITY_CLASSIFICATIONS, &out);
    }

    if !bundle.state_machines.is_empty() {
        resolve_state_machines(pass, design, bundle);
    }

    if !bundle.randomization_schemes.is_empty() {
        check_randomization(pass, design, &bundle.randomization_schemes);
    }
}

fn record_path(pass: &Pass<'_>, record: &str) -> String {
    format!("/extensions/{}", pass.record_key(record))
}

fn write<T: serde::Serialize>(pass: &mut Pass<'_>, design: &mut StudyDesign, record: &str, value: &T) {
    let key = pass.record_key(record);
    records::write_record(design, &mut pass.issues, &key, value);
}

/// Endpoint/derivation inputs name a derived variable first, an activity otherwise.
fn input_ref(
    pass: &mut Pass<'_>,
    design: &StudyDesign,
    derived: &[DerivedVariable],
    label: &str,
    path: &str,
    owner_id: &str,
) -> ResolvedRef {
    let key = normalize_label(label);
    if let Some(variable) = derived
        .iter()
        .find(|v| v.id == label || normalize_label(&v.name) == key)
    {
        return ResolvedRef {
            label: label.to_string(),
            target: records::DERIVED_VARIABLES.to_string(),
            entity_id: Some(variable.id.clone()),
            confidence: 1.0,
            method: Some(ResolutionMethod::Alias),
        };
    }
    let mut refs = pass.resolve_refs(design, ACTIVITY, &[label.to_string()], path, owner_id);
    refs.pop()
        .unwrap_or_else(|| ResolvedRef::unresolved(label, EntityKind::Activity.collection()))
}

fn resolve_state_machines(pass: &mut Pass<'_>, design: &mut StudyDesign, bundle: &FactBundle) {
    let path = record_path(pass, records::STATE_MACHINES);
    let mut out = Vec::with_capacity(bundle.state_machines.len());

    for machine in &bundle.state_machines {
        let declared: BTreeSet<String> = machine.states.iter().map(|s| normalize_label(s)).collect();

        let mut refs = Vec::with_capacity(machine.states.len());
        let mut unmapped: Vec<&str> = Vec::new();
        for state in &machine.states {
            let r = pass.resolve_ref(design, &[EntityKind::Epoch], state);
            if !r.is_resolved() {
                unmapped.push(state);
            }
            refs.push(r);
        }
        // Terminal and clinical states (Discontinued, Death) rarely have an epoch.
        if !unmapped.is_empty() {
            pass.issues.push(
                Issue::info(
                    "state_epoch_unmapped",
                    &path,
                    format!(
                        "state machine {}: {} state(s) without an epoch: {}",
                        machine.id,
                        unmapped.len(),
                        unmapped.join(", ")
                    ),
                )
                .with_ids([machine.id.clone()]),
            );
        }

        let mut undeclared: BTreeSet<&str> = BTreeSet::new();
        if !declared.contains(&normalize_label(&machine.initial_state)) {
            undeclared.insert(&machine.initial_state);
        }
        for transition in &machine.transitions {
            for end in [&transition.from, &transition.to] {
                if !declared.contains(&normalize_label(end)) {
                    undeclared.insert(end);
                }
            }
        }
        if !undeclared.is_empty() {
            let names: Vec<&str> = undeclared.into_iter().collect();
            pass.issues.push(
                Issue::warning(
                    "state_transition_undeclared",
                    &path,
                    format!(
                        "state machine {} references undeclared state(s): {}",
                        machine.id,
                        names.join(", ")
                    ),
                )
                .with_ids([machine.id.clone()])
                .with_suggestion("add the state to the machine's state list or fix the transition"),
            );
        }

        out.push(CanonicalRecord::new(machine.clone(), refs));
    }

    write(pass, design, records::STATE_MACHINES, &out);
}

/// Stratification cell count, block-size divisibility and ratio/arm agreement.
pub fn check_randomization(
    pass: &mut Pass<'_>,
    design: &mut StudyDesign,
    schemes: &[RandomizationScheme],
) {
    let path = record_path(pass, records::RANDOMIZATION);

    for scheme in schemes {
        if !scheme.stratification.is_empty() {
            let cells = scheme
                .stratification
                .iter()
                .map(|f| f.levels.len().max(1))
                .fold(1usize, usize::saturating_mul);
            if cells > pass.config.max_stratification_cells {
                pass.issues.push(
                    Issue::warning(
                        "stratification_cells_exceeded",
                        &path,
                        format!(
                            "randomization {}: {} stratification cells exceed the maximum of {}",
                            scheme.id, cells, pass.config.max_stratification_cells
                        ),
                    )
                    .with_ids([scheme.id.clone()]),
                );
            }
        }

        let ratio_sum: u64 = scheme.ratio.iter().map(|&r| u64::from(r)).sum();
        if let Some(block) = scheme.block_size {
            if ratio_sum > 0 && u64::from(block) % ratio_sum != 0 {
                pass.issues.push(
                    Issue::warning(
                        "block_size_ratio_mismatch",
                        &path,
                        format!(
                            "randomization {}: block size {block} is not a multiple of the ratio sum {ratio_sum}",
                            scheme.id
                        ),
                    )
                    .with_ids([scheme.id.clone()]),
                );
            }
        }

        if !scheme.ratio.is_empty() && !design.arms.is_empty() && scheme.ratio.len() != design.arms.len() {
            pass.issues.push(
                Issue::info(
                    "randomization_ratio_arm_mismatch",
                    &path,
                    format!(
                        "randomization {}: ratio has {} parts but the design has {} arm(s)",
                        scheme.id,
                        scheme.ratio.len(),
                        design.arms.len()
                    ),
                )
                .with_ids([scheme.id.clone()]),
            );
        }
    }

    write(pass, design, records::RANDOMIZATION, &schemes.to_vec());
}
