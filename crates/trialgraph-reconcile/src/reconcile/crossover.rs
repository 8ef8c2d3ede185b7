//! Crossover design gating and promotion.
//!
//! A CrossoverDesign claim is checked against the arm structure before it may
//! touch the graph. A rejected claim is dropped with its evidence recorded;
//! it is never "corrected" into something else.

use crate::config::ReconcileConfig;
use crate::pass::Pass;
use crate::records::{self, CanonicalRecord, ResolvedRef};
use crate::resolver::ResolvedMapping;
use std::collections::BTreeSet;
use trialgraph_model::{
    normalize_label, slugify, Arm, CrossoverDesign, Entity, EntityKind, Epoch, Issue, StudyCell,
    StudyDesign,
};

/// Why a crossover claim was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub category: &'static str,
    pub reason: String,
}

impl Rejection {
    fn new(category: &'static str, reason: impl Into<String>) -> Self {
        Self {
            category,
            reason: reason.into(),
        }
    }
}

/// Split a sequence string into its ordered treatments.
///
/// `"A/B"`, `"A-B"`, `"A then B"` and `"placebo → active"` split on the
/// separator; compact uppercase codes such as `"ABC"` split per letter.
pub fn parse_sequence(sequence: &str) -> Vec<String> {
    let s = sequence.trim();
    let lowered = s.to_lowercase();
    let separated = lowered
        .replace("→", "/")
        .replace("->", "/")
        .replace(" then ", "/")
        .replace(|c: char| matches!(c, ',' | '-' | '>'), "/");
    if separated.contains('/') {
        return separated
            .split('/')
            .map(normalize_label)
            .filter(|t| !t.is_empty())
            .collect();
    }
    if !s.is_empty() && s.len() <= 6 && s.chars().all(|c| c.is_ascii_uppercase()) {
        return s.chars().map(|c| c.to_ascii_lowercase().to_string()).collect();
    }
    let single = normalize_label(s);
    if single.is_empty() {
        Vec::new()
    } else {
        vec![single]
    }
}

/// `armType` of arms created for a sequence no existing arm carries.
pub const SEQUENCE_ARM_TYPE: &str = "Crossover Sequence";

/// Arms this engine created for an earlier accepted claim.
pub fn is_promoted_sequence_arm(arm: &Arm) -> bool {
    arm.id.starts_with("arm_sequence_") && arm.arm_type.as_deref() == Some(SEQUENCE_ARM_TYPE)
}

fn is_sequence_named(arm: &Arm, fact: &CrossoverDesign, config: &ReconcileConfig) -> bool {
    let name = normalize_label(&arm.name);
    let has_term = name
        .split(' ')
        .any(|w| config.sequence_arm_terms.iter().any(|t| t == w));
    has_term
        || fact
            .sequences
            .iter()
            .any(|s| normalize_label(s) == name && !name.is_empty())
}

/// Structural checks, in order; the first failing one rejects the claim.
pub fn validate_crossover(
    fact: &CrossoverDesign,
    design: &StudyDesign,
    config: &ReconcileConfig,
) -> Result<(), Rejection> {
    let source_arms: Vec<&Arm> = design
        .arms
        .iter()
        .filter(|a| !is_promoted_sequence_arm(a))
        .collect();
    let arms = source_arms.len();
    let sequences = fact.sequences.len();

    if arms <= 1 && sequences > 1 {
        return Err(Rejection::new(
            "crossover_single_arm",
            format!("{sequences} sequences claimed but the design has {arms} arm(s)"),
        ));
    }

    if arms > 2 && !source_arms.iter().all(|a| is_sequence_named(a, fact, config)) {
        return Err(Rejection::new(
            "crossover_parallel_mismatch",
            format!("{arms} arms without sequence-style naming look like a parallel design"),
        ));
    }

    let parsed: Vec<Vec<String>> = fact.sequences.iter().map(|s| parse_sequence(s)).collect();
    let treatments: BTreeSet<&str> = parsed.iter().flatten().map(String::as_str).collect();

    let switching: Vec<&Vec<String>> = parsed
        .iter()
        .filter(|seq| seq.iter().collect::<BTreeSet<_>>().len() > 1)
        .collect();
    let first_treatments: BTreeSet<&str> = switching
        .iter()
        .filter_map(|seq| seq.first().map(String::as_str))
        .collect();
    if !switching.is_empty() && first_treatments.len() == 1 {
        return Err(Rejection::new(
            "crossover_one_directional_switch",
            format!(
                "every sequence starts on {:?}; a switch without its reciprocal is an extension, not a crossover",
                first_treatments.iter().next().copied().unwrap_or_default()
            ),
        ));
    }

    if fact.periods > 0 {
        let longest = parsed.iter().map(Vec::len).max().unwrap_or(0);
        let k = treatments.len();
        if (k > 2 && (fact.periods as usize) < k) || longest > fact.periods as usize {
            return Err(Rejection::new(
                "crossover_period_mismatch",
                format!(
                    "{} period(s) cannot carry a {k}-way design with sequences of length {longest}",
                    fact.periods
                ),
            ));
        }
    }

    let mut text = fact.sequences.join(" ").to_lowercase();
    if let Some(evidence) = &fact.evidence {
        text.push(' ');
        text.push_str(&evidence.to_lowercase());
    }
    if let Some(term) = config.titration_terms.iter().find(|t| text.contains(t.as_str())) {
        return Err(Rejection::new(
            "crossover_titration_language",
            format!("titration/escalation wording ({term:?}) co-occurs with the crossover claim"),
        ));
    }

    Ok(())
}

/// Validate every claim; return the first accepted one.
pub fn gate_crossover_claims(
    pass: &mut Pass<'_>,
    design: &StudyDesign,
    claims: &[CrossoverDesign],
) -> Option<CrossoverDesign> {
    let mut accepted: Option<CrossoverDesign> = None;
    for fact in claims {
        match validate_crossover(fact, design, pass.config) {
            Err(rejection) => {
                pass.stats.dropped_facts += 1;
                let mut issue = Issue::warning(
                    rejection.category,
                    "/arms",
                    format!("crossover claim {} rejected: {}", fact.id, rejection.reason),
                )
                .with_ids([fact.id.clone()]);
                if let Some(evidence) = &fact.evidence {
                    issue = issue.with_suggestion(format!("evidence: {evidence}"));
                }
                pass.issues.push(issue);
            }
            Ok(()) if accepted.is_some() => {
                pass.issues.push(
                    Issue::info(
                        "crossover_duplicate_ignored",
                        "/arms",
                        format!("crossover claim {} ignored; an earlier claim was already accepted", fact.id),
                    )
                    .with_ids([fact.id.clone()]),
                );
            }
            Ok(()) => accepted = Some(fact.clone()),
        }
    }
    accepted
}

/// Materialize period epochs, an optional washout epoch, one arm per
/// sequence and one study cell per (arm, period).
pub fn promote_crossover(pass: &mut Pass<'_>, design: &mut StudyDesign, fact: &CrossoverDesign) {
    let periods = if fact.periods > 0 {
        fact.periods as usize
    } else {
        fact.sequences
            .iter()
            .map(|s| parse_sequence(s).len())
            .max()
            .unwrap_or(0)
    };

    let mut references: Vec<ResolvedRef> = Vec::new();
    let mut period_epochs: Vec<String> = Vec::new();
    for p in 1..=periods {
        let label = format!("Period {p}");
        let id = ensure_epoch(pass, design, &label, &format!("epoch_period_{p}"), "Treatment");
        references.push(ResolvedRef::from_mapping(
            EntityKind::Epoch.collection(),
            &ResolvedMapping::from_alias(&label, &id),
        ));
        period_epochs.push(id);
    }

    if fact.washout_days.is_some_and(|d| d > 0) {
        let id = ensure_epoch(pass, design, "Washout", "epoch_washout", "Washout");
        references.push(ResolvedRef::from_mapping(
            EntityKind::Epoch.collection(),
            &ResolvedMapping::from_alias("Washout", &id),
        ));
    }

    let assigned = assign_arms(pass, design, fact);
    for (sequence, existing) in fact.sequences.iter().zip(assigned) {
        let label = format!("Sequence {sequence}");
        let arm_id = match existing {
            Some(id) => id,
            None => {
                let id = format!("arm_sequence_{}", slugify(sequence));
                design.upsert(Entity::Arm(Arm {
                    id: id.clone(),
                    name: label.clone(),
                    arm_type: Some(SEQUENCE_ARM_TYPE.to_string()),
                }));
                pass.aliases.register(EntityKind::Arm, &label, &id);
                pass.stats.promoted_arms += 1;
                id
            }
        };
        references.push(ResolvedRef::from_mapping(
            EntityKind::Arm.collection(),
            &ResolvedMapping::from_alias(&label, &arm_id),
        ));

        for epoch_id in &period_epochs {
            let linked = design
                .study_cells
                .iter()
                .any(|c| c.arm_id == arm_id && &c.epoch_id == epoch_id);
            let id = format!("cell_{arm_id}_{epoch_id}");
            if linked && !design.contains(EntityKind::StudyCell, &id) {
                continue;
            }
            design.upsert(Entity::StudyCell(StudyCell {
                id,
                arm_id: arm_id.clone(),
                epoch_id: epoch_id.clone(),
            }));
            pass.stats.promoted_cells += 1;
        }
    }

    let key = pass.record_key(records::CROSSOVER_DESIGN);
    records::write_record(
        design,
        &mut pass.issues,
        &key,
        &CanonicalRecord::new(fact.clone(), references),
    );
}

/// Existing arm for each sequence, in sequence order.
///
/// Name matches come first. When the design has exactly one non-promoted arm
/// per sequence, the sequences left over take the unmatched arms in design
/// order, with an Info naming the pairing.
fn assign_arms(pass: &mut Pass<'_>, design: &StudyDesign, fact: &CrossoverDesign) -> Vec<Option<String>> {
    let mut assigned: Vec<Option<String>> = fact
        .sequences
        .iter()
        .map(|sequence| {
            pass.aliases
                .lookup_exact(EntityKind::Arm, &format!("Sequence {sequence}"))
                .or_else(|| pass.aliases.lookup_exact(EntityKind::Arm, sequence))
                .map(str::to_string)
        })
        .collect();

    let source: Vec<&str> = design
        .arms
        .iter()
        .filter(|a| !is_promoted_sequence_arm(a))
        .map(|a| a.id.as_str())
        .collect();
    if source.len() != fact.sequences.len() {
        return assigned;
    }

    let taken: BTreeSet<String> = assigned.iter().flatten().cloned().collect();
    let mut free = source.into_iter().filter(|id| !taken.contains(*id));
    let mut pairing = Vec::new();
    for (sequence, slot) in fact.sequences.iter().zip(assigned.iter_mut()) {
        if slot.is_some() {
            continue;
        }
        if let Some(id) = free.next() {
            pairing.push(format!("{sequence} -> {id}"));
            *slot = Some(id.to_string());
        }
    }
    if !pairing.is_empty() {
        pass.issues.push(
            Issue::info(
                "crossover_arm_assumed",
                "/arms",
                format!(
                    "crossover claim {}: sequences paired with existing arms by position ({})",
                    fact.id,
                    pairing.join(", ")
                ),
            )
            .with_ids(std::iter::once(fact.id.clone()).chain(assigned.iter().flatten().cloned())),
        );
    }
    assigned
}

fn ensure_epoch(
    pass: &mut Pass<'_>,
    design: &mut StudyDesign,
    label: &str,
    id: &str,
    epoch_type: &str,
) -> String {
    if let Some(existing) = pass.aliases.lookup_exact(EntityKind::Epoch, label) {
        return existing.to_string();
    }
    design.upsert(Entity::Epoch(Epoch {
        id: id.to_string(),
        name: label.to_string(),
        label: None,
        epoch_type: Some(epoch_type.to_string()),
    }));
    pass.aliases.register(EntityKind::Epoch, label, id);
    pass.stats.promoted_epochs += 1;
    id.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::AliasIndex;
    use crate::resolver::DocumentContext;

    fn arm(id: &str, name: &str) -> Arm {
        Arm {
            id: id.to_string(),
            name: name.to_string(),
            arm_type: None,
        }
    }

    fn claim(sequences: &[&str], periods: u32) -> CrossoverDesign {
        CrossoverDesign {
            id: "xo_1".to_string(),
            sequences: sequences.iter().map(|s| s.to_string()).collect(),
            periods,
            washout_days: None,
            evidence: None,
            provenance: "test".to_string(),
        }
    }

    fn design_with(arms: Vec<Arm>) -> StudyDesign {
        StudyDesign {
            arms,
            ..StudyDesign::default()
        }
    }

    #[test]
    fn parses_sequence_shapes() {
        assert_eq!(parse_sequence("AB"), vec!["a", "b"]);
        assert_eq!(parse_sequence("A/B/C"), vec!["a", "b", "c"]);
        assert_eq!(parse_sequence("Placebo → Drug X"), vec!["placebo", "drug x"]);
        assert_eq!(parse_sequence("placebo then active"), vec!["placebo", "active"]);
    }

    #[test]
    fn single_arm_with_many_sequences_is_rejected() {
        let d = design_with(vec![arm("a1", "Sequence AB")]);
        let err = validate_crossover(&claim(&["AB", "BA"], 2), &d, &ReconcileConfig::default()).unwrap_err();
        assert_eq!(err.category, "crossover_single_arm");
    }

    #[test]
    fn one_directional_switch_is_rejected() {
        let d = design_with(vec![arm("a1", "Placebo then Drug"), arm("a2", "Drug only")]);
        let err = validate_crossover(
            &claim(&["Placebo/Drug", "Placebo/Drug/Drug"], 0),
            &d,
            &ReconcileConfig::default(),
        )
        .unwrap_err();
        assert_eq!(err.category, "crossover_one_directional_switch");
    }

    #[test]
    fn three_way_needs_three_periods() {
        let d = design_with(vec![
            arm("a1", "Sequence ABC"),
            arm("a2", "Sequence BCA"),
            arm("a3", "Sequence CAB"),
        ]);
        let cfg = ReconcileConfig::default();
        assert!(validate_crossover(&claim(&["ABC", "BCA", "CAB"], 3), &d, &cfg).is_ok());
        let err = validate_crossover(&claim(&["ABC", "BCA", "CAB"], 2), &d, &cfg).unwrap_err();
        assert_eq!(err.category, "crossover_period_mismatch");
    }

    #[test]
    fn titration_language_is_rejected() {
        let d = design_with(vec![arm("a1", "Sequence AB"), arm("a2", "Sequence BA")]);
        let mut c = claim(&["AB", "BA"], 2);
        c.evidence = Some("Subjects will be up-titrated to 20 mg in period 2".to_string());
        let err = validate_crossover(&c, &d, &ReconcileConfig::default()).unwrap_err();
        assert_eq!(err.category, "crossover_titration_language");
    }

    #[test]
    fn two_plain_arms_take_the_sequences_in_order() {
        let config = ReconcileConfig::default();
        let context = DocumentContext::default();
        let mut design = design_with(vec![arm("arm_x", "Drug X"), arm("arm_pbo", "Placebo")]);
        let fact = claim(&["AB", "BA"], 2);

        let mut pass = Pass::new(&config, &context, None);
        pass.aliases = AliasIndex::build(&design);
        promote_crossover(&mut pass, &mut design, &fact);

        assert_eq!(design.arms.len(), 2);
        assert_eq!(pass.stats.promoted_arms, 0);
        assert_eq!(pass.issues.by_category("crossover_arm_assumed").count(), 1);
        assert!(design.contains(EntityKind::StudyCell, "cell_arm_x_epoch_period_1"));
        assert!(design.contains(EntityKind::StudyCell, "cell_arm_pbo_epoch_period_2"));
        assert!(validate_crossover(&fact, &design, &config).is_ok());
    }

    #[test]
    fn promoted_arms_do_not_count_as_parallel_arms() {
        let config = ReconcileConfig::default();
        let context = DocumentContext::default();
        let mut design = design_with(vec![arm("arm_1", "Cohort 1"), arm("arm_2", "Cohort 2")]);
        let fact = claim(&["AB", "BA", "AA"], 2);

        let mut pass = Pass::new(&config, &context, None);
        pass.aliases = AliasIndex::build(&design);
        promote_crossover(&mut pass, &mut design, &fact);

        assert_eq!(design.arms.len(), 5);
        assert_eq!(design.arms.iter().filter(|a| is_promoted_sequence_arm(a)).count(), 3);
        assert!(validate_crossover(&claim(&["AB", "BA"], 2), &design, &config).is_ok());
    }
}
