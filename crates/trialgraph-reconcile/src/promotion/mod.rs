//! Promotion Engine: occurrence facts become first-class graph entities.
//!
//! ```text
//!   TimeAnchor      ─► ScheduledInstance  si_anchor_<slug>
//!   Repetition      ─► ScheduledInstance  si_rep_<rep>_d<day>   (per occurrence)
//!   DosingRegimen   ─► Administration     adm_<slug>
//!   dangling Timing ─► remap, or ScheduledInstance si_placeholder_<slug>
//! ```
//!
//! IDs are derived from the source fact, and every write goes through
//! `StudyDesign::upsert`, so a second pass replaces rather than duplicates.

pub mod administration;
pub mod anchors;
pub mod repair;
pub mod repetition;

use crate::pass::Pass;
use crate::reconcile::ReconciledFacts;
use trialgraph_model::{normalize_label, FactBundle, StudyDesign};

pub use anchors::AnchorMap;

pub fn run(
    pass: &mut Pass<'_>,
    design: &mut StudyDesign,
    bundle: &FactBundle,
    reconciled: &ReconciledFacts,
) -> AnchorMap {
    let anchors = {
        let _span = tracing::debug_span!("anchors", facts = bundle.time_anchors.len()).entered();
        anchors::promote_anchors(pass, design, &bundle.time_anchors)
    };

    if !bundle.repetitions.is_empty() {
        let _span = tracing::debug_span!("repetitions", facts = bundle.repetitions.len()).entered();
        repetition::expand_repetitions(pass, design, &bundle.repetitions);
    }

    if !reconciled.regimens.is_empty() {
        let _span = tracing::debug_span!("administrations", regimens = reconciled.regimens.len()).entered();
        administration::promote_regimens(pass, design, &reconciled.regimens);
    }

    {
        let _span = tracing::debug_span!("reference_repair", timings = design.timings.len()).entered();
        repair::repair_timing_references(pass, design, &anchors);
    }

    anchors
}

/// Turn an identifier-ish reference into words: `FIRST_DOSE_DAY1`,
/// `firstDoseDay1` and `first-dose day 1` all become `first dose day 1`.
pub fn humanize_reference(reference: &str) -> String {
    let mut spaced = String::with_capacity(reference.len() + 8);
    let mut prev: Option<char> = None;
    for c in reference.chars() {
        if let Some(p) = prev {
            let camel = p.is_lowercase() && c.is_uppercase();
            let digit_edge = (p.is_alphabetic() && c.is_ascii_digit()) || (p.is_ascii_digit() && c.is_alphabetic());
            if camel || digit_edge {
                spaced.push(' ');
            }
        }
        spaced.push(c);
        prev = Some(c);
    }
    normalize_label(&spaced)
}
