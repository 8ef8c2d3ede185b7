//! Reconciliation Layer.
//!
//! Steps run in a fixed order over one graph:
//!
//! ```text
//!   crossover gate ─► alias index ─► crossover promotion ─► traversals
//!                                                              │
//!   side channel ◄─ visit windows ◄─ dosing consolidation ◄────┘
//! ```
//!
//! The gate runs before the index is built so a rejected claim never leaves
//! period epochs or sequence arms behind. Records and encounter windows from
//! an earlier pass are cleared first; each step rewrites only what the
//! current bundle supports.

pub mod crossover;
pub mod dosing;
pub mod side_channel;
pub mod traversal;
pub mod windows;

use crate::alias::AliasIndex;
use crate::pass::Pass;
use crate::records;
use trialgraph_model::{CrossoverDesign, DosingRegimen, FactBundle, StudyDesign};

/// What reconciliation hands on to promotion.
#[derive(Debug, Clone, Default)]
pub struct ReconciledFacts {
    /// One canonical regimen per treatment-name group.
    pub regimens: Vec<DosingRegimen>,
    /// The accepted crossover claim, if any.
    pub crossover: Option<CrossoverDesign>,
}

pub fn run(pass: &mut Pass<'_>, design: &mut StudyDesign, bundle: &FactBundle) -> ReconciledFacts {
    records::clear_records(design, pass.config);
    windows::clear_windows(design);

    let crossover = {
        let _span = tracing::debug_span!("crossover_gate", claims = bundle.crossover_designs.len()).entered();
        crossover::gate_crossover_claims(pass, design, &bundle.crossover_designs)
    };

    pass.aliases = AliasIndex::build(design);

    if let Some(fact) = &crossover {
        let _span = tracing::debug_span!("crossover_promotion", fact = %fact.id).entered();
        crossover::promote_crossover(pass, design, fact);
    }

    if !bundle.traversal_constraints.is_empty() {
        let _span = tracing::debug_span!("traversals", constraints = bundle.traversal_constraints.len()).entered();
        traversal::resolve_traversals(pass, design, &bundle.traversal_constraints);
    }

    let regimens = {
        let _span = tracing::debug_span!("dosing", regimens = bundle.dosing_regimens.len()).entered();
        dosing::consolidate_regimens(pass, &bundle.dosing_regimens)
    };

    if !bundle.visit_windows.is_empty() {
        let _span = tracing::debug_span!("visit_windows", windows = bundle.visit_windows.len()).entered();
        windows::normalize_windows(pass, design, &bundle.visit_windows);
    }

    {
        let _span = tracing::debug_span!("side_channel").entered();
        side_channel::resolve_side_channel(pass, design, bundle);
    }

    tracing::debug!(
        regimens = regimens.len(),
        crossover = crossover.is_some(),
        issues = pass.issues.len(),
        "reconciliation complete"
    );
    ReconciledFacts { regimens, crossover }
}
