//! State owned by one enrichment pass.
//!
//! Everything here is constructed fresh per call and dropped at the end, so
//! nothing (aliases, resolver answers) leaks from one document to the next.

use crate::alias::AliasIndex;
use crate::config::ReconcileConfig;
use crate::records::ResolvedRef;
use crate::resolver::{DocumentContext, EntityResolver, ResolvedMapping, SemanticResolver};
use serde::{Deserialize, Serialize};
use trialgraph_model::{EntityKind, Issue, IssueLog, StudyDesign};

/// Counters reported alongside the issue list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassStats {
    pub resolver_calls: usize,
    pub dropped_facts: usize,
    pub promoted_epochs: usize,
    pub promoted_arms: usize,
    pub promoted_cells: usize,
    pub promoted_instances: usize,
    pub administrations: usize,
    pub repaired_references: usize,
    pub synthesized_instances: usize,
}

pub struct Pass<'a> {
    pub config: &'a ReconcileConfig,
    pub context: &'a DocumentContext,
    pub aliases: AliasIndex,
    pub resolver: EntityResolver<'a>,
    pub issues: IssueLog,
    pub stats: PassStats,
    resolver_down_reported: bool,
}

impl<'a> Pass<'a> {
    pub fn new(
        config: &'a ReconcileConfig,
        context: &'a DocumentContext,
        port: Option<&'a dyn SemanticResolver>,
    ) -> Self {
        Self {
            config,
            context,
            aliases: AliasIndex::new(),
            resolver: EntityResolver::new(port, config.min_resolver_confidence),
            issues: IssueLog::new(),
            stats: PassStats::default(),
            resolver_down_reported: false,
        }
    }

    pub fn record_key(&self, record: &str) -> String {
        self.config.record_key(record)
    }

    /// Report a resolver transport failure once per pass.
    pub fn note_transport_error(&mut self, error: Option<String>) {
        let Some(error) = error else {
            return;
        };
        if self.resolver_down_reported {
            return;
        }
        self.resolver_down_reported = true;
        self.issues.push(
            Issue::warning(
                "resolver_unavailable",
                "/",
                format!("semantic resolver unavailable, labels left unresolved: {error}"),
            )
            .with_suggestion("check the resolver backend; alias-only resolution was used"),
        );
    }

    /// Deterministic resolution: literal ID, then alias index, over `kinds` in order.
    pub fn resolve_ref(&self, design: &StudyDesign, kinds: &[EntityKind], label: &str) -> ResolvedRef {
        for kind in kinds {
            if design.contains(*kind, label) {
                return ResolvedRef::from_mapping(
                    kind.collection(),
                    &ResolvedMapping::from_alias(label, label),
                );
            }
            if let Some(id) = self.aliases.lookup(*kind, label) {
                return ResolvedRef::from_mapping(kind.collection(), &ResolvedMapping::from_alias(label, id));
            }
        }
        let target = kinds.first().map(|k| k.collection()).unwrap_or("unknown");
        ResolvedRef::unresolved(label, target)
    }

    /// [`resolve_ref`](Self::resolve_ref) for every label, with one Warning per miss.
    pub fn resolve_refs(
        &mut self,
        design: &StudyDesign,
        kinds: &[EntityKind],
        labels: &[String],
        owner_path: &str,
        owner_id: &str,
    ) -> Vec<ResolvedRef> {
        let mut out = Vec::with_capacity(labels.len());
        for label in labels {
            let r = self.resolve_ref(design, kinds, label);
            if !r.is_resolved() {
                self.issues.push(
                    Issue::warning(
                        "label_unresolved",
                        owner_path,
                        format!("label {label:?} of {owner_id} matches no {}", r.target),
                    )
                    .with_ids([owner_id]),
                );
            }
            out.push(r);
        }
        out
    }
}
