//! One enrichment pass: Reconciliation → Promotion → Validation.

use crate::config::ReconcileConfig;
use crate::pass::{Pass, PassStats};
use crate::resolver::{DocumentContext, SemanticResolver};
use crate::{promotion, reconcile, validate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use trialgraph_model::{FactBundle, Issue, Severity, StudyDesign};

/// Issues plus counters from one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichmentReport {
    pub generated_at: DateTime<Utc>,
    pub issues: Vec<Issue>,
    pub stats: PassStats,
}

impl EnrichmentReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    /// Whether a caller's publish gate should stop.
    pub fn has_blocking(&self) -> bool {
        self.count(Severity::Blocking) > 0
    }

    pub fn by_category<'a>(&'a self, category: &'a str) -> impl Iterator<Item = &'a Issue> + 'a {
        self.issues.iter().filter(move |i| i.category == category)
    }
}

/// Entry point for enriching a design with a fact bundle.
///
/// The enricher itself holds no per-document state; every call to
/// [`enrich`](Self::enrich) builds a fresh alias index and resolver cache.
#[derive(Clone, Default)]
pub struct Enricher {
    config: ReconcileConfig,
    resolver: Option<Arc<dyn SemanticResolver>>,
}

impl Enricher {
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config,
            resolver: None,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn SemanticResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn enrich(
        &self,
        design: &mut StudyDesign,
        bundle: &FactBundle,
        context: &DocumentContext,
    ) -> EnrichmentReport {
        let span = tracing::info_span!("enrich", design = %design.id, facts = bundle.fact_count());
        let _guard = span.enter();

        let mut pass = Pass::new(&self.config, context, self.resolver.as_deref());

        let reconciled = {
            let _span = tracing::info_span!("reconcile").entered();
            reconcile::run(&mut pass, design, bundle)
        };
        {
            let _span = tracing::info_span!("promote").entered();
            promotion::run(&mut pass, design, bundle, &reconciled);
        }
        pass.stats.resolver_calls = pass.resolver.calls();

        let mut issues = pass.issues.into_issues();
        {
            let _span = tracing::info_span!("validate").entered();
            issues.extend(validate::validate(design, &self.config));
        }

        let report = EnrichmentReport {
            generated_at: Utc::now(),
            issues,
            stats: pass.stats,
        };
        tracing::info!(
            blocking = report.count(Severity::Blocking),
            warnings = report.count(Severity::Warning),
            info = report.count(Severity::Info),
            instances = report.stats.promoted_instances,
            "enrichment pass complete"
        );
        report
    }
}
