//! Trialgraph reconciliation engine.
//!
//! Takes a noisy [`FactBundle`](trialgraph_model::FactBundle) and a base
//! [`StudyDesign`](trialgraph_model::StudyDesign) and produces one
//! referentially valid graph plus a severity-classified Issue list.
//!
//! ```text
//!   FactBundle ─┐
//!               ├─► reconcile ─► promotion ─► validate ─► graph + Issues
//!   StudyDesign ┘      │
//!                      ├── AliasIndex      (rebuilt per pass)
//!                      └── EntityResolver  (per-pass cache over a SemanticResolver port)
//! ```
//!
//! The usual entry point is [`Enricher`]. The extraction harness that
//! produces bundles lives in [`harvest`].

pub mod alias;
pub mod config;
pub mod harvest;
#[cfg(feature = "llm-ollama")]
pub mod ollama;
pub mod pass;
pub mod pipeline;
pub mod promotion;
pub mod reconcile;
pub mod records;
pub mod resolver;
pub mod validate;

pub use alias::{AliasIndex, EntityAlias};
pub use config::ReconcileConfig;
pub use harvest::{
    ExtractError, ExtractionPipeline, ExtractorOutcome, FactExtractor, HarvestReport, SourceDocument,
    UsageMeter, UsageSnapshot, Wave,
};
pub use pass::{Pass, PassStats};
pub use pipeline::{EnrichmentReport, Enricher};
pub use records::{CanonicalRecord, ResolvedRef};
pub use resolver::{
    Candidate, DocumentContext, EntityResolver, NoopResolver, ResolutionAnswer, ResolutionMethod,
    ResolutionRequest, ResolvedMapping, ResolverError, SemanticResolver,
};
pub use validate::validate;
