//! Entity Resolver: abstract label → concrete entity ID via an external
//! semantic service, with a per-pass cache.
//!
//! ```text
//! labels ──► cache hit? ──yes──► cached answer
//!               │
//!               no
//!               ▼
//!   one batched SemanticResolver::classify call (all uncached labels)
//!               │
//!               ├── answer id ∈ candidates, confidence ≥ min ──► Resolved
//!               ├── answer id ∉ candidates / low confidence ───► absent
//!               └── transport error ──────────────────────────► absent (all)
//! ```
//!
//! The resolver never fails a pass: errors degrade to "unresolved" and are
//! surfaced to the caller through [`ResolveOutcome::transport_error`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use trialgraph_model::{normalize_label, EntityKind};

// ============================================================================
// Port types
// ============================================================================

/// A concrete entity the service may choose from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub id: String,
    pub name: String,
    pub kind: EntityKind,
}

/// Document-level context handed to the semantic service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentContext {
    /// Structured summary (design name, phase list, ...).
    pub summary: String,
    /// Short excerpt of the source text around the labels.
    pub excerpt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionRequest {
    pub labels: Vec<String>,
    pub candidates: Vec<Candidate>,
    pub context_summary: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionAnswer {
    pub label: String,
    #[serde(default)]
    pub resolved_id: Option<String>,
    #[serde(default)]
    pub confidence: f32,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("semantic resolver transport error: {0}")]
    Transport(String),
    #[error("semantic resolver returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// External semantic-classification service.
pub trait SemanticResolver: Send + Sync {
    fn classify(&self, request: &ResolutionRequest) -> Result<Vec<ResolutionAnswer>, ResolverError>;
}

/// Resolver that never answers; used when no service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopResolver;

impl SemanticResolver for NoopResolver {
    fn classify(&self, _request: &ResolutionRequest) -> Result<Vec<ResolutionAnswer>, ResolverError> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Resolved mappings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    Alias,
    Semantic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMapping {
    pub label: String,
    pub entity_id: String,
    pub confidence: f32,
    pub rationale: String,
    pub method: ResolutionMethod,
}

impl ResolvedMapping {
    pub fn from_alias(label: &str, entity_id: &str) -> Self {
        Self {
            label: label.to_string(),
            entity_id: entity_id.to_string(),
            confidence: 1.0,
            rationale: "alias index".to_string(),
            method: ResolutionMethod::Alias,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolveOutcome {
    /// Keyed by the label text as requested.
    pub mappings: BTreeMap<String, Option<ResolvedMapping>>,
    pub transport_error: Option<String>,
}

impl ResolveOutcome {
    pub fn get(&self, label: &str) -> Option<&ResolvedMapping> {
        self.mappings.get(label).and_then(Option::as_ref)
    }
}

// ============================================================================
// Entity resolver (one per pass)
// ============================================================================

pub struct EntityResolver<'a> {
    port: Option<&'a dyn SemanticResolver>,
    min_confidence: f32,
    cache: HashMap<(EntityKind, String), Option<ResolvedMapping>>,
    calls: usize,
}

impl<'a> EntityResolver<'a> {
    pub fn new(port: Option<&'a dyn SemanticResolver>, min_confidence: f32) -> Self {
        Self {
            port,
            min_confidence,
            cache: HashMap::new(),
            calls: 0,
        }
    }

    /// External calls made so far in this pass.
    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn cached(&self, kind: EntityKind, label: &str) -> Option<&Option<ResolvedMapping>> {
        self.cache.get(&(kind, normalize_label(label)))
    }

    /// Resolve `labels` against `candidates` (all of one `kind`).
    ///
    /// Uncached labels go out in a single batched call.
    pub fn resolve(
        &mut self,
        kind: EntityKind,
        labels: &[String],
        candidates: &[Candidate],
        context: &DocumentContext,
    ) -> ResolveOutcome {
        let mut outcome = ResolveOutcome::default();

        let mut uncached: Vec<String> = Vec::new();
        for label in labels {
            let key = (kind, normalize_label(label));
            if !self.cache.contains_key(&key) && !uncached.iter().any(|l| normalize_label(l) == key.1)
            {
                uncached.push(label.clone());
            }
        }

        if !uncached.is_empty() {
            let answers = match self.port {
                Some(port) if !candidates.is_empty() => {
                    self.calls += 1;
                    let request = ResolutionRequest {
                        labels: uncached.clone(),
                        candidates: candidates.to_vec(),
                        context_summary: context.summary.clone(),
                        excerpt: context.excerpt.clone(),
                    };
                    match port.classify(&request) {
                        Ok(answers) => answers,
                        Err(err) => {
                            tracing::warn!(error = %err, labels = uncached.len(), "semantic resolver failed");
                            outcome.transport_error = Some(err.to_string());
                            Vec::new()
                        }
                    }
                }
                _ => Vec::new(),
            };

            let by_label: HashMap<String, &ResolutionAnswer> = answers
                .iter()
                .map(|a| (normalize_label(&a.label), a))
                .collect();

            for label in &uncached {
                let key = normalize_label(label);
                let mapping = by_label
                    .get(&key)
                    .and_then(|answer| self.accept(label, answer, candidates));
                self.cache.insert((kind, key), mapping);
            }
        }

        for label in labels {
            let mapping = self
                .cache
                .get(&(kind, normalize_label(label)))
                .cloned()
                .flatten();
            outcome.mappings.insert(label.clone(), mapping);
        }
        outcome
    }

    fn accept(
        &self,
        label: &str,
        answer: &ResolutionAnswer,
        candidates: &[Candidate],
    ) -> Option<ResolvedMapping> {
        let id = answer.resolved_id.as_deref()?;
        if !candidates.iter().any(|c| c.id == id) {
            tracing::debug!(label, id, "resolver answer outside candidate set ignored");
            return None;
        }
        if answer.confidence < self.min_confidence {
            tracing::debug!(label, id, confidence = answer.confidence, "resolver answer below threshold");
            return None;
        }
        Some(ResolvedMapping {
            label: label.to_string(),
            entity_id: id.to_string(),
            confidence: answer.confidence.clamp(0.0, 1.0),
            rationale: answer.rationale.clone(),
            method: ResolutionMethod::Semantic,
        })
    }
}
