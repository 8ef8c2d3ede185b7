//! Upstream extraction harness: runs sub-extractors and merges their output
//! into one [`FactBundle`].
//!
//! ```text
//!   first wave  (≤ first_wave_width concurrent)   anchors, repetitions, dosing, ...
//!        │ merged bundle becomes `prior`
//!        ▼
//!   second wave (≤ second_wave_width concurrent)  state machine, ...
//! ```
//!
//! A failing extractor yields an [`ExtractorOutcome::Failed`] entry; its
//! siblings and the later reconciliation pass carry on without it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use trialgraph_model::FactBundle;

pub const DEFAULT_FIRST_WAVE_WIDTH: usize = 6;
pub const DEFAULT_SECOND_WAVE_WIDTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Wave {
    /// Independent document regions; no inputs besides the document.
    First,
    /// Consumes the merged first-wave bundle.
    Second,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("LLM call failed: {0}")]
    Llm(String),
    #[error("could not parse extractor output: {0}")]
    Parse(String),
    #[error("required section not found: {0}")]
    MissingSection(String),
    #[error("{0}")]
    Other(String),
}

/// The document being mined.
#[derive(Debug, Clone, Default)]
pub struct SourceDocument {
    pub id: String,
    pub text: String,
}

// ============================================================================
// Usage accounting
// ============================================================================

/// Process-wide token/call counter shared by concurrent extractors.
#[derive(Debug, Default)]
pub struct UsageMeter {
    calls: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl UsageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, prompt_tokens: u64, completion_tokens: u64) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(completion_tokens, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Extractor interface
// ============================================================================

#[async_trait]
pub trait FactExtractor: Send + Sync {
    fn name(&self) -> &str;

    fn wave(&self) -> Wave {
        Wave::First
    }

    /// `prior` is empty for first-wave extractors.
    async fn extract(
        &self,
        doc: &SourceDocument,
        prior: &FactBundle,
        usage: &UsageMeter,
    ) -> Result<FactBundle, ExtractError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractorOutcome {
    Ok { name: String, facts: usize },
    Failed { name: String, error: String },
}

impl ExtractorOutcome {
    pub fn name(&self) -> &str {
        match self {
            ExtractorOutcome::Ok { name, .. } | ExtractorOutcome::Failed { name, .. } => name,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ExtractorOutcome::Failed { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct HarvestReport {
    pub bundle: FactBundle,
    /// First-wave outcomes, then second-wave, each in registration order.
    pub outcomes: Vec<ExtractorOutcome>,
    pub usage: UsageSnapshot,
}

// ============================================================================
// Pipeline
// ============================================================================

pub struct ExtractionPipeline {
    extractors: Vec<Arc<dyn FactExtractor>>,
    first_wave_width: usize,
    second_wave_width: usize,
    usage: Arc<UsageMeter>,
}

impl Default for ExtractionPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ExtractionPipeline {
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
            first_wave_width: DEFAULT_FIRST_WAVE_WIDTH,
            second_wave_width: DEFAULT_SECOND_WAVE_WIDTH,
            usage: Arc::new(UsageMeter::new()),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn FactExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    pub fn with_widths(mut self, first_wave: usize, second_wave: usize) -> Self {
        self.first_wave_width = first_wave.max(1);
        self.second_wave_width = second_wave.max(1);
        self
    }

    /// Share a meter with other pipelines in the process.
    pub fn with_usage_meter(mut self, usage: Arc<UsageMeter>) -> Self {
        self.usage = usage;
        self
    }

    pub fn usage(&self) -> Arc<UsageMeter> {
        self.usage.clone()
    }

    pub async fn run(&self, doc: Arc<SourceDocument>) -> HarvestReport {
        let (first, mut outcomes) = self
            .run_wave(Wave::First, self.first_wave_width, &doc, Arc::new(FactBundle::default()))
            .await;

        let prior = Arc::new(first);
        let (second, second_outcomes) = self
            .run_wave(Wave::Second, self.second_wave_width, &doc, prior.clone())
            .await;
        outcomes.extend(second_outcomes);

        let mut bundle = Arc::try_unwrap(prior).unwrap_or_else(|shared| (*shared).clone());
        bundle.merge(second);

        let failed = outcomes.iter().filter(|o| o.is_failed()).count();
        tracing::info!(
            document = %doc.id,
            extractors = outcomes.len(),
            failed,
            facts = bundle.fact_count(),
            "extraction finished"
        );
        HarvestReport {
            bundle,
            outcomes,
            usage: self.usage.snapshot(),
        }
    }

    async fn run_wave(
        &self,
        wave: Wave,
        width: usize,
        doc: &Arc<SourceDocument>,
        prior: Arc<FactBundle>,
    ) -> (FactBundle, Vec<ExtractorOutcome>) {
        let members: Vec<Arc<dyn FactExtractor>> = self
            .extractors
            .iter()
            .filter(|e| e.wave() == wave)
            .cloned()
            .collect();
        if members.is_empty() {
            return (FactBundle::default(), Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(width.max(1)));
        let mut set = JoinSet::new();
        for (idx, extractor) in members.iter().enumerate() {
            let extractor = extractor.clone();
            let semaphore = semaphore.clone();
            let doc = doc.clone();
            let prior = prior.clone();
            let usage = self.usage.clone();
            set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => extractor.extract(&doc, &prior, &usage).await,
                    Err(e) => Err(ExtractError::Other(format!("worker pool closed: {e}"))),
                };
                (idx, result)
            });
        }

        let mut results: Vec<Option<Result<FactBundle, ExtractError>>> =
            (0..members.len()).map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, result)) => results[idx] = Some(result),
                Err(e) => tracing::warn!(%e, ?wave, "extractor task failed"),
            }
        }

        let mut merged = FactBundle::default();
        let mut outcomes = Vec::with_capacity(members.len());
        for (extractor, result) in members.iter().zip(results) {
            let name = extractor.name().to_string();
            match result {
                Some(Ok(bundle)) => {
                    outcomes.push(ExtractorOutcome::Ok {
                        name,
                        facts: bundle.fact_count(),
                    });
                    merged.merge(bundle);
                }
                Some(Err(e)) => {
                    tracing::warn!(extractor = %name, error = %e, "extractor failed; continuing without it");
                    outcomes.push(ExtractorOutcome::Failed {
                        name,
                        error: e.to_string(),
                    });
                }
                None => outcomes.push(ExtractorOutcome::Failed {
                    name,
                    error: "extractor task panicked or was cancelled".to_string(),
                }),
            }
        }
        (merged, outcomes)
    }
}
