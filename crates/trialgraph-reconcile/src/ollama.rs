//! Ollama-backed [`SemanticResolver`] (feature `llm-ollama`).
//!
//! One blocking `/api/chat` call per batch, JSON output mode, temperature 0.

use crate::resolver::{ResolutionAnswer, ResolutionRequest, ResolverError, SemanticResolver};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub const TRIALGRAPH_LLM_TIMEOUT_SECS_ENV: &str = "TRIALGRAPH_LLM_TIMEOUT_SECS";
pub const DEFAULT_LLM_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";

const SYSTEM_PROMPT: &str = "You map free-text study phase and visit labels onto entities of a \
study design. For every label choose at most one candidate id, or null when none fits. \
Answer with JSON: {\"answers\": [{\"label\": str, \"resolvedId\": str|null, \
\"confidence\": number 0..1, \"rationale\": str}]}. Never invent ids.";

/// Resolve the effective LLM timeout.
///
/// Precedence: explicit override, then `TRIALGRAPH_LLM_TIMEOUT_SECS`, then the
/// default. `0` disables the timeout.
pub fn llm_timeout(timeout_secs_override: Option<u64>) -> Result<Option<Duration>, ResolverError> {
    let secs = match timeout_secs_override {
        Some(v) => v,
        None => match std::env::var(TRIALGRAPH_LLM_TIMEOUT_SECS_ENV) {
            Ok(v) if v.trim().is_empty() => DEFAULT_LLM_TIMEOUT_SECS,
            Ok(v) => v.trim().parse::<u64>().map_err(|_| {
                ResolverError::Transport(format!(
                    "invalid {TRIALGRAPH_LLM_TIMEOUT_SECS_ENV}={v:?} (expected integer seconds; 0 disables)"
                ))
            })?,
            Err(std::env::VarError::NotPresent) => DEFAULT_LLM_TIMEOUT_SECS,
            Err(e) => {
                return Err(ResolverError::Transport(format!(
                    "failed to read {TRIALGRAPH_LLM_TIMEOUT_SECS_ENV}: {e}"
                )))
            }
        },
    };
    Ok(if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    })
}

fn normalize_ollama_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

#[derive(Debug, Clone)]
pub struct OllamaResolver {
    host: String,
    model: String,
    timeout: Option<Duration>,
}

impl OllamaResolver {
    pub fn new(host: &str, model: &str, timeout: Option<Duration>) -> Self {
        Self {
            host: normalize_ollama_host(host),
            model: model.to_string(),
            timeout,
        }
    }

    fn user_prompt(request: &ResolutionRequest) -> Result<String, ResolverError> {
        let payload = json!({
            "labels": request.labels,
            "candidates": request.candidates,
            "context": request.context_summary,
            "excerpt": request.excerpt,
        });
        serde_json::to_string_pretty(&payload)
            .map_err(|e| ResolverError::InvalidResponse(format!("failed to encode request: {e}")))
    }
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaChatMessage,
}

#[derive(Deserialize)]
struct OllamaChatMessage {
    content: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AnswerEnvelope {
    Wrapped { answers: Vec<ResolutionAnswer> },
    Bare(Vec<ResolutionAnswer>),
}

/// Parse the model's JSON content into answers.
pub fn parse_answers(content: &str) -> Result<Vec<ResolutionAnswer>, ResolverError> {
    let envelope: AnswerEnvelope = serde_json::from_str(content.trim())
        .map_err(|e| ResolverError::InvalidResponse(format!("{e}: {content}")))?;
    Ok(match envelope {
        AnswerEnvelope::Wrapped { answers } => answers,
        AnswerEnvelope::Bare(answers) => answers,
    })
}

impl SemanticResolver for OllamaResolver {
    fn classify(&self, request: &ResolutionRequest) -> Result<Vec<ResolutionAnswer>, ResolverError> {
        let url = format!("{}/api/chat", self.host);
        let body = json!({
            "model": self.model,
            "stream": false,
            "format": "json",
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": Self::user_prompt(request)? },
            ],
            "options": { "temperature": 0 }
        });

        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ResolverError::Transport(format!("failed to build http client: {e}")))?;

        let resp = client.post(&url).json(&body).send().map_err(|e| {
            ResolverError::Transport(format!("failed to reach ollama at {url} ({e})"))
        })?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().unwrap_or_default();
            return Err(ResolverError::Transport(format!("ollama http error {status}: {text}")));
        }
        let out: OllamaChatResponse = resp
            .json()
            .map_err(|e| ResolverError::InvalidResponse(format!("ollama returned invalid JSON: {e}")))?;
        parse_answers(&out.message.content)
    }
}
