use thiserror::Error;

/// Structural failures of the base graph itself.
///
/// Everything else (bad facts, dangling references, collisions) is reported
/// as an [`crate::Issue`] and never surfaces here.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("study design is not a JSON object")]
    NotAnObject,
    #[error("study design is missing required collection `{0}`")]
    MissingCollection(&'static str),
    #[error("study design collection `{0}` is not an array")]
    NotACollection(&'static str),
    #[error("failed to decode study design: {0}")]
    Decode(#[from] serde_json::Error),
}
