use thiserror::Error;

/// Errors produced by the pure data-model and matching logic.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cursor extraction failed: {0}")]
    NoExtractableCursor(String),

    #[error("pagination strategy is missing required parameter: {0}")]
    MissingParameter(String),

    #[error("invalid pagination strategy: {0}")]
    InvalidStrategy(String),

    #[error("invalid regex pattern: {0}")]
    Regex(#[from] regex::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
