use thiserror::Error;

/// Error kinds recognized by the core. Transient browser/LLM
/// failures and malformed structured output are retried by the loop itself
/// and never surface here; this enum carries only what the loop propagates
/// to its caller: hard infra failures and programmer-facing misuse.
#[derive(Debug, Error)]
pub enum Error {
    #[error("browser session failure: {0}")]
    Browser(#[from] strot_browser::Error),

    #[error("llm call failed: {0}")]
    Llm(#[from] strot_llm::Error),

    #[error(transparent)]
    Core(#[from] strot_core::Error),

    #[error("invalid analyzer input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;
