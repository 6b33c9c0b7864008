use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("browser session error: {0}")]
    Session(#[from] eoka::Error),

    #[error("plugin evaluation failed: {0}")]
    Plugin(String),

    #[error("failed to parse plugin result: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("no page is attached")]
    NoPage,
}

impl Error {
    /// Transient failures are retried by the Analyzer Loop; everything else
    /// escalates to a step failure immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Session(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
