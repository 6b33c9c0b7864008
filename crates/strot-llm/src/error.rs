use thiserror::Error;

/// Failure kinds are bounded: transient network, rate-limit, and
/// content-policy refusal each map to a retry or a step-level failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("rate limited")]
    RateLimited,

    #[error("content policy refusal: {0}")]
    Refused(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("could not parse structured output: {0}")]
    Parse(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::RateLimited)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
