use std::time::Duration;

/// Tunables for one `analyze()` call. Mirrors
/// `eoka_runner::config::schema::BrowserConfig`'s shape — a plain struct
/// with a sensible `Default` that callers override field-by-field — rather
/// than a file-based config format, since `analyze()`'s parameters (spec
/// §6) are already the complete configuration surface; there is no fixed
/// action list to externalize into YAML the way `eoka-runner` has.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// The loop ends early at this many iterations.
    pub max_steps: u32,
    /// Overall wall-clock deadline for the whole `analyze()` call.
    pub deadline: Option<Duration>,
    /// Per-call timeout applied to each LLM request.
    pub llm_call_timeout: Duration,
    /// Retry budget for transient browser/LLM errors, applied per step and
    /// per LLM call respectively.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Bound on classification retries on malformed output.
    pub max_classification_attempts: u32,
    /// Bound on extraction synthesis/repair attempts.
    pub max_extraction_attempts: u32,
    /// Threshold passed to `find_common_parent` (default 0.8).
    pub common_parent_threshold: f64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_steps: 30,
            deadline: None,
            llm_call_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            max_classification_attempts: 3,
            max_extraction_attempts: 3,
            common_parent_threshold: 0.8,
        }
    }
}
