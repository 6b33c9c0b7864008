//! The Analyzer: a vision-guided, network-capturing browser loop that
//! reverse-engineers a page's internal data APIs into a reusable [`Source`].
//!
//! `analyze()` is the sole public operation; everything else in
//! this crate exists to support it.

pub mod config;
pub mod error;
pub mod extraction;
pub mod loop_;
pub mod strategy;

pub use config::AnalyzerConfig;
pub use error::{Error, Result};
pub use loop_::{AnalyzeResult, AnalyzerLoop};

use std::sync::Arc;
use strot_browser::session::BrowserSession;
use strot_core::model::OutputSchema;
use strot_llm::client::LlmClient;

/// `analyze(url, query, output_schema, config) -> Source | nothing`.
///
/// `url` must be absolute. `browser` and `llm` are the capability
/// collaborators this crate requires — this function never constructs
/// them, matching the "contract-only external collaborators" scoping.
pub async fn analyze(
    url: &str,
    query: &str,
    output_schema: &OutputSchema,
    browser: Box<dyn BrowserSession>,
    llm: Arc<dyn LlmClient>,
    config: AnalyzerConfig,
) -> Result<AnalyzeResult> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(Error::InvalidInput(format!("url must be absolute: {url}")));
    }

    browser.navigate(url).await?;

    let analyzer = AnalyzerLoop::new(browser, llm, config);
    analyzer.run(query, output_schema).await
}
