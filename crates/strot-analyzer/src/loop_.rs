//! C5: the Analyzer Loop — the orchestration core. Generalizes
//! `eoka_runner::Runner::run_with_base_path`'s "iterate a fixed action list
//! with retry-on-failure" into "iterate a *generated* per-step plan up to
//! `max_steps`, with an early exit once a strategy is found."

use crate::config::AnalyzerConfig;
use crate::strategy::{BuildOutcome, StrategyBuilder};
use std::sync::Arc;
use std::time::Instant;
use strot_browser::plugin::{Direction, Plugin};
use strot_browser::session::BrowserSession;
use strot_core::model::{OutputSchema, Preprocessor, ResponseKind, Source};
use strot_core::text_match;
use strot_llm::client::LlmClient;
use strot_llm::types::{StepAction, StepResult, VisionPrompt};
use strot_llm::StructuredOutput;
use tracing::{debug, info, warn};

/// `analyze()`'s result: either a completed Source, or a well-formed
/// negative result.
pub enum AnalyzeResult {
    Found(Source),
    NotFound,
}

pub struct AnalyzerLoop {
    browser: Box<dyn BrowserSession>,
    llm: Arc<dyn LlmClient>,
    config: AnalyzerConfig,
}

impl AnalyzerLoop {
    pub fn new(browser: Box<dyn BrowserSession>, llm: Arc<dyn LlmClient>, config: AnalyzerConfig) -> Self {
        Self { browser, llm, config }
    }

    /// Drive the loop for up to `max_steps` iterations, or until the
    /// deadline elapses, against the given query and output schema.
    pub async fn run(&self, query: &str, schema: &OutputSchema) -> crate::error::Result<AnalyzeResult> {
        let started = Instant::now();
        let mut capture = strot_browser::capture::ResponseCapture::new(Default::default());
        let plugin = Plugin::new(self.browser.as_ref());
        let builder = StrategyBuilder::new(Arc::clone(&self.llm), self.config.clone());

        if self.config.max_steps == 0 {
            info!(event = "analysis:end", status = "failed", reason = "max_steps is zero");
            return Ok(AnalyzeResult::NotFound);
        }

        for step in 0..self.config.max_steps {
            if let Some(deadline) = self.config.deadline {
                if started.elapsed() >= deadline {
                    info!(event = "analysis:end", status = "failed", reason = "deadline exceeded", step);
                    return Ok(AnalyzeResult::NotFound);
                }
            }

            for event in self.browser.drain_events().await.unwrap_or_default() {
                capture.ingest(event);
            }

            let Some(step_result) = self.run_step_with_retry(query, schema, step).await else {
                warn!(event = "step:failed", status = "failed", step);
                continue;
            };

            for event in self.browser.drain_events().await.unwrap_or_default() {
                capture.ingest(event);
            }

            let correlated = self
                .correlate(&plugin, &step_result, &mut capture)
                .await?;

            match correlated {
                Correlation::Matched(idx) => {
                    let history = capture.captures().to_vec();
                    let response = history[idx].clone();
                    match builder.build(&response, &history, schema).await {
                        BuildOutcome::Built(source) => {
                            info!(event = "analysis:end", status = "success", step);
                            return Ok(AnalyzeResult::Found(source));
                        }
                        outcome => {
                            debug!(event = "strategy:miss", status = "pending", step, outcome = ?outcome_name(&outcome));
                        }
                    }
                }
                Correlation::SkippedPast => {
                    debug!(event = "step:skip_past", status = "pending", step);
                }
                Correlation::NoMatch => {
                    self.dispatch_action(&plugin, &step_result).await;
                }
            }
        }

        info!(event = "analysis:end", status = "failed", reason = "max_steps exhausted");
        Ok(AnalyzeResult::NotFound)
    }

    async fn run_step_with_retry(
        &self,
        query: &str,
        schema: &OutputSchema,
        step: u32,
    ) -> Option<StepResult> {
        for attempt in 1..=self.config.max_retries {
            let screenshot = match self.browser.screenshot().await {
                Ok(bytes) => bytes,
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    warn!(event = "step:retry", status = "pending", reason = %e, step, attempt);
                    tokio::time::sleep(self.config.retry_backoff).await;
                    continue;
                }
                Err(e) => {
                    warn!(event = "step:browser_error", status = "failed", reason = %e, step);
                    return None;
                }
            };

            let prompt = VisionPrompt {
                query: query.to_string(),
                screenshot_png: screenshot,
            };
            let schema_value = StepResult::structured_schema();

            match self.llm.complete_vision(&prompt, "step_result", schema_value).await {
                Ok(completion) => match serde_json::from_str::<StepResult>(&completion.text) {
                    Ok(result) => return Some(result),
                    Err(e) => {
                        warn!(event = "step:malformed_output", status = "pending", reason = %e, step, attempt);
                        continue;
                    }
                },
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    warn!(event = "step:retry", status = "pending", reason = %e, step, attempt);
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(e) => {
                    warn!(event = "step:llm_error", status = "failed", reason = %e, step);
                    return None;
                }
            }
        }
        None
    }

    async fn correlate(
        &self,
        plugin: &Plugin<'_, dyn BrowserSession>,
        step_result: &StepResult,
        capture: &mut strot_browser::capture::ResponseCapture,
    ) -> crate::error::Result<Correlation> {
        if step_result.text_sections.is_empty() {
            return Ok(Correlation::NoMatch);
        }

        let common_parent = plugin
            .find_common_parent(&step_result.text_sections, self.config.common_parent_threshold)
            .await
            .unwrap_or(None);

        let best = capture
            .captures()
            .iter()
            .enumerate()
            .map(|(idx, c)| (idx, text_match::match_ratio(&step_result.text_sections, &c.body)))
            .filter(|(_, ratio)| *ratio >= text_match::DECISION_THRESHOLD)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

        if let (Some((idx, _)), Some(parent_selector)) = (best, &common_parent) {
            if capture.captures()[idx].request.kind == ResponseKind::Ssr {
                capture.attach_preprocessor(
                    idx,
                    Preprocessor::HtmlContainer {
                        selector: parent_selector.clone(),
                    },
                );
            }
        }

        if let Some(parent_selector) = &common_parent {
            if let Ok(Some(child_selector)) = plugin.get_last_visible_child(parent_selector).await {
                plugin.scroll_to_element(&child_selector).await.ok();
                return Ok(Correlation::SkippedPast);
            }
        }

        match best {
            Some((idx, _)) => Ok(Correlation::Matched(idx)),
            None => Ok(Correlation::NoMatch),
        }
    }

    async fn dispatch_action(&self, plugin: &Plugin<'_, dyn BrowserSession>, step_result: &StepResult) {
        let dispatched = match step_result.action {
            StepAction::ClosePopup | StepAction::LoadMore | StepAction::SkipToContent => {
                match (step_result.point, plugin.viewport().await) {
                    (Some(p), Ok((width, height))) => {
                        plugin.click_at(p.x * width, p.y * height).await.is_ok()
                    }
                    _ => false,
                }
            }
            StepAction::None => false,
        };

        if !dispatched {
            let direction = match step_result.direction {
                strot_llm::types::ScrollDirection::Up => Direction::Up,
                strot_llm::types::ScrollDirection::Down => Direction::Down,
            };
            let _ = plugin.scroll_to_next_view(direction).await;
        }
    }
}

enum Correlation {
    Matched(usize),
    SkippedPast,
    NoMatch,
}

fn outcome_name(outcome: &BuildOutcome) -> &'static str {
    match outcome {
        BuildOutcome::Built(_) => "built",
        BuildOutcome::NoRoleClassified => "no_role_classified",
        BuildOutcome::MissingMandatoryRole => "missing_mandatory_role",
        BuildOutcome::NoCursorPatterns => "no_cursor_patterns",
        BuildOutcome::ExtractionFailed => "extraction_failed",
    }
}
