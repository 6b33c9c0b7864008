//! C6: Strategy Builder — pagination-parameter classification, cursor
//! pattern assembly, and extraction-code synthesis and validation.

use crate::config::AnalyzerConfig;
use crate::extraction;
use std::sync::Arc;
use strot_core::cursor::{extract_patterns, CursorPatternSet};
use strot_core::model::{
    CapturedResponse, NumberRole, OutputSchema, PaginationParameter, PaginationStrategy, Source,
};
use strot_llm::client::LlmClient;
use strot_llm::types::{
    ClassificationResult, ExtractionSynthesisResult, ParameterCandidate, ParameterRole,
};
use strot_llm::StructuredOutput;
use tracing::{debug, info, warn};

/// Why the Strategy Builder declined to produce a Source for this
/// response. Not an error — the Analyzer Loop continues on any
/// of these.
#[derive(Debug)]
pub enum BuildOutcome {
    Built(Source),
    NoRoleClassified,
    MissingMandatoryRole,
    NoCursorPatterns,
    ExtractionFailed,
}

pub struct StrategyBuilder {
    llm: Arc<dyn LlmClient>,
    config: AnalyzerConfig,
}

impl StrategyBuilder {
    pub fn new(llm: Arc<dyn LlmClient>, config: AnalyzerConfig) -> Self {
        Self { llm, config }
    }

    /// Candidate-parameter extraction (§4.6.1 step 1): every query/body
    /// field whose value is an integer or a string of length >= 8.
    fn candidate_parameters(response: &CapturedResponse) -> Vec<ParameterCandidate> {
        let mut candidates = Vec::new();
        for (key, value) in &response.request.query {
            if is_candidate_value(value) {
                candidates.push(ParameterCandidate {
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        if let Some(strot_core::model::Body::Json(map)) = &response.request.body {
            for (key, value) in map {
                let as_str = match value {
                    serde_json::Value::String(s) => Some(s.clone()),
                    serde_json::Value::Number(n) => Some(n.to_string()),
                    _ => None,
                };
                if let Some(s) = as_str {
                    if is_candidate_value(&s) {
                        candidates.push(ParameterCandidate { key: key.clone(), value: s });
                    }
                }
            }
        }
        candidates
    }

    async fn classify(
        &self,
        candidates: &[ParameterCandidate],
    ) -> Option<ClassificationResult> {
        let schema = ClassificationResult::structured_schema();
        let prompt = classification_prompt(candidates);

        for attempt in 1..=self.config.max_classification_attempts {
            match self
                .llm
                .complete_text(&prompt, "pagination_classification", schema.clone())
                .await
            {
                Ok(completion) => match serde_json::from_str::<ClassificationResult>(&completion.text) {
                    Ok(parsed) => {
                        let valid = parsed
                            .classifications
                            .iter()
                            .all(|c| candidates.iter().any(|cand| cand.key == c.key));
                        if valid {
                            return Some(parsed);
                        }
                        warn!(
                            event = "classification:malformed",
                            status = "pending",
                            reason = "classification named a key outside the candidate set",
                            attempt
                        );
                    }
                    Err(e) => {
                        warn!(event = "classification:malformed", status = "pending", reason = %e, attempt);
                    }
                },
                Err(e) if e.is_transient() && attempt < self.config.max_classification_attempts => {
                    warn!(event = "classification:retry", status = "pending", reason = %e, attempt);
                }
                Err(e) => {
                    warn!(event = "classification:failed", status = "failed", reason = %e);
                    return None;
                }
            }
        }
        None
    }

    fn assemble_strategy(
        classification: &ClassificationResult,
        candidates: &[ParameterCandidate],
    ) -> Option<PaginationStrategy> {
        if classification.classifications.is_empty() {
            return None;
        }

        let find = |role: ParameterRole| -> Option<&ParameterCandidate> {
            classification
                .classifications
                .iter()
                .find(|c| c.role == role)
                .and_then(|c| candidates.iter().find(|cand| cand.key == c.key))
        };

        let number_param = |cand: &ParameterCandidate, role: NumberRole| PaginationParameter::Number {
            name: cand.key.clone(),
            default: cand.value.parse().unwrap_or(0),
            role,
        };

        let page = find(ParameterRole::Page);
        let limit = find(ParameterRole::Limit);
        let offset = find(ParameterRole::Offset);
        let cursor = find(ParameterRole::Cursor);

        if let Some(cursor) = cursor {
            let limit_param = limit.map(|l| number_param(l, NumberRole::Limit));
            return Some(PaginationStrategy::CursorBased {
                cursor: PaginationParameter::Cursor {
                    name: cursor.key.clone(),
                    observed_value: cursor.value.clone(),
                    patterns: Vec::new(),
                },
                limit: limit_param,
            });
        }
        if let (Some(page), Some(limit)) = (page, limit) {
            return Some(PaginationStrategy::PageBased {
                page: number_param(page, NumberRole::Page),
                limit: number_param(limit, NumberRole::Limit),
            });
        }
        if let (Some(page), Some(offset)) = (page, offset) {
            let base_offset = offset.value.parse().unwrap_or(0);
            return Some(PaginationStrategy::PageOffset {
                page: number_param(page, NumberRole::Page),
                offset: number_param(offset, NumberRole::Offset),
                base_offset,
            });
        }
        if let (Some(limit), Some(offset)) = (limit, offset) {
            return Some(PaginationStrategy::LimitOffset {
                limit: number_param(limit, NumberRole::Limit),
                offset: number_param(offset, NumberRole::Offset),
            });
        }
        None
    }

    /// Cursor pattern training (§4.6.1 step 4): train C2 against every
    /// *other* captured response body, keeping the union of patterns that
    /// successfully extract.
    fn train_cursor_patterns(cursor_value: &str, history: &[CapturedResponse]) -> Vec<String> {
        let mut set = CursorPatternSet::default();
        for response in history {
            if let Ok(patterns) = extract_patterns(cursor_value, &response.body) {
                set.patterns.extend(patterns);
            }
        }
        set.patterns.into_iter().map(|p| p.regex).collect()
    }

    async fn synthesize_extraction(
        &self,
        response: &CapturedResponse,
        schema: &OutputSchema,
    ) -> Option<(String, u32)> {
        let output_schema = ExtractionSynthesisResult::structured_schema();
        let body = response.effective_body();
        let mut repair_note = String::new();

        for attempt in 1..=self.config.max_extraction_attempts {
            let prompt = synthesis_prompt(schema, &body, &repair_note);
            let completion = match self
                .llm
                .complete_text(&prompt, "extraction_synthesis", output_schema.clone())
                .await
            {
                Ok(c) => c,
                Err(e) => {
                    warn!(event = "extraction:llm_failed", status = "failed", reason = %e, attempt);
                    continue;
                }
            };

            let parsed: ExtractionSynthesisResult = match serde_json::from_str(&completion.text) {
                Ok(p) => p,
                Err(e) => {
                    repair_note = format!("Your previous response was not valid JSON: {e}");
                    continue;
                }
            };

            match extraction::run(&parsed.program, &body, schema) {
                Ok(records) => {
                    info!(event = "extraction:accepted", status = "success", attempt);
                    let source = serde_json::to_string(&parsed.program).ok()?;
                    return Some((source, records.len() as u32));
                }
                Err(e) => {
                    debug!(event = "extraction:retry", status = "pending", reason = %e, attempt);
                    repair_note = format!(
                        "Your previous extraction program failed with: {e}. Body (truncated): {}",
                        &body.chars().take(500).collect::<String>()
                    );
                }
            }
        }
        warn!(event = "extraction:exhausted", status = "failed");
        None
    }

    /// Run both sub-tasks in order against `response`, given the full
    /// capture history for cursor training.
    pub async fn build(
        &self,
        response: &CapturedResponse,
        history: &[CapturedResponse],
        schema: &OutputSchema,
    ) -> BuildOutcome {
        let candidates = Self::candidate_parameters(response);
        let Some(classification) = self.classify(&candidates).await else {
            return BuildOutcome::NoRoleClassified;
        };

        let Some(mut strategy) = Self::assemble_strategy(&classification, &candidates) else {
            return BuildOutcome::MissingMandatoryRole;
        };

        if let PaginationStrategy::CursorBased { cursor, .. } = &mut strategy {
            if let PaginationParameter::Cursor {
                observed_value,
                patterns,
                ..
            } = cursor
            {
                let others: Vec<CapturedResponse> = history
                    .iter()
                    .filter(|r| r.ordinal != response.ordinal)
                    .cloned()
                    .collect();
                *patterns = Self::train_cursor_patterns(observed_value, &others);
                if patterns.is_empty() {
                    return BuildOutcome::NoCursorPatterns;
                }
            }
        }

        if strategy.validate_against(&response.request).is_err() {
            return BuildOutcome::MissingMandatoryRole;
        }

        let Some((extraction_source, default_limit)) =
            self.synthesize_extraction(response, schema).await
        else {
            return BuildOutcome::ExtractionFailed;
        };

        BuildOutcome::Built(Source {
            request: response.request.clone(),
            strategy,
            preprocessor: response.preprocessor.clone(),
            extraction_source,
            default_limit: default_limit.max(1),
        })
    }
}

fn is_candidate_value(value: &str) -> bool {
    value.parse::<i64>().is_ok() || value.len() >= 8
}

fn classification_prompt(candidates: &[ParameterCandidate]) -> String {
    let list = candidates
        .iter()
        .map(|c| format!("- {} = {}", c.key, c.value))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Classify each candidate request parameter below into one of: page, limit, offset, cursor, unclassified.\n\
         Only use keys from this list, verbatim:\n{list}\n\
         Return only classifications for keys you are confident about."
    )
}

fn synthesis_prompt(schema: &OutputSchema, body: &str, repair_note: &str) -> String {
    let schema_json = serde_json::to_string_pretty(schema).unwrap_or_default();
    let truncated: String = body.chars().take(4000).collect();
    format!(
        "Given this response body:\n{truncated}\n\nProduce an ExtractionProgram that extracts records \
         matching this schema:\n{schema_json}\n{repair_note}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_value_accepts_integers_and_long_strings() {
        assert!(is_candidate_value("42"));
        assert!(is_candidate_value("abcdefgh12345"));
        assert!(!is_candidate_value("abc"));
    }

    #[test]
    fn assemble_limit_offset_strategy() {
        let candidates = vec![
            ParameterCandidate { key: "limit".into(), value: "20".into() },
            ParameterCandidate { key: "offset".into(), value: "0".into() },
        ];
        let classification = ClassificationResult {
            classifications: vec![
                strot_llm::types::ParameterClassification {
                    key: "limit".into(),
                    role: ParameterRole::Limit,
                },
                strot_llm::types::ParameterClassification {
                    key: "offset".into(),
                    role: ParameterRole::Offset,
                },
            ],
        };
        let strategy = StrategyBuilder::assemble_strategy(&classification, &candidates).unwrap();
        assert!(matches!(strategy, PaginationStrategy::LimitOffset { .. }));
    }

    #[test]
    fn assemble_cursor_strategy_prefers_cursor_role() {
        let candidates = vec![
            ParameterCandidate { key: "limit".into(), value: "5".into() },
            ParameterCandidate {
                key: "lastEvaluated".into(),
                value: "abcdefgh12345".into(),
            },
        ];
        let classification = ClassificationResult {
            classifications: vec![
                strot_llm::types::ParameterClassification {
                    key: "limit".into(),
                    role: ParameterRole::Limit,
                },
                strot_llm::types::ParameterClassification {
                    key: "lastEvaluated".into(),
                    role: ParameterRole::Cursor,
                },
            ],
        };
        let strategy = StrategyBuilder::assemble_strategy(&classification, &candidates).unwrap();
        assert!(matches!(strategy, PaginationStrategy::CursorBased { .. }));
    }

    #[test]
    fn assemble_returns_none_when_no_role_classified() {
        let classification = ClassificationResult { classifications: vec![] };
        assert!(StrategyBuilder::assemble_strategy(&classification, &[]).is_none());
    }
}
