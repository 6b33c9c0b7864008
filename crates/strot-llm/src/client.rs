//! The multimodal LLM capability the Analyzer consumes from its
//! environment: text + image in, optionally schema-constrained
//! text out, with a per-call cost/token accounting hook.

use crate::error::Result;
use crate::types::VisionPrompt;
use async_trait::async_trait;

/// Accounting for one completed call, reported back to the caller's cost
/// ledger. The Analyzer itself only logs this; persisting a running total
/// is the orchestrating service's responsibility (persisted
/// artifacts).
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

/// A raw completion plus its usage, returned by the capability before the
/// caller validates/deserializes the JSON payload against a schema. Kept
/// non-generic so the trait stays dyn-compatible; typed call sites in
/// `strot-analyzer` deserialize the `text` field themselves.
#[derive(Debug, Clone)]
pub struct RawCompletion {
    pub text: String,
    pub usage: Usage,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// A vision-capable structured-output call: `prompt` carries the text
    /// query and the current screenshot; `schema` is the JSON Schema the
    /// response must conform to; `schema_name` labels it for providers that
    /// require a name per structured-output spec.
    async fn complete_vision(
        &self,
        prompt: &VisionPrompt,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<RawCompletion>;

    /// A text-only structured-output call, used by the Strategy Builder for
    /// classification and extraction synthesis/repair.
    async fn complete_text(
        &self,
        prompt: &str,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<RawCompletion>;
}
