//! Request/response shapes exchanged with the LLM at each call site the
//! Analyzer makes: vision step proposal (C5), pagination-role
//! classification (C6.1), and extraction-routine synthesis (C6.2).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// One frame of multimodal input: the running query plus the current
/// viewport screenshot.
#[derive(Debug, Clone)]
pub struct VisionPrompt {
    pub query: String,
    pub screenshot_png: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    ClosePopup,
    LoadMore,
    SkipToContent,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
}

/// Normalized click point in [0, 1] x [0, 1], resolved against the current
/// viewport by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema)]
pub struct NormalizedPoint {
    pub x: f64,
    pub y: f64,
}

/// The structured output requested from the vision call in C5 step 1.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepResult {
    pub text_sections: Vec<String>,
    pub action: StepAction,
    pub point: Option<NormalizedPoint>,
    pub direction: ScrollDirection,
}

/// A single key/value pair observed in a captured request, offered to the
/// classifier as a role candidate.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ParameterCandidate {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParameterRole {
    Page,
    Limit,
    Offset,
    Cursor,
    Unclassified,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ParameterClassification {
    pub key: String,
    pub role: ParameterRole,
}

/// The structured output requested from the classification call in C6.1.
/// Accept only classifications where every named key exists in the
/// candidate set — enforced by the caller, not here.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ClassificationResult {
    pub classifications: Vec<ParameterClassification>,
}

/// A minimal instruction-tree extraction program, serialized to/from the
/// Source's `extraction_source` field. Running LLM-produced *code* safely
/// would require a sandbox no available crate provides; an instruction
/// tree is interpreted natively instead while
/// still being an LLM-synthesized, retried, schema-validated artifact.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionProgram {
    /// Dot-path to the array of records within the body (JSON bodies), or
    /// a CSS selector matching each record element (HTML bodies).
    pub records_path: String,
    pub is_html: bool,
    pub fields: Vec<ExtractionField>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionField {
    pub name: String,
    /// For JSON records: a dot-path relative to the record. For HTML
    /// records: a CSS selector relative to the record element.
    pub source: String,
    /// For HTML sources only: an attribute to read instead of text content.
    pub attribute: Option<String>,
}

/// The structured output requested from the synthesis/repair call in
/// C6.2.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExtractionSynthesisResult {
    pub program: ExtractionProgram,
}
