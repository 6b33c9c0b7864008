//! The LLM capability interface the Analyzer consumes, plus a concrete
//! OpenAI-compatible implementation and the structured-output schema types
//! exchanged at each call site.

pub mod client;
pub mod error;
pub mod openai;
pub mod schema;
pub mod types;

pub use client::{LlmClient, RawCompletion, Usage};
pub use error::{Error, Result};
pub use openai::OpenAiClient;
pub use schema::StructuredOutput;
