//! Data model and pure-compute components (C1 Text Matcher, C2 Cursor
//! Pattern Extractor) shared by the browser, LLM, and analyzer crates.

pub mod cursor;
pub mod error;
pub mod model;
pub mod paginate;
pub mod text_match;

pub use error::{Error, Result};
