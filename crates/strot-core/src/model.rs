//! The Analyzer's data model: requests, captures, pagination strategies, and
//! the final Source artifact.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// HTTP method of a [`Request`] template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
}

/// Classification of a [`CapturedResponse`]: fired by script (`Ajax`) or the
/// initial server-rendered document (`Ssr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseKind {
    Ajax,
    Ssr,
}

/// A structured POST body. Kept as a JSON object rather than raw bytes so
/// that a pagination strategy can mutate one named field in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    Json(serde_json::Map<String, serde_json::Value>),
    Raw(Vec<u8>),
}

/// An HTTP request template. Method, URL, and parameter maps are
/// independently addressable so a pagination strategy can mutate one named
/// parameter without reserializing the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    /// Absolute URL including path, without query string.
    pub base_url: String,
    pub headers: BTreeMap<String, String>,
    /// Named query parameters, string-valued.
    pub query: BTreeMap<String, String>,
    pub body: Option<Body>,
    pub kind: ResponseKind,
}

impl Request {
    /// Headers considered hop-by-hop or protocol-level noise, stripped by
    /// Response Capture before a request is handed to the Strategy Builder.
    pub const HOP_BY_HOP: &'static [&'static str] = &[
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "te",
        "trailer",
        "transfer-encoding",
        "upgrade",
    ];

    pub fn is_hop_by_hop_or_pseudo(name: &str) -> bool {
        name.starts_with(':') || Self::HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
    }

    /// Render the full URL with the current query map serialized.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.base_url.clone();
        }
        let qs: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
            .collect();
        format!("{}?{}", self.base_url, qs.join("&"))
    }

    /// Returns true iff `name` is addressable in this request's query map
    /// or, for a JSON body, as a top-level field.
    pub fn has_named_parameter(&self, name: &str) -> bool {
        if self.query.contains_key(name) {
            return true;
        }
        matches!(&self.body, Some(Body::Json(map)) if map.contains_key(name))
    }

    /// Set a named parameter's value in place, preferring the query map and
    /// falling back to a JSON body field if present there instead.
    pub fn set_named_parameter(&mut self, name: &str, value: String) {
        if self.query.contains_key(name) {
            self.query.insert(name.to_string(), value);
            return;
        }
        if let Some(Body::Json(map)) = &mut self.body {
            if map.contains_key(name) {
                map.insert(name.to_string(), serde_json::Value::String(value));
                return;
            }
        }
        self.query.insert(name.to_string(), value);
    }
}

fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

/// A content transform applied to a raw body before extraction. Currently
/// limited to HTML-subtree extraction by CSS selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Preprocessor {
    HtmlContainer { selector: String },
}

impl Preprocessor {
    /// Apply the preprocessor. Idempotent: applying it twice with the same
    /// selector to its own output is a no-op, since the output no longer
    /// contains a distinct matching descendant beyond itself in the common
    /// case — callers relying on strict idempotence should re-select against
    /// the original body rather than chain applications.
    pub fn apply(&self, body: &str) -> String {
        match self {
            Preprocessor::HtmlContainer { selector } => {
                let document = scraper_lite::parse(body);
                scraper_lite::first_outer_html(&document, selector).unwrap_or_else(|| body.to_string())
            }
        }
    }
}

/// Minimal HTML container lookup, isolated behind a tiny module so that
/// swapping the backing HTML parser never touches call sites.
mod scraper_lite {
    pub struct Doc(scraper::Html);

    pub fn parse(body: &str) -> Doc {
        Doc(scraper::Html::parse_document(body))
    }

    pub fn first_outer_html(doc: &Doc, selector: &str) -> Option<String> {
        let sel = scraper::Selector::parse(selector).ok()?;
        doc.0.select(&sel).next().map(|el| el.html())
    }
}

/// A short string emitted by the vision LLM, asserted to appear verbatim
/// (modulo whitespace/punctuation) on the current viewport.
pub type TextSection = String;

/// Role played by a numeric pagination parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumberRole {
    Page,
    Limit,
    Offset,
}

/// A tagged pagination parameter: either a numeric role or a cursor with its
/// trained successor-extraction patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PaginationParameter {
    Number {
        name: String,
        default: i64,
        role: NumberRole,
    },
    Cursor {
        name: String,
        observed_value: String,
        /// Tried in order; the caller retries successive patterns until one
        /// yields a non-empty capture.
        patterns: Vec<String>,
    },
}

impl PaginationParameter {
    pub fn name(&self) -> &str {
        match self {
            PaginationParameter::Number { name, .. } => name,
            PaginationParameter::Cursor { name, .. } => name,
        }
    }
}

/// A discriminated pagination strategy, one of the four shapes the Strategy
/// Builder can assemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PaginationStrategy {
    PageBased {
        page: PaginationParameter,
        limit: PaginationParameter,
    },
    PageOffset {
        page: PaginationParameter,
        offset: PaginationParameter,
        base_offset: i64,
    },
    LimitOffset {
        limit: PaginationParameter,
        offset: PaginationParameter,
    },
    CursorBased {
        cursor: PaginationParameter,
        limit: Option<PaginationParameter>,
    },
}

impl PaginationStrategy {
    /// Every parameter named by this strategy, for the "named in the
    /// originating Request" invariant check.
    pub fn parameter_names(&self) -> Vec<&str> {
        match self {
            PaginationStrategy::PageBased { page, limit } => vec![page.name(), limit.name()],
            PaginationStrategy::PageOffset { page, offset, .. } => {
                vec![page.name(), offset.name()]
            }
            PaginationStrategy::LimitOffset { limit, offset } => {
                vec![limit.name(), offset.name()]
            }
            PaginationStrategy::CursorBased { cursor, limit } => {
                let mut names = vec![cursor.name()];
                if let Some(l) = limit {
                    names.push(l.name());
                }
                names
            }
        }
    }

    /// Validate the "every named parameter appears in the Request" and
    /// "limit defaults are positive" invariants from the data model.
    pub fn validate_against(&self, request: &Request) -> crate::error::Result<()> {
        for name in self.parameter_names() {
            if !request.has_named_parameter(name) {
                return Err(crate::error::Error::MissingParameter(name.to_string()));
            }
        }
        let limit_default = match self {
            PaginationStrategy::PageBased { limit, .. } => Some(limit),
            PaginationStrategy::LimitOffset { limit, .. } => Some(limit),
            PaginationStrategy::CursorBased { limit, .. } => limit.as_ref(),
            PaginationStrategy::PageOffset { .. } => None,
        };
        if let Some(PaginationParameter::Number { default, .. }) = limit_default {
            if *default <= 0 {
                return Err(crate::error::Error::InvalidStrategy(
                    "limit default must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}

/// A minimal JSON-Schema-subset description of the caller's desired output
/// shape: named top-level properties with primitive/array/object types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSchema {
    pub properties: BTreeMap<String, SchemaType>,
    #[serde(default)]
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl OutputSchema {
    /// Type-check one record: missing optional fields are allowed, unknown
    /// fields are ignored (stripped by the caller, not rejected here).
    pub fn record_matches(&self, record: &serde_json::Map<String, serde_json::Value>) -> bool {
        for name in &self.required {
            if !record.contains_key(name) {
                return false;
            }
        }
        for (name, expected) in &self.properties {
            let Some(value) = record.get(name) else {
                continue;
            };
            if !type_matches(expected, value) {
                return false;
            }
        }
        true
    }
}

fn type_matches(expected: &SchemaType, value: &serde_json::Value) -> bool {
    match expected {
        SchemaType::String => value.is_string(),
        SchemaType::Number => value.is_number(),
        SchemaType::Boolean => value.is_boolean(),
        SchemaType::Array => value.is_array(),
        SchemaType::Object => value.is_object(),
    }
}

/// The pairing of a Request with its decoded body, arrival ordinal, and an
/// optional late-attached preprocessor. Lives only for one `analyze()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub request: Request,
    pub body: String,
    pub ordinal: u64,
    pub preprocessor: Option<Preprocessor>,
}

impl CapturedResponse {
    /// The body as it will be handed to extraction: preprocessed if a
    /// preprocessor has been attached, raw otherwise.
    pub fn effective_body(&self) -> String {
        match &self.preprocessor {
            Some(p) => p.apply(&self.body),
            None => self.body.clone(),
        }
    }
}

/// The final artifact: immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub request: Request,
    pub strategy: PaginationStrategy,
    pub preprocessor: Option<Preprocessor>,
    /// Serialized extraction routine: a schema-based instruction tree
    /// rather than free code; see `strot_analyzer::strategy::ExtractionProgram`.
    pub extraction_source: String,
    pub default_limit: u32,
}

impl Source {
    /// Substitute this Source's pagination strategy and any caller-supplied
    /// `dynamic_params` into a fresh clone of the template request, ready to
    /// fetch one page. `limit`/`offset` address records directly (e.g.
    /// `limit=5, offset=5` asks for the sixth through tenth record);
    /// `dynamic_params` carries values outside the strategy's own control
    /// (session tokens, a cursor value for a cursor-based strategy) keyed by
    /// request parameter name.
    pub fn build_request_for_page(
        &self,
        limit: u32,
        offset: u32,
        dynamic_params: &BTreeMap<String, String>,
    ) -> Request {
        let limit = limit.max(1);
        let mut request = self.request.clone();

        match &self.strategy {
            PaginationStrategy::LimitOffset {
                limit: limit_param,
                offset: offset_param,
            } => {
                request.set_named_parameter(limit_param.name(), limit.to_string());
                request.set_named_parameter(offset_param.name(), offset.to_string());
            }
            PaginationStrategy::PageBased {
                page,
                limit: limit_param,
            } => {
                let page_number = page_number_for(page, offset, limit);
                request.set_named_parameter(page.name(), page_number.to_string());
                request.set_named_parameter(limit_param.name(), limit.to_string());
            }
            PaginationStrategy::PageOffset {
                page,
                offset: offset_param,
                base_offset,
            } => {
                let page_number = page_number_for(page, offset, limit);
                let offset_within_page = base_offset + (offset % limit) as i64;
                request.set_named_parameter(page.name(), page_number.to_string());
                request.set_named_parameter(offset_param.name(), offset_within_page.to_string());
            }
            PaginationStrategy::CursorBased {
                cursor,
                limit: limit_param,
            } => {
                let cursor_value = dynamic_params.get(cursor.name()).cloned().unwrap_or_else(|| {
                    match cursor {
                        PaginationParameter::Cursor { observed_value, .. } => observed_value.clone(),
                        PaginationParameter::Number { .. } => String::new(),
                    }
                });
                request.set_named_parameter(cursor.name(), cursor_value);
                if let Some(limit_param) = limit_param {
                    request.set_named_parameter(limit_param.name(), limit.to_string());
                }
            }
        }

        let strategy_names = self.strategy.parameter_names();
        for (name, value) in dynamic_params {
            if strategy_names.contains(&name.as_str()) {
                continue;
            }
            if request.has_named_parameter(name) {
                request.set_named_parameter(name, value.clone());
            }
        }

        request
    }
}

/// `1`-origin page numbers unless the parameter's trained default says
/// otherwise: `base + offset / limit`.
fn page_number_for(page: &PaginationParameter, offset: u32, limit: u32) -> i64 {
    let base = match page {
        PaginationParameter::Number { default, .. } => *default,
        PaginationParameter::Cursor { .. } => 1,
    };
    base + (offset / limit) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit_offset_source() -> Source {
        let mut query = BTreeMap::new();
        query.insert("limit".to_string(), "20".to_string());
        query.insert("offset".to_string(), "0".to_string());
        Source {
            request: Request {
                method: Method::Get,
                base_url: "https://example.com/api/products".to_string(),
                headers: BTreeMap::new(),
                query,
                body: None,
                kind: ResponseKind::Ajax,
            },
            strategy: PaginationStrategy::LimitOffset {
                limit: PaginationParameter::Number {
                    name: "limit".to_string(),
                    default: 20,
                    role: NumberRole::Limit,
                },
                offset: PaginationParameter::Number {
                    name: "offset".to_string(),
                    default: 0,
                    role: NumberRole::Offset,
                },
            },
            preprocessor: None,
            extraction_source: String::new(),
            default_limit: 20,
        }
    }

    #[test]
    fn build_request_for_page_substitutes_limit_and_offset() {
        let source = limit_offset_source();
        let request = source.build_request_for_page(5, 5, &BTreeMap::new());
        assert_eq!(request.query.get("limit").map(String::as_str), Some("5"));
        assert_eq!(request.query.get("offset").map(String::as_str), Some("5"));
        assert!(request.full_url().contains("limit=5"));
        assert!(request.full_url().contains("offset=5"));
    }

    #[test]
    fn build_request_for_page_leaves_template_request_untouched() {
        let source = limit_offset_source();
        source.build_request_for_page(5, 5, &BTreeMap::new());
        assert_eq!(source.request.query.get("limit").map(String::as_str), Some("20"));
        assert_eq!(source.request.query.get("offset").map(String::as_str), Some("0"));
    }

    #[test]
    fn page_based_offset_maps_to_page_number() {
        let mut query = BTreeMap::new();
        query.insert("page".to_string(), "1".to_string());
        query.insert("per_page".to_string(), "10".to_string());
        let source = Source {
            request: Request {
                method: Method::Get,
                base_url: "https://example.com/api/items".to_string(),
                headers: BTreeMap::new(),
                query,
                body: None,
                kind: ResponseKind::Ajax,
            },
            strategy: PaginationStrategy::PageBased {
                page: PaginationParameter::Number {
                    name: "page".to_string(),
                    default: 1,
                    role: NumberRole::Page,
                },
                limit: PaginationParameter::Number {
                    name: "per_page".to_string(),
                    default: 10,
                    role: NumberRole::Limit,
                },
            },
            preprocessor: None,
            extraction_source: String::new(),
            default_limit: 10,
        };

        let request = source.build_request_for_page(10, 20, &BTreeMap::new());
        assert_eq!(request.query.get("page").map(String::as_str), Some("3"));
        assert_eq!(request.query.get("per_page").map(String::as_str), Some("10"));
    }

    #[test]
    fn cursor_based_uses_dynamic_cursor_then_falls_back_to_observed() {
        let mut query = BTreeMap::new();
        query.insert("cursor".to_string(), "seed".to_string());
        let source = Source {
            request: Request {
                method: Method::Get,
                base_url: "https://example.com/api/reviews".to_string(),
                headers: BTreeMap::new(),
                query,
                body: None,
                kind: ResponseKind::Ajax,
            },
            strategy: PaginationStrategy::CursorBased {
                cursor: PaginationParameter::Cursor {
                    name: "cursor".to_string(),
                    observed_value: "seed".to_string(),
                    patterns: vec![],
                },
                limit: None,
            },
            preprocessor: None,
            extraction_source: String::new(),
            default_limit: 5,
        };

        let first = source.build_request_for_page(5, 0, &BTreeMap::new());
        assert_eq!(first.query.get("cursor").map(String::as_str), Some("seed"));

        let mut dynamic = BTreeMap::new();
        dynamic.insert("cursor".to_string(), "next-page-token".to_string());
        let second = source.build_request_for_page(5, 0, &dynamic);
        assert_eq!(second.query.get("cursor").map(String::as_str), Some("next-page-token"));
    }
}
