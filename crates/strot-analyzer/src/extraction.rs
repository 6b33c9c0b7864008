//! Interpreter for [`strot_llm::types::ExtractionProgram`] — the
//! schema-based instruction tree standing in for sandboxed free-code
//! execution. JSON record lookup follows the
//! dot-path walk in the pack's `json_paginated` scraper; HTML record
//! lookup uses `scraper`'s CSS selection, the same crate
//! `fourthplaces-mntogether` and the crime-map scraper both reach for.

use scraper::{Html, Selector};
use strot_core::model::OutputSchema;
use strot_llm::types::{ExtractionField, ExtractionProgram};

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("records path '{0}' did not resolve to an array")]
    NotAnArray(String),
    #[error("invalid json body: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("invalid css selector: {0}")]
    InvalidSelector(String),
    #[error("extraction produced no records")]
    Empty,
    #[error("record {0} does not match the output schema")]
    SchemaMismatch(usize),
}

fn resolve_json_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    if path.is_empty() || path == "." {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn run_json(program: &ExtractionProgram, body: &str) -> Result<Vec<serde_json::Value>, ExtractionError> {
    let root: serde_json::Value = serde_json::from_str(body)?;
    let array = resolve_json_path(&root, &program.records_path)
        .and_then(|v| v.as_array())
        .ok_or_else(|| ExtractionError::NotAnArray(program.records_path.clone()))?;

    let mut records = Vec::with_capacity(array.len());
    for item in array {
        let mut record = serde_json::Map::new();
        for field in &program.fields {
            if let Some(value) = resolve_json_path(item, &field.source) {
                record.insert(field.name.clone(), value.clone());
            }
        }
        records.push(serde_json::Value::Object(record));
    }
    Ok(records)
}

fn run_html(program: &ExtractionProgram, body: &str) -> Result<Vec<serde_json::Value>, ExtractionError> {
    let document = Html::parse_document(body);
    let records_selector = Selector::parse(&program.records_path)
        .map_err(|e| ExtractionError::InvalidSelector(format!("{e:?}")))?;

    let field_selectors: Vec<(&ExtractionField, Option<Selector>)> = program
        .fields
        .iter()
        .map(|f| {
            let sel = if f.source.is_empty() {
                None
            } else {
                Selector::parse(&f.source).ok()
            };
            (f, sel)
        })
        .collect();

    let mut records = Vec::new();
    for element in document.select(&records_selector) {
        let mut record = serde_json::Map::new();
        for (field, selector) in &field_selectors {
            let scope = match selector {
                Some(sel) => element.select(sel).next(),
                None => Some(element),
            };
            let Some(node) = scope else { continue };
            let value = match &field.attribute {
                Some(attr) => node.value().attr(attr).map(str::to_string),
                None => Some(node.text().collect::<Vec<_>>().join(" ").trim().to_string()),
            };
            if let Some(v) = value {
                record.insert(field.name.clone(), serde_json::Value::String(v));
            }
        }
        records.push(serde_json::Value::Object(record));
    }
    Ok(records)
}

/// Execute the program against a preprocessed body, then validate the
/// result against the output schema: non-empty, every record type-checks
/// (missing optional fields allowed, unknown fields ignored).
pub fn run(
    program: &ExtractionProgram,
    body: &str,
    schema: &OutputSchema,
) -> Result<Vec<serde_json::Map<String, serde_json::Value>>, ExtractionError> {
    let raw = if program.is_html {
        run_html(program, body)?
    } else {
        run_json(program, body)?
    };

    if raw.is_empty() {
        return Err(ExtractionError::Empty);
    }

    let mut records = Vec::with_capacity(raw.len());
    for (idx, value) in raw.into_iter().enumerate() {
        let serde_json::Value::Object(map) = value else {
            return Err(ExtractionError::SchemaMismatch(idx));
        };
        if !schema.record_matches(&map) {
            return Err(ExtractionError::SchemaMismatch(idx));
        }
        records.push(map);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use strot_core::model::SchemaType;

    fn schema() -> OutputSchema {
        let mut properties = BTreeMap::new();
        properties.insert("name".to_string(), SchemaType::String);
        properties.insert("price".to_string(), SchemaType::Number);
        OutputSchema {
            properties,
            required: vec!["name".to_string()],
        }
    }

    #[test]
    fn runs_json_records_with_dot_path_fields() {
        let program = ExtractionProgram {
            records_path: "products".to_string(),
            is_html: false,
            fields: vec![
                ExtractionField {
                    name: "name".into(),
                    source: "title".into(),
                    attribute: None,
                },
                ExtractionField {
                    name: "price".into(),
                    source: "price".into(),
                    attribute: None,
                },
            ],
        };
        let body = r#"{"products":[{"title":"Widget","price":9.99},{"title":"Gadget","price":14.5}]}"#;
        let records = run(&program, body, &schema()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], serde_json::json!("Widget"));
    }

    #[test]
    fn rejects_empty_result() {
        let program = ExtractionProgram {
            records_path: "products".to_string(),
            is_html: false,
            fields: vec![],
        };
        let body = r#"{"products":[]}"#;
        let err = run(&program, body, &schema()).unwrap_err();
        assert!(matches!(err, ExtractionError::Empty));
    }

    fn schema_html() -> OutputSchema {
        let mut properties = BTreeMap::new();
        properties.insert("name".to_string(), SchemaType::String);
        properties.insert("price".to_string(), SchemaType::String);
        OutputSchema {
            properties,
            required: vec!["name".to_string()],
        }
    }

    #[test]
    fn runs_html_records_with_selectors_and_attributes() {
        let program = ExtractionProgram {
            records_path: "div.card".to_string(),
            is_html: true,
            fields: vec![
                ExtractionField {
                    name: "name".into(),
                    source: "h2".into(),
                    attribute: None,
                },
                ExtractionField {
                    name: "price".into(),
                    source: "span.price".into(),
                    attribute: Some("data-value".into()),
                },
            ],
        };
        let body = r#"
            <div class="card"><h2>Widget</h2><span class="price" data-value="9.99">$9.99</span></div>
            <div class="card"><h2>Gadget</h2><span class="price" data-value="14.5">$14.50</span></div>
        "#;
        let records = run(&program, body, &schema_html()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], serde_json::json!("Widget"));
        assert_eq!(records[0]["price"], serde_json::json!("9.99"));
    }

    #[test]
    fn schema_mismatch_is_reported_with_index() {
        let program = ExtractionProgram {
            records_path: "products".to_string(),
            is_html: false,
            fields: vec![ExtractionField {
                name: "price".into(),
                source: "price".into(),
                attribute: None,
            }],
        };
        // missing required "name" field
        let body = r#"{"products":[{"price":9.99}]}"#;
        let err = run(&program, body, &schema()).unwrap_err();
        assert!(matches!(err, ExtractionError::SchemaMismatch(0)));
    }
}
