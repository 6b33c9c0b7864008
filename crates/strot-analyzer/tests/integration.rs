//! End-to-end exercise of the Analyzer Loop and Strategy Builder against
//! in-memory fakes for the browser and LLM capabilities, letting a
//! limit-offset product catalog run deterministically without a real
//! browser or LLM endpoint.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use strot_analyzer::{analyze, AnalyzeResult, AnalyzerConfig};
use strot_browser::plugin::SNAPSHOT_JS;
use strot_browser::session::{BrowserSession, RawNetworkEvent, RawRequestMeta};
use strot_core::model::{OutputSchema, PaginationStrategy, SchemaType};
use strot_llm::client::{LlmClient, RawCompletion, Usage};
use strot_llm::types::{ExtractionProgram, VisionPrompt};

struct FakeBrowser {
    drained: AtomicUsize,
}

#[async_trait]
impl BrowserSession for FakeBrowser {
    async fn navigate(&self, _url: &str) -> strot_browser::Result<()> {
        Ok(())
    }

    async fn screenshot(&self) -> strot_browser::Result<Vec<u8>> {
        Ok(vec![0u8; 4])
    }

    async fn evaluate(&self, script: &str) -> strot_browser::Result<serde_json::Value> {
        if script == SNAPSHOT_JS {
            return Ok(serde_json::json!({
                "elements": [],
                "viewport_height": 800.0,
                "viewport_width": 1280.0,
                "scroll_y": 0.0,
            }));
        }
        Ok(serde_json::Value::Bool(false))
    }

    async fn click(&self, _x: f64, _y: f64) -> strot_browser::Result<()> {
        Ok(())
    }

    async fn drain_events(&self) -> strot_browser::Result<Vec<RawNetworkEvent>> {
        if self.drained.fetch_add(1, Ordering::SeqCst) > 0 {
            return Ok(Vec::new());
        }
        let products: Vec<serde_json::Value> = (1..=20)
            .map(|i| serde_json::json!({ "name": format!("Widget {i}"), "price": 9.99 + i as f64 }))
            .collect();
        let body = serde_json::json!({ "products": products }).to_string();

        Ok(vec![
            RawNetworkEvent {
                request: RawRequestMeta {
                    method: "GET".into(),
                    url: "https://example.com/".into(),
                    headers: vec![],
                    post_body: None,
                    is_document: true,
                },
                body: "<html></html>".into(),
            },
            RawNetworkEvent {
                request: RawRequestMeta {
                    method: "GET".into(),
                    url: "https://example.com/api/products?limit=20&offset=0".into(),
                    headers: vec![],
                    post_body: None,
                    is_document: false,
                },
                body,
            },
        ])
    }

    async fn close(self: Box<Self>) -> strot_browser::Result<()> {
        Ok(())
    }
}

struct FakeLlm;

#[async_trait]
impl LlmClient for FakeLlm {
    async fn complete_vision(
        &self,
        _prompt: &VisionPrompt,
        _schema_name: &str,
        _schema: serde_json::Value,
    ) -> strot_llm::Result<RawCompletion> {
        let text = serde_json::json!({
            "text_sections": ["Widget 1"],
            "action": "none",
            "point": null,
            "direction": "down",
        })
        .to_string();
        Ok(RawCompletion { text, usage: Usage::default() })
    }

    async fn complete_text(
        &self,
        prompt: &str,
        schema_name: &str,
        _schema: serde_json::Value,
    ) -> strot_llm::Result<RawCompletion> {
        let text = match schema_name {
            "pagination_classification" => serde_json::json!({
                "classifications": [
                    { "key": "limit", "role": "limit" },
                    { "key": "offset", "role": "offset" },
                ]
            })
            .to_string(),
            "extraction_synthesis" => serde_json::json!({
                "program": {
                    "records_path": "products",
                    "is_html": false,
                    "fields": [
                        { "name": "name", "source": "name", "attribute": null },
                        { "name": "price", "source": "price", "attribute": null },
                    ]
                }
            })
            .to_string(),
            other => panic!("unexpected schema_name in test: {other} (prompt: {prompt})"),
        };
        Ok(RawCompletion { text, usage: Usage::default() })
    }
}

fn products_schema() -> OutputSchema {
    let mut properties = BTreeMap::new();
    properties.insert("name".to_string(), SchemaType::String);
    properties.insert("price".to_string(), SchemaType::Number);
    OutputSchema {
        properties,
        required: vec!["name".to_string()],
    }
}

#[tokio::test]
async fn limit_offset_products_scenario_produces_expected_source() {
    let browser: Box<dyn BrowserSession> = Box::new(FakeBrowser {
        drained: AtomicUsize::new(0),
    });
    let llm: Arc<dyn LlmClient> = Arc::new(FakeLlm);
    let schema = products_schema();

    let result = analyze(
        "https://example.com/",
        "list every product with its price",
        &schema,
        browser,
        llm,
        AnalyzerConfig::default(),
    )
    .await
    .expect("analyze should not hard-fail");

    let AnalyzeResult::Found(source) = result else {
        panic!("expected a Source to be found");
    };

    assert_eq!(source.default_limit, 20);
    match source.strategy {
        PaginationStrategy::LimitOffset { limit, offset } => {
            assert_eq!(limit.name(), "limit");
            assert_eq!(offset.name(), "offset");
        }
        other => panic!("expected limit-offset strategy, got {other:?}"),
    }
}

#[tokio::test]
async fn limit_offset_source_pages_through_records_by_limit_and_offset() {
    let browser: Box<dyn BrowserSession> = Box::new(FakeBrowser {
        drained: AtomicUsize::new(0),
    });
    let llm: Arc<dyn LlmClient> = Arc::new(FakeLlm);
    let schema = products_schema();

    let result = analyze(
        "https://example.com/",
        "list every product with its price",
        &schema,
        browser,
        llm,
        AnalyzerConfig::default(),
    )
    .await
    .expect("analyze should not hard-fail");

    let AnalyzeResult::Found(source) = result else {
        panic!("expected a Source to be found");
    };

    // The full 20-item catalog this Source was trained against.
    let all_products: Vec<serde_json::Value> = (1..=20)
        .map(|i| serde_json::json!({ "name": format!("Widget {i}"), "price": 9.99 + i as f64 }))
        .collect();

    let request = source.build_request_for_page(5, 5, &BTreeMap::new());
    assert_eq!(request.query.get("limit").map(String::as_str), Some("5"));
    assert_eq!(request.query.get("offset").map(String::as_str), Some("5"));

    // A server honoring that request serves the sixth through tenth record.
    let page: Vec<_> = all_products[5..10].to_vec();
    let body = serde_json::json!({ "products": page }).to_string();

    let program: ExtractionProgram = serde_json::from_str(&source.extraction_source)
        .expect("extraction program should deserialize");
    let records = strot_analyzer::extraction::run(&program, &body, &schema)
        .expect("extraction should succeed on a same-shaped page");

    assert_eq!(records.len(), 5);
    assert_eq!(records[0]["name"], serde_json::json!("Widget 6"));
    assert_eq!(records[4]["name"], serde_json::json!("Widget 10"));
}

#[tokio::test]
async fn max_steps_zero_returns_not_found_without_any_llm_call() {
    struct PanicsOnUse;
    #[async_trait]
    impl LlmClient for PanicsOnUse {
        async fn complete_vision(
            &self,
            _prompt: &VisionPrompt,
            _schema_name: &str,
            _schema: serde_json::Value,
        ) -> strot_llm::Result<RawCompletion> {
            panic!("vision should not be called when max_steps is zero")
        }
        async fn complete_text(
            &self,
            _prompt: &str,
            _schema_name: &str,
            _schema: serde_json::Value,
        ) -> strot_llm::Result<RawCompletion> {
            panic!("text completion should not be called when max_steps is zero")
        }
    }

    let browser: Box<dyn BrowserSession> = Box::new(FakeBrowser {
        drained: AtomicUsize::new(0),
    });
    let llm: Arc<dyn LlmClient> = Arc::new(PanicsOnUse);
    let schema = products_schema();
    let mut config = AnalyzerConfig::default();
    config.max_steps = 0;

    let result = analyze("https://example.com/", "anything", &schema, browser, llm, config)
        .await
        .unwrap();

    assert!(matches!(result, AnalyzeResult::NotFound));
}
