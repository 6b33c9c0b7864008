//! Type-safe schema generation for structured LLM outputs, grounded on the
//! same pattern the pack's `openai-client` uses: derive a JSON Schema from
//! the Rust type itself via `schemars`, rather than hand-writing one.

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// An OpenAI-strict-mode-compatible JSON schema: every object node gets
    /// `additionalProperties: false`.
    fn structured_schema() -> serde_json::Value {
        let schema = schema_for!(Self);
        let mut value = serde_json::to_value(schema).unwrap_or_default();
        deny_additional_properties(&mut value);
        value
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

fn deny_additional_properties(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            if map.get("type") == Some(&serde_json::Value::String("object".to_string())) {
                map.insert("additionalProperties".to_string(), serde_json::Value::Bool(false));
            }
            for v in map.values_mut() {
                deny_additional_properties(v);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                deny_additional_properties(item);
            }
        }
        _ => {}
    }
}
