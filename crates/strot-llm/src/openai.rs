//! An OpenAI-compatible concrete [`LlmClient`], grounded on the pack's
//! `openai-client` crate: a minimal `reqwest`-based client that sends chat
//! completion requests with `response_format: json_schema` and parses the
//! single returned message's content as JSON.

use crate::client::{LlmClient, RawCompletion, Usage};
use crate::error::{Error, Result};
use crate::types::VisionPrompt;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: model.into(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY not set".into()))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn send(&self, request: ChatRequest) -> Result<RawCompletion> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    Error::Network(e.to_string())
                } else {
                    Error::Api(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited);
        }
        if status == reqwest::StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Refused(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let raw: ChatResponseRaw = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Parse("no choices in response".into()))?;

        Ok(RawCompletion {
            text: content,
            usage: raw
                .usage
                .map(|u| Usage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                })
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete_vision(
        &self,
        prompt: &VisionPrompt,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<RawCompletion> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&prompt.screenshot_png);
        let image_url = format!("data:image/png;base64,{encoded}");

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message::Text {
                    role: "system",
                    content: "You are a precise visual page analyst.".to_string(),
                },
                Message::Multimodal {
                    role: "user",
                    content: vec![
                        ContentPart::Text {
                            text: prompt.query.clone(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl { url: image_url },
                        },
                    ],
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat::json_schema(schema_name, schema),
        };
        self.send(request).await
    }

    async fn complete_text(
        &self,
        prompt: &str,
        schema_name: &str,
        schema: serde_json::Value,
    ) -> Result<RawCompletion> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::Text {
                role: "user",
                content: prompt.to_string(),
            }],
            temperature: 0.0,
            response_format: ResponseFormat::json_schema(schema_name, schema),
        };
        self.send(request).await
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Message {
    Text { role: &'static str, content: String },
    Multimodal {
        role: &'static str,
        content: Vec<ContentPart>,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    json_schema: JsonSchemaFormat,
}

impl ResponseFormat {
    fn json_schema(name: &str, schema: serde_json::Value) -> Self {
        Self {
            format_type: "json_schema".to_string(),
            json_schema: JsonSchemaFormat {
                name: name.to_string(),
                strict: true,
                schema,
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: String,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponseRaw {
    choices: Vec<ChatChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
