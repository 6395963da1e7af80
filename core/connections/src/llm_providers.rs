//! Chat-completion adapters for connection analysis.
//! Each provider returns the model's answer already parsed as JSON.

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thoughtmap_schemas::{Message, MessageRole};
use tracing::debug;

use crate::config::{LLMConfig, LLMProviderKind};
use crate::error::ModelError;

/// Model collaborator used by the discovery engine
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete_json(&self, messages: &[Message]) -> Result<Value, ModelError>;
}

/// Build the configured provider
pub fn provider_from_config(config: &LLMConfig) -> anyhow::Result<Arc<dyn ChatModel>> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    let provider: Arc<dyn ChatModel> = match config.provider {
        LLMProviderKind::Gemini => Arc::new(GeminiProvider::with_client(client, config.clone())),
        LLMProviderKind::OpenAI => Arc::new(OpenAIProvider::with_client(client, config.clone())),
    };

    Ok(provider)
}

/// Parse the text a model produced into JSON, tolerating a markdown code fence.
pub fn parse_json_payload(text: &str) -> Result<Value, ModelError> {
    let trimmed = text.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    serde_json::from_str(unfenced)
        .map_err(|e| ModelError::InvalidResponse(format!("model did not return JSON: {}", e)))
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ModelError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ModelError::Status { status, body })
}

// ============================================================================
// Gemini
// ============================================================================

pub struct GeminiProvider {
    client: Client,
    config: LLMConfig,
}

impl GeminiProvider {
    pub fn new(config: LLMConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: LLMConfig) -> Self {
        Self { client, config }
    }

    /// System messages become the system instruction; the rest become contents.
    fn request_body(messages: &[Message]) -> Value {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .map(|m| m.content.as_str())
            .collect();

        let contents: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| {
                let role = match m.role {
                    MessageRole::Assistant => "model",
                    _ => "user",
                };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": 0.7,
                "responseMimeType": "application/json"
            }
        });

        if !system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": system.join("\n\n") }] });
        }

        body
    }

    fn extract_text(response: &GeminiResponse) -> Result<String, ModelError> {
        let text: String = response
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ModelError::InvalidResponse("Empty response from Gemini".into()));
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[async_trait]
impl ChatModel for GeminiProvider {
    async fn complete_json(&self, messages: &[Message]) -> Result<Value, ModelError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ModelError::MissingCredentials(self.config.api_key_var().into()))?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        debug!("Calling Gemini at {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&Self::request_body(messages))
            .send()
            .await?;

        let response: GeminiResponse = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("Failed to parse Gemini response: {}", e)))?;

        parse_json_payload(&Self::extract_text(&response)?)
    }
}

// ============================================================================
// OpenAI
// ============================================================================

pub struct OpenAIProvider {
    client: Client,
    config: LLMConfig,
}

impl OpenAIProvider {
    pub fn new(config: LLMConfig) -> Self {
        Self::with_client(Client::new(), config)
    }

    pub fn with_client(client: Client, config: LLMConfig) -> Self {
        Self { client, config }
    }

    fn request_body(&self, messages: &[Message]) -> Value {
        let messages: Vec<Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": 0.7,
            "max_tokens": 1024,
            "response_format": { "type": "json_object" }
        })
    }
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatModel for OpenAIProvider {
    async fn complete_json(&self, messages: &[Message]) -> Result<Value, ModelError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ModelError::MissingCredentials(self.config.api_key_var().into()))?;

        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        debug!("Calling OpenAI at {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&self.request_body(messages))
            .send()
            .await?;

        let response: OpenAIResponse = error_for_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(format!("Failed to parse OpenAI response: {}", e)))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| ModelError::InvalidResponse("Empty response from OpenAI".into()))?;

        parse_json_payload(&content)
    }
}
