//! HTTP-backed LLM providers.
//!
//! Thin reqwest clients for the Anthropic messages API and the OpenAI
//! chat-completions API. Timeouts are set on the underlying client so a
//! hung provider can never stall a turn past the configured bound.

use secrecy::ExposeSecret;
use serde_json::json;

use crate::error::LlmError;
use crate::llm::{CompletionRequest, CompletionResponse, LlmConfig, LlmProvider, Role};

const ANTHROPIC_BASE: &str = "https://api.anthropic.com";
const OPENAI_BASE: &str = "https://api.openai.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

fn build_client(config: &LlmConfig, provider: &str) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: format!("failed to build HTTP client: {e}"),
        })
}

fn map_send_error(provider: &str, timeout_secs: u64, e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout {
            provider: provider.to_string(),
            seconds: timeout_secs,
        }
    } else {
        LlmError::RequestFailed {
            provider: provider.to_string(),
            reason: e.to_string(),
        }
    }
}

/// Anthropic messages-API provider.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: secrecy::SecretString,
    model: String,
    base_url: String,
    timeout_secs: u64,
}

impl AnthropicProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client(config, "anthropic")?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_BASE.to_string()),
            timeout_secs: config.timeout.as_secs(),
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        // The messages API takes the system prompt as a top-level field.
        let system: String = request
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::Assistant => "assistant",
                        _ => "user",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error("anthropic", self.timeout_secs, e))?;

        let status = response.status();
        let payload: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse {
                    provider: "anthropic".to_string(),
                    reason: e.to_string(),
                })?;

        if !status.is_success() {
            return Err(LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: format!("HTTP {status}: {payload}"),
            });
        }

        let content = payload["content"][0]["text"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: "anthropic".to_string(),
                reason: "missing content[0].text".to_string(),
            })?
            .to_string();

        Ok(CompletionResponse { content })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// OpenAI chat-completions provider.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: secrecy::SecretString,
    model: String,
    base_url: String,
    timeout_secs: u64,
}

impl OpenAiProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client(config, "openai")?,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE.to_string()),
            timeout_secs: config.timeout.as_secs(),
        })
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::System => "system",
                        Role::User => "user",
                        Role::Assistant => "assistant",
                    },
                    "content": m.content,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error("openai", self.timeout_secs, e))?;

        let status = response.status();
        let payload: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse {
                    provider: "openai".to_string(),
                    reason: e.to_string(),
                })?;

        if !status.is_success() {
            return Err(LlmError::RequestFailed {
                provider: "openai".to_string(),
                reason: format!("HTTP {status}: {payload}"),
            });
        }

        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: "openai".to_string(),
                reason: "missing choices[0].message.content".to_string(),
            })?
            .to_string();

        Ok(CompletionResponse { content })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
