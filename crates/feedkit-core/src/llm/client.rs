//! # LLM API Client
//!
//! Sends batch analysis requests to Claude or OpenAI and returns the raw
//! response text. The pipeline only ever talks to the [`CompletionClient`]
//! trait, so tests swap in a scripted client and never touch the network.
//!
//! One `reqwest::Client` is built per `HttpCompletionClient` and shared by
//! every worker; its connection pool is the only state the workers share
//! besides the rate limiter.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{truncate, CompletionError, FeedkitError, Result};

/// A single completion call: prompts, response schema and per-call limits.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub user_prompt: String,
    /// JSON Schema the response must follow.
    pub schema: serde_json::Value,
    pub timeout: Duration,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

/// The one operation the pipeline needs from a model provider.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run one completion and return the raw response text.
    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, CompletionError>;

    /// Model name, recorded in run metadata.
    fn model(&self) -> &str;
}

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(alias = "claude")]
    Anthropic,
    OpenAI,
}

impl Provider {
    fn default_model(self) -> &'static str {
        match self {
            Provider::Anthropic => "claude-sonnet-4-20250514",
            Provider::OpenAI => "gpt-4o-mini",
        }
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Provider::Anthropic => "https://api.anthropic.com",
            Provider::OpenAI => "https://api.openai.com",
        }
    }

    fn key_var(self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        }
    }
}

/// HTTP client for the Anthropic Messages API or OpenAI Chat Completions API.
#[derive(Debug, Clone)]
pub struct HttpCompletionClient {
    provider: Provider,
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(provider: Provider, api_key: impl Into<String>, model: Option<&str>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            model: model.unwrap_or(provider.default_model()).to_string(),
            base_url: provider.default_base_url().to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Auto-detect the provider from environment variables.
    ///
    /// With `preferred` set only that provider's key is considered. Otherwise
    /// `OPENAI_API_KEY` is checked first, then `ANTHROPIC_API_KEY`.
    pub fn from_env(preferred: Option<Provider>, model_override: Option<&str>) -> Result<Self> {
        let candidates: &[Provider] = match preferred {
            Some(Provider::OpenAI) => &[Provider::OpenAI],
            Some(Provider::Anthropic) => &[Provider::Anthropic],
            None => &[Provider::OpenAI, Provider::Anthropic],
        };

        for &provider in candidates {
            if let Ok(key) = std::env::var(provider.key_var()) {
                if !key.trim().is_empty() {
                    return Ok(Self::new(provider, key, model_override));
                }
            }
        }

        Err(FeedkitError::NoApiKey)
    }

    /// Point the client at a compatible endpoint (proxy, gateway, local server).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    async fn call_anthropic(&self, request: &CompletionRequest) -> std::result::Result<String, CompletionError> {
        // Schema goes in the system prompt; the `{` pre-fill keeps Claude from
        // opening with prose or a markdown fence.
        let system = format!(
            "{}\n\nResponde con un objeto JSON que cumpla este JSON Schema:\n{}",
            request.system_prompt, request.schema
        );
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_output_tokens,
            "temperature": request.temperature,
            "system": system,
            "messages": [
                { "role": "user", "content": request.user_prompt },
                { "role": "assistant", "content": "{" }
            ]
        });

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let parsed = read_json_body(response).await?;
        let text = parsed["content"]
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|block| block["text"].as_str())
            .ok_or_else(|| CompletionError::Server {
                status: 200,
                body: "Claude API response missing content[0].text".to_string(),
            })?;

        // The pre-fill is not echoed back.
        Ok(format!("{{{}", text))
    }

    async fn call_openai(&self, request: &CompletionRequest) -> std::result::Result<String, CompletionError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": request.temperature,
            "max_tokens": request.max_output_tokens,
            "messages": [
                { "role": "system", "content": request.system_prompt },
                { "role": "user", "content": request.user_prompt }
            ],
            "response_format": {
                "type": "json_schema",
                "json_schema": {
                    "name": "feedback_analysis",
                    "strict": true,
                    "schema": request.schema
                }
            }
        });

        let response = self
            .http
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let parsed = read_json_body(response).await?;
        let text = parsed["choices"]
            .as_array()
            .and_then(|arr| arr.first())
            .and_then(|choice| choice["message"]["content"].as_str())
            .ok_or_else(|| CompletionError::Server {
                status: 200,
                body: "OpenAI API response missing choices[0].message.content".to_string(),
            })?;

        Ok(text.to_string())
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, CompletionError> {
        match self.provider {
            Provider::Anthropic => self.call_anthropic(request).await,
            Provider::OpenAI => self.call_openai(request).await,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Map a `reqwest` failure that happened before a status line arrived.
fn classify_transport_error(err: reqwest::Error) -> CompletionError {
    if err.is_timeout() {
        CompletionError::Timeout
    } else if err.is_connect() || err.is_request() {
        CompletionError::Connection {
            message: err.to_string(),
        }
    } else if err.is_builder() {
        CompletionError::BadRequest {
            message: err.to_string(),
        }
    } else {
        CompletionError::Connection {
            message: err.to_string(),
        }
    }
}

async fn read_json_body(response: reqwest::Response) -> std::result::Result<serde_json::Value, CompletionError> {
    let status = response.status();
    let text = response.text().await.map_err(classify_transport_error)?;

    if !status.is_success() {
        return Err(CompletionError::from_status(status.as_u16(), &text));
    }

    serde_json::from_str(&text).map_err(|e| CompletionError::Server {
        status: status.as_u16(),
        body: format!("unparseable provider envelope: {}: {}", e, truncate(&text, 200)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests touch process state; keep them in one test so they
    // cannot race each other.
    #[test]
    fn test_from_env_detection() {
        let anthropic = std::env::var("ANTHROPIC_API_KEY").ok();
        let openai = std::env::var("OPENAI_API_KEY").ok();

        std::env::remove_var("ANTHROPIC_API_KEY");
        std::env::remove_var("OPENAI_API_KEY");
        assert!(matches!(
            HttpCompletionClient::from_env(None, None),
            Err(FeedkitError::NoApiKey)
        ));

        std::env::set_var("ANTHROPIC_API_KEY", "test-key-123");
        let client = HttpCompletionClient::from_env(None, None).unwrap();
        assert_eq!(client.provider(), Provider::Anthropic);
        assert!(client.model().contains("claude"));

        std::env::set_var("OPENAI_API_KEY", "sk-test");
        let client = HttpCompletionClient::from_env(None, Some("gpt-4o")).unwrap();
        assert_eq!(client.provider(), Provider::OpenAI);
        assert_eq!(client.model(), "gpt-4o");

        let client = HttpCompletionClient::from_env(Some(Provider::Anthropic), None).unwrap();
        assert_eq!(client.provider(), Provider::Anthropic);

        match anthropic {
            Some(k) => std::env::set_var("ANTHROPIC_API_KEY", k),
            None => std::env::remove_var("ANTHROPIC_API_KEY"),
        }
        match openai {
            Some(k) => std::env::set_var("OPENAI_API_KEY", k),
            None => std::env::remove_var("OPENAI_API_KEY"),
        }
    }

    #[test]
    fn test_base_url_override() {
        let client = HttpCompletionClient::new(Provider::OpenAI, "k", None)
            .with_base_url("http://localhost:8080/");
        assert_eq!(client.base_url, "http://localhost:8080");
        assert_eq!(client.model(), "gpt-4o-mini");
    }

    #[test]
    fn test_provider_serde_names() {
        let p: Provider = serde_json::from_str("\"openai\"").unwrap();
        assert_eq!(p, Provider::OpenAI);
        let p: Provider = serde_json::from_str("\"claude\"").unwrap();
        assert_eq!(p, Provider::Anthropic);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_error() {
        let client = HttpCompletionClient::new(Provider::OpenAI, "k", None)
            .with_base_url("http://127.0.0.1:9");
        let request = CompletionRequest {
            system_prompt: "s".into(),
            user_prompt: "u".into(),
            schema: serde_json::json!({}),
            timeout: Duration::from_secs(2),
            max_output_tokens: 16,
            temperature: 0.0,
        };
        let err = client.complete(&request).await.unwrap_err();
        assert!(err.is_transient(), "{:?}", err);
    }
}
