//! OpenAI-compatible chat completions adapter.
//!
//! Works against any endpoint that speaks the `/v1/chat/completions` wire
//! format. Responses are requested at temperature 0 so identical prompts
//! give stable output, which is what makes response caching worthwhile.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Reasoner, ReasoningOutput, ReasoningRequest};
use crate::config::ReasoningSettings;

/// Chat completions client
pub struct OpenAiAdapter {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: u64,
}

impl OpenAiAdapter {
    /// Create a new adapter
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            client,
        })
    }

    /// Create from resolved settings, reading the API key from the environment
    pub fn from_settings(settings: &ReasoningSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env)
            .with_context(|| format!("{} environment variable required", settings.api_key_env))?;
        Self::new(&settings.endpoint, api_key, settings.timeout())
    }
}

#[async_trait]
impl Reasoner for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &ReasoningRequest) -> Result<ReasoningOutput> {
        let body = ChatRequest {
            model: &request.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: 0.0,
            max_tokens: request.max_tokens,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to reach reasoning endpoint")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Reasoning endpoint error ({}): {}", status, text);
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("Chat completion returned no content")?;

        Ok(ReasoningOutput {
            content: content.trim().to_string(),
            tokens_used: parsed.usage.map(|u| u.total_tokens),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_creation() {
        let adapter = OpenAiAdapter::new(
            "http://localhost:1/v1/chat/completions",
            "test-key",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(adapter.name(), "openai");
        assert_eq!(adapter.endpoint, "http://localhost:1/v1/chat/completions");
    }

    #[test]
    fn test_request_wire_format() {
        let body = ChatRequest {
            model: "gpt-4o-mini",
            messages: [
                ChatMessage { role: "system", content: "sys" },
                ChatMessage { role: "user", content: "hi" },
            ],
            temperature: 0.0,
            max_tokens: 200,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["max_tokens"], 200);
    }

    #[test]
    fn test_response_parsing() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":" [] "}}],"usage":{"total_tokens":12}}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some(" [] "));
        assert_eq!(parsed.usage.unwrap().total_tokens, 12);
    }
}
