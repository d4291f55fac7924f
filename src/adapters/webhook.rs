//! Webhook client for agents hosted outside this process.
//!
//! Endpoint: POST <webhook> with the event JSON as body
//! Auth: optional Bearer token

use anyhow::{Context, Result};
use serde_json::Value;

/// HTTP client bound to one agent endpoint
pub struct WebhookClient {
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl WebhookClient {
    /// Create a new client
    pub fn new(endpoint: String, token: Option<String>) -> Self {
        Self {
            endpoint,
            token,
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Deliver an event and return the agent's JSON reply.
    ///
    /// An empty or non-JSON 2xx body is reported as `{"status": "accepted"}`.
    pub async fn post_event(&self, event: &Value) -> Result<Value> {
        let mut request = self.client.post(&self.endpoint).json(event);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach agent endpoint {}", self.endpoint))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            anyhow::bail!("Agent endpoint error ({}): {}", status, text);
        }

        Ok(serde_json::from_str(&text).unwrap_or_else(|_| serde_json::json!({ "status": "accepted" })))
    }
}
