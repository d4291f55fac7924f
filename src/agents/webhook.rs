use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::adapters::WebhookClient;
use crate::config::AgentEndpoint;
use crate::domain::AgentKind;

use super::AgentHandler;

/// Agent hosted behind an HTTP endpoint
pub struct WebhookAgent {
    kind: AgentKind,
    client: WebhookClient,
}

impl WebhookAgent {
    pub fn new(kind: AgentKind, client: WebhookClient) -> Self {
        Self { kind, client }
    }

    /// Bind from config; the bearer token is read from `token_env` if set
    pub fn from_endpoint(kind: AgentKind, endpoint: &AgentEndpoint) -> Self {
        let token = endpoint
            .token_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok());
        Self::new(kind, WebhookClient::new(endpoint.webhook.clone(), token))
    }
}

#[async_trait]
impl AgentHandler for WebhookAgent {
    fn kind(&self) -> AgentKind {
        self.kind
    }

    async fn handle(&self, event: &Value) -> Result<Value> {
        debug!(agent = %self.kind, endpoint = self.client.endpoint(), "Posting event");
        self.client.post_event(event).await
    }
}
