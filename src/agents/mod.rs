//! Downstream agents and the registry that resolves them.
//!
//! An agent receives the persisted event JSON and returns a JSON outcome
//! (`{"status": ..}` plus whatever it wants to report). Agents must
//! tolerate being invoked more than once for the same event.

pub mod monitoring;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::config::AgentEndpoint;
use crate::domain::AgentKind;

pub use monitoring::MonitoringAgent;
pub use webhook::WebhookAgent;

/// Failure of one dispatch task
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("No handler registered for {0}")]
    Unregistered(AgentKind),

    #[error("Handler {agent} timed out after {timeout:?}")]
    TimedOut { agent: AgentKind, timeout: Duration },

    #[error("{0:#}")]
    Failed(#[from] anyhow::Error),
}

/// A handler for one [`AgentKind`]
#[async_trait]
pub trait AgentHandler: Send + Sync {
    fn kind(&self) -> AgentKind;

    /// Act on an event, returning a JSON outcome
    async fn handle(&self, event: &Value) -> Result<Value>;
}

/// Typed lookup from agent identifier to handler
#[derive(Clone, Default)]
pub struct AgentRegistry {
    handlers: HashMap<AgentKind, Arc<dyn AgentHandler>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its own kind, replacing any previous one
    pub fn register(&mut self, handler: Arc<dyn AgentHandler>) -> &mut Self {
        self.handlers.insert(handler.kind(), handler);
        self
    }

    pub fn get(&self, kind: AgentKind) -> Option<Arc<dyn AgentHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: AgentKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds in taxonomy order
    pub fn kinds(&self) -> Vec<AgentKind> {
        AgentKind::ALL
            .into_iter()
            .filter(|kind| self.handlers.contains_key(kind))
            .collect()
    }

    /// Built-in monitoring plus one webhook agent per configured endpoint.
    ///
    /// Config keys that are not agent names are skipped with a warning.
    pub fn from_config(agents: &HashMap<String, AgentEndpoint>, monitoring: Arc<MonitoringAgent>) -> Self {
        let mut registry = Self::new();
        registry.register(monitoring);

        for (name, endpoint) in agents {
            match name.parse::<AgentKind>() {
                Ok(AgentKind::Monitoring) => {
                    warn!(agent = %name, "Monitoring is built in; ignoring webhook binding");
                }
                Ok(kind) => {
                    registry.register(Arc::new(WebhookAgent::from_endpoint(kind, endpoint)));
                }
                Err(e) => warn!(error = %e, "Skipping agent binding"),
            }
        }

        registry
    }
}
