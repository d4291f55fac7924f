//! Adapter interfaces for external systems.
//!
//! Adapters provide a unified interface for the reasoning service used by
//! extraction and routing, and for HTTP endpoints that host external agents.

pub mod openai;
pub mod webhook;

use anyhow::Result;
use async_trait::async_trait;

pub use openai::OpenAiAdapter;
pub use webhook::WebhookClient;

/// One reasoning call: a system instruction plus user content
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    /// Model identifier passed through to the provider
    pub model: String,

    /// Instruction contract
    pub system: String,

    /// Content to reason about
    pub user: String,

    /// Completion token cap
    pub max_tokens: u32,
}

impl ReasoningRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            user: user.into(),
            max_tokens: 1000,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Output from a reasoning call
#[derive(Debug, Clone)]
pub struct ReasoningOutput {
    /// Raw text returned by the model
    pub content: String,

    /// Tokens used (if reported)
    pub tokens_used: Option<u64>,
}

impl ReasoningOutput {
    /// Create a new output with just content
    pub fn new(content: String) -> Self {
        Self {
            content,
            tokens_used: None,
        }
    }
}

/// Trait for reasoning backends
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Run one completion
    async fn complete(&self, request: &ReasoningRequest) -> Result<ReasoningOutput>;
}
