//! The ingestion entrypoint.
//!
//! One document in, one [`IngestResponse`] out:
//! text extraction → event extraction → routing → decision insert →
//! immediate dispatch. Only a document with no extractable text is an
//! error; everything after that is best-effort and reported in the
//! response.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::adapters::Reasoner;
use crate::agents::AgentRegistry;
use crate::config::ResolvedConfig;
use crate::domain::{AgentKind, DisruptionEvent};
use crate::ingest::{ChunkFailure, DocumentExtractor, EventExtractor, ExtractionError, PdfTextExtractor};

use super::cache::ResponseCache;
use super::decision_store::DecisionStore;
use super::dispatch::DispatchQueue;
use super::gateway::ReasoningGateway;
use super::limiter::RateGuard;
use super::router::RoutingClassifier;

/// Message returned when a readable document yields no events
pub const NO_EVENTS_MESSAGE: &str = "No events parsed";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error("Document extraction task failed: {0}")]
    Task(String),
}

/// Routing outcome for one event
#[derive(Debug, Clone, Serialize)]
pub struct RoutedEvent {
    pub event_id: String,
    /// Absent when the decision could not be stored
    pub decision_id: Option<i64>,
    pub selected_agents: Vec<AgentKind>,
    pub reason: String,
}

/// Response to one ingested document
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    pub events: Vec<DisruptionEvent>,
    pub routing: Vec<RoutedEvent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed_chunks: Vec<ChunkFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shared reasoning gateway built once per process
pub fn build_gateway(config: &ResolvedConfig, reasoner: Arc<dyn Reasoner>) -> ReasoningGateway {
    let cache = match config.limits.cache_capacity {
        Some(capacity) => ResponseCache::with_capacity(capacity),
        None => ResponseCache::new(),
    };
    ReasoningGateway::new(
        reasoner,
        Arc::new(RateGuard::from_settings(&config.limits)),
        Arc::new(cache),
    )
}

#[derive(Clone)]
pub struct IngestPipeline {
    documents: Arc<dyn DocumentExtractor>,
    extractor: EventExtractor,
    classifier: RoutingClassifier,
    store: DecisionStore,
    queue: DispatchQueue,
    registry: Arc<AgentRegistry>,
}

impl IngestPipeline {
    pub fn new(
        extractor: EventExtractor,
        classifier: RoutingClassifier,
        store: DecisionStore,
        queue: DispatchQueue,
        registry: Arc<AgentRegistry>,
    ) -> Self {
        Self {
            documents: Arc::new(PdfTextExtractor),
            extractor,
            classifier,
            store,
            queue,
            registry,
        }
    }

    /// Wire extractor and classifier to one shared gateway
    pub fn from_config(
        config: &ResolvedConfig,
        gateway: ReasoningGateway,
        store: DecisionStore,
        queue: DispatchQueue,
        registry: Arc<AgentRegistry>,
    ) -> Self {
        let extractor = EventExtractor::new(
            gateway.clone(),
            config.reasoning.extraction_model.clone(),
            &config.extraction,
        );
        let classifier = RoutingClassifier::new(gateway, config.reasoning.routing_model.clone())
            .with_rules(config.routing_rules.clone());

        Self::new(extractor, classifier, store, queue, registry)
    }

    pub fn with_document_extractor(mut self, documents: Arc<dyn DocumentExtractor>) -> Self {
        self.documents = documents;
        self
    }

    pub fn store(&self) -> &DecisionStore {
        &self.store
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    /// Ingest one uploaded report
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn ingest_document(
        &self,
        filename: Option<String>,
        bytes: Vec<u8>,
    ) -> Result<IngestResponse, IngestError> {
        let documents = Arc::clone(&self.documents);
        let document = tokio::task::spawn_blocking(move || documents.extract(filename.as_deref(), &bytes))
            .await
            .map_err(|e| IngestError::Task(e.to_string()))??;

        if !document.failed_pages.is_empty() {
            warn!(failed_pages = ?document.failed_pages, pages = document.pages, "Some pages were unreadable");
        }

        Ok(self.ingest_text(&document.text).await)
    }

    /// Ingest already-extracted report text
    pub async fn ingest_text(&self, text: &str) -> IngestResponse {
        let report = self.extractor.extract(text).await;

        if report.events.is_empty() {
            info!(chunks = report.chunks, "No events parsed");
            return IngestResponse {
                events: Vec::new(),
                routing: Vec::new(),
                failed_chunks: report.failures,
                message: Some(NO_EVENTS_MESSAGE.to_string()),
            };
        }

        let decisions = join_all(report.events.iter().map(|event| self.classifier.classify(event))).await;

        let mut routing = Vec::with_capacity(report.events.len());
        for (event, decision) in report.events.iter().zip(decisions) {
            let decision_id = match self.store.insert(event, &decision).await {
                Ok(record) => {
                    if let Err(e) = self.queue.enqueue_decision(&record, &self.registry) {
                        error!(decision_id = record.id, error = %e, "Immediate dispatch failed");
                    }
                    Some(record.id)
                }
                Err(e) => {
                    error!(event_id = %event.event_id, error = %e, "Failed to store decision");
                    None
                }
            };

            routing.push(RoutedEvent {
                event_id: event.event_id.clone(),
                decision_id,
                selected_agents: decision.selected_agents,
                reason: decision.reason,
            });
        }

        info!(events = report.events.len(), "Document ingested");

        IngestResponse {
            events: report.events,
            routing,
            failed_chunks: report.failures,
            message: None,
        }
    }
}
