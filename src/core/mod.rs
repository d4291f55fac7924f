//! Core pipeline logic.
//!
//! This module contains:
//! - Limiter and cache: the guard in front of the reasoning service
//! - Gateway: cached, rate-limited reasoning calls
//! - Router: per-event agent selection
//! - DecisionStore: durable decision records
//! - Dispatch and poller: getting decisions to agents
//! - Pipeline: the ingestion entrypoint

pub mod cache;
pub mod decision_store;
pub mod dispatch;
pub mod gateway;
pub mod limiter;
pub mod pipeline;
pub mod poller;
pub mod router;

// Re-export commonly used types
pub use cache::{cache_key, ResponseCache};
pub use decision_store::{DecisionStore, StoreError};
pub use dispatch::{DispatchOutcome, DispatchQueue, DispatchTask, EnqueueSummary, WorkerPool};
pub use gateway::ReasoningGateway;
pub use limiter::{RateGuard, TokenBucket};
pub use pipeline::{build_gateway, IngestPipeline, IngestResponse, RoutedEvent};
pub use poller::{DecisionPoller, SweepReport};
pub use router::{RoutingClassifier, RoutingRule};
