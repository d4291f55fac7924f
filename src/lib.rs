//! irops - incident report ingestion, routing and dispatch
//!
//! Turns unstructured irregular-operations reports into routed, durably
//! recorded decisions and runs the downstream agents for each one.
//!
//! # Architecture
//!
//! ```text
//! PDF → text → chunks → events → routing → decision store → dispatch queue → workers
//!                 ↑                  ↑            ↑
//!              reasoning gateway (cache + token bucket + semaphore)
//!                                            recovery poller
//! ```
//!
//! - Every reasoning call goes through one shared gateway, so the rate
//!   limit and cache are process-wide
//! - Decisions are persisted before dispatch; a poller re-dispatches
//!   anything still pending, so agents may see an event more than once
//!
//! # Modules
//!
//! - `adapters`: Reasoning backends and agent webhooks
//! - `agents`: Agent handlers and the registry
//! - `api`: HTTP surface
//! - `core`: Limiter, cache, routing, decision store, dispatch, pipeline
//! - `domain`: Data structures (events, decisions, agent kinds)
//! - `ingest`: Document text, chunking, repair, event extraction
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Ingest one report and wait for its agents
//! irops ingest bulletin.pdf --wait
//!
//! # Run the upload server with workers and poller
//! irops serve --address 127.0.0.1:8000
//!
//! # Inspect decisions
//! irops decisions --status pending
//! ```

pub mod adapters;
pub mod agents;
pub mod api;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use agents::{AgentHandler, AgentRegistry, MonitoringAgent};
pub use core::{DecisionStore, DispatchQueue, IngestPipeline, ReasoningGateway, WorkerPool};
pub use domain::{AgentKind, DecisionRecord, DecisionStatus, DisruptionEvent, RoutingDecision};
