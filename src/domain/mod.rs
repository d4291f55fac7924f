//! Domain types for the irops pipeline.
//!
//! This module contains the core data structures:
//! - Events: Disruption events extracted from incident reports
//! - Decisions: Durable routing outcomes and their status machine
//! - Agents: The closed set of downstream handler identifiers

pub mod agent;
pub mod decision;
pub mod event;

// Re-export commonly used types
pub use agent::AgentKind;
pub use decision::{DecisionRecord, DecisionStatus, RoutingDecision};
pub use event::DisruptionEvent;
