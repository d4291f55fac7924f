//! Routing decisions and their durable records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::agent::AgentKind;

/// Status of a persisted decision.
///
/// Transitions: `Pending → Processing → {Processed, Failed}`. Terminal
/// states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    /// Stored, not yet picked up by a poller
    Pending,

    /// Claimed by a poller, agents being enqueued
    Processing,

    /// Agents enqueued successfully
    Processed,

    /// Dispatch could not be completed
    Failed,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Pending => "pending",
            DecisionStatus::Processing => "processing",
            DecisionStatus::Processed => "processed",
            DecisionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DecisionStatus::Processed | DecisionStatus::Failed)
    }

    /// Whether `self → next` is a legal single step
    pub fn can_transition_to(&self, next: DecisionStatus) -> bool {
        matches!(
            (self, next),
            (DecisionStatus::Pending, DecisionStatus::Processing)
                | (DecisionStatus::Processing, DecisionStatus::Processed)
                | (DecisionStatus::Processing, DecisionStatus::Failed)
        )
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DecisionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DecisionStatus::Pending),
            "processing" => Ok(DecisionStatus::Processing),
            "processed" => Ok(DecisionStatus::Processed),
            "failed" => Ok(DecisionStatus::Failed),
            other => Err(format!("unknown decision status: {}", other)),
        }
    }
}

/// Output of the routing classifier for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Agents to run; always contains `monitoring`
    pub selected_agents: Vec<AgentKind>,

    /// Short explanation from the classifier
    pub reason: String,

    /// True when the classifier output was unusable
    #[serde(default)]
    pub fallback: bool,
}

/// A durable decision row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Store-assigned identifier
    pub id: i64,

    pub event_id: String,

    /// Full event as persisted; handler payload
    pub event_json: serde_json::Value,

    pub selected_agents: Vec<AgentKind>,

    pub reason: String,

    /// First element of the event's severity list
    pub severity: Option<String>,

    pub status: DecisionStatus,

    pub created_at: DateTime<Utc>,

    pub processed_at: Option<DateTime<Utc>>,
}
