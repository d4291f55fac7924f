//! Built-in monitoring agent: records every event it sees.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::domain::AgentKind;

use super::AgentHandler;

/// One monitored event
#[derive(Debug, Clone, Serialize)]
pub struct MonitorEntry {
    pub event_id: Option<String>,
    pub severity: Value,
    pub ts: DateTime<Utc>,
}

/// In-memory monitoring log
#[derive(Debug, Default)]
pub struct MonitoringAgent {
    log: Mutex<Vec<MonitorEntry>>,
}

impl MonitoringAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<MonitorEntry> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn total_logged(&self) -> usize {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl AgentHandler for MonitoringAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Monitoring
    }

    async fn handle(&self, event: &Value) -> Result<Value> {
        let entry = MonitorEntry {
            event_id: event.get("event_id").and_then(Value::as_str).map(str::to_string),
            severity: event.get("severity").cloned().unwrap_or(Value::Null),
            ts: Utc::now(),
        };

        info!(event_id = ?entry.event_id, severity = %entry.severity, "Event monitored");

        let total = {
            let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
            log.push(entry);
            log.len()
        };

        Ok(json!({ "status": "logged", "total_logged": total }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_every_call() {
        let agent = MonitoringAgent::new();
        let event = json!({"event_id": "E1", "severity": ["High"]});

        let first = agent.handle(&event).await.unwrap();
        let second = agent.handle(&event).await.unwrap();

        assert_eq!(first, json!({"status": "logged", "total_logged": 1}));
        assert_eq!(second["total_logged"], 2);
        assert_eq!(agent.entries()[0].event_id.as_deref(), Some("E1"));
        assert_eq!(agent.entries()[0].severity, json!(["High"]));
    }

    #[tokio::test]
    async fn test_tolerates_sparse_event() {
        let agent = MonitoringAgent::new();
        agent.handle(&json!({})).await.unwrap();
        assert_eq!(agent.total_logged(), 1);
        assert!(agent.entries()[0].event_id.is_none());
    }
}
