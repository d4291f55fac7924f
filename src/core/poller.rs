//! Recovery loop over pending decisions.
//!
//! Every sweep claims up to `fetch_limit` pending decisions (oldest first),
//! enqueues their agents and marks them processed. A decision whose agents
//! could not all be enqueued is marked failed. Decisions that were already
//! dispatched at ingestion are dispatched again here (at-least-once).

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::agents::AgentRegistry;

use super::decision_store::{DecisionStore, StoreError};
use super::dispatch::DispatchQueue;

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub claimed: usize,
    pub processed: usize,
    pub failed: usize,
    pub tasks: usize,
    /// Records skipped because a store write failed
    pub errors: usize,
}

pub struct DecisionPoller {
    store: DecisionStore,
    queue: DispatchQueue,
    registry: Arc<AgentRegistry>,
    interval: Duration,
    fetch_limit: usize,
}

impl DecisionPoller {
    pub fn new(
        store: DecisionStore,
        queue: DispatchQueue,
        registry: Arc<AgentRegistry>,
        interval: Duration,
        fetch_limit: usize,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            interval,
            fetch_limit: fetch_limit.max(1),
        }
    }

    /// One sweep over pending decisions
    pub async fn run_once(&self) -> Result<SweepReport, StoreError> {
        let pending = self.store.fetch_pending(self.fetch_limit).await?;
        let mut report = SweepReport::default();

        for record in pending {
            match self.store.mark_processing(record.id).await {
                Ok(true) => {}
                // Another sweep got here first
                Ok(false) => continue,
                Err(e) => {
                    error!(decision_id = record.id, error = %e, "Failed to claim decision");
                    report.errors += 1;
                    continue;
                }
            }
            report.claimed += 1;

            let success = match self.queue.enqueue_decision(&record, &self.registry) {
                Ok(summary) => {
                    report.tasks += summary.enqueued;
                    summary.is_complete()
                }
                Err(e) => {
                    error!(decision_id = record.id, error = %e, "Failed to enqueue decision");
                    false
                }
            };

            if let Err(e) = self.store.mark_processed(record.id, success).await {
                error!(decision_id = record.id, error = %e, "Failed to record dispatch outcome");
                report.errors += 1;
                continue;
            }
            if success {
                report.processed += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.claimed > 0 || report.errors > 0 {
            info!(
                claimed = report.claimed,
                processed = report.processed,
                failed = report.failed,
                tasks = report.tasks,
                errors = report.errors,
                "Poller sweep"
            );
        } else {
            debug!("Poller sweep found nothing pending");
        }

        Ok(report)
    }

    /// Sweep forever at the configured interval. Store errors are logged
    /// and the loop keeps going.
    pub async fn run(self) {
        info!(interval = ?self.interval, fetch_limit = self.fetch_limit, "Decision poller started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_once().await {
                warn!(error = %e, "Poller sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::MonitoringAgent;
    use crate::domain::{AgentKind, DecisionStatus, DisruptionEvent, RoutingDecision};
    use serde_json::json;

    async fn seed(store: &DecisionStore, id: &str, agents: Vec<AgentKind>) -> i64 {
        let event = DisruptionEvent::from_value(&json!({"event_id": id, "severity": ["Low"]})).unwrap();
        let routing = RoutingDecision {
            selected_agents: agents,
            reason: "test".to_string(),
            fallback: false,
        };
        store.insert(&event, &routing).await.unwrap().id
    }

    fn poller(store: &DecisionStore, queue: &DispatchQueue) -> DecisionPoller {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(MonitoringAgent::new()));
        DecisionPoller::new(
            store.clone(),
            queue.clone(),
            Arc::new(registry),
            Duration::from_millis(10),
            50,
        )
    }

    #[tokio::test]
    async fn test_sweep_processes_pending() {
        let store = DecisionStore::open_in_memory().unwrap();
        let queue = DispatchQueue::new();
        let id = seed(&store, "E1", vec![AgentKind::Monitoring]).await;

        let report = poller(&store, &queue).run_once().await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.tasks, 1);
        assert_eq!(queue.outstanding(), 1);

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, DecisionStatus::Processed);
        assert!(record.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_unregistered_agent_marks_failed() {
        let store = DecisionStore::open_in_memory().unwrap();
        let queue = DispatchQueue::new();
        let id = seed(&store, "E1", vec![AgentKind::CrewAgent, AgentKind::Monitoring]).await;

        let report = poller(&store, &queue).run_once().await.unwrap();
        assert_eq!(report.failed, 1);
        // Monitoring still went out
        assert_eq!(report.tasks, 1);

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, DecisionStatus::Failed);
    }

    #[tokio::test]
    async fn test_store_error_on_one_record_does_not_abort_sweep() {
        let store = DecisionStore::open_in_memory().unwrap();
        let queue = DispatchQueue::new();
        let broken = seed(&store, "E1", vec![AgentKind::Monitoring]).await;
        let healthy = seed(&store, "E2", vec![AgentKind::Monitoring]).await;

        // Completing E1 fails inside SQLite
        store
            .with_conn(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_e1 BEFORE UPDATE OF status ON decisions
                     WHEN OLD.event_id = 'E1' AND NEW.status IN ('processed', 'failed')
                     BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let report = poller(&store, &queue).run_once().await.unwrap();
        assert_eq!(report.claimed, 2);
        assert_eq!(report.errors, 1);
        assert_eq!(report.processed, 1);

        let healthy = store.get(healthy).await.unwrap().unwrap();
        assert_eq!(healthy.status, DecisionStatus::Processed);
        let broken = store.get(broken).await.unwrap().unwrap();
        assert_eq!(broken.status, DecisionStatus::Processing);
    }

    #[tokio::test]
    async fn test_second_sweep_is_empty() {
        let store = DecisionStore::open_in_memory().unwrap();
        let queue = DispatchQueue::new();
        seed(&store, "E1", vec![AgentKind::Monitoring]).await;
        seed(&store, "E2", vec![AgentKind::Monitoring]).await;

        let poller = poller(&store, &queue);
        assert_eq!(poller.run_once().await.unwrap().claimed, 2);
        assert_eq!(poller.run_once().await.unwrap(), SweepReport::default());
    }
}
