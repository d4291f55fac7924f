//! In-process dispatch queue and worker pool.
//!
//! Two producers feed the queue: ingestion (immediately after a decision is
//! stored) and the recovery poller. Both may enqueue the same decision, so
//! delivery is at-least-once and handlers must be idempotent.
//!
//! Workers share one receiver. A handler error, timeout or panic is
//! recorded as `{"status": "error", "error": ..}` and the worker moves on.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::agents::{AgentRegistry, HandlerError};
use crate::domain::{AgentKind, DecisionRecord};

const OUTCOME_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Dispatch queue is closed")]
    Closed,
}

/// One agent invocation for one event
#[derive(Debug, Clone)]
pub struct DispatchTask {
    pub agent: AgentKind,
    /// Decision the task came from (absent for ad-hoc dispatch)
    pub decision_id: Option<i64>,
    pub event_id: String,
    pub payload: Value,
}

impl DispatchTask {
    pub fn new(agent: AgentKind, decision_id: Option<i64>, payload: Value) -> Self {
        let event_id = payload
            .get("event_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            agent,
            decision_id,
            event_id,
            payload,
        }
    }
}

/// Result of running one task
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub agent: AgentKind,
    pub decision_id: Option<i64>,
    pub event_id: String,
    pub succeeded: bool,
    /// Handler output, or `{"status": "error", "error": msg}`
    pub result: Value,
}

/// What happened when a decision's agents were enqueued
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueSummary {
    pub enqueued: usize,
    /// Selected agents with no registered handler
    pub skipped: Vec<AgentKind>,
}

impl EnqueueSummary {
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Unbounded FIFO of [`DispatchTask`]s. Clones share the same queue.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<DispatchTask>,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<DispatchTask>>>,
    /// Enqueued but not yet finished
    outstanding: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            outstanding: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn enqueue(&self, task: DispatchTask) -> Result<(), DispatchError> {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(task).is_err() {
            self.finish_one();
            return Err(DispatchError::Closed);
        }
        Ok(())
    }

    /// Enqueue one task per selected agent that has a handler
    pub fn enqueue_decision(
        &self,
        record: &DecisionRecord,
        registry: &AgentRegistry,
    ) -> Result<EnqueueSummary, DispatchError> {
        let mut summary = EnqueueSummary::default();

        for agent in &record.selected_agents {
            if !registry.contains(*agent) {
                warn!(decision_id = record.id, agent = %agent, "No handler registered, skipping");
                summary.skipped.push(*agent);
                continue;
            }
            self.enqueue(DispatchTask::new(*agent, Some(record.id), record.event_json.clone()))?;
            summary.enqueued += 1;
        }

        Ok(summary)
    }

    /// Tasks enqueued and not yet completed
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Wait until every enqueued task has completed
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.outstanding() == 0 {
                return;
            }
            notified.await;
        }
    }

    async fn next(&self) -> Option<DispatchTask> {
        self.rx.lock().await.recv().await
    }

    fn finish_one(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Fixed pool of worker loops draining a [`DispatchQueue`]
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    outcomes: broadcast::Sender<DispatchOutcome>,
}

impl WorkerPool {
    /// Start `workers` loops (at least one)
    pub fn spawn(
        workers: usize,
        queue: DispatchQueue,
        registry: Arc<AgentRegistry>,
        handler_timeout: Option<Duration>,
    ) -> Self {
        let (outcomes, _) = broadcast::channel(OUTCOME_BUFFER);

        let handles = (0..workers.max(1))
            .map(|worker| {
                let queue = queue.clone();
                let registry = Arc::clone(&registry);
                let outcomes = outcomes.clone();
                tokio::spawn(async move {
                    while let Some(task) = queue.next().await {
                        let outcome = run_task(&registry, task, handler_timeout).await;
                        log_outcome(worker, &outcome);
                        // No subscribers is fine
                        let _ = outcomes.send(outcome);
                        queue.finish_one();
                    }
                })
            })
            .collect();

        info!(workers = workers.max(1), "Worker pool started");
        Self { handles, outcomes }
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Stream of outcomes from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchOutcome> {
        self.outcomes.subscribe()
    }

    /// Stop all workers; queued tasks are left in the queue
    pub fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn run_task(
    registry: &AgentRegistry,
    task: DispatchTask,
    handler_timeout: Option<Duration>,
) -> DispatchOutcome {
    let result = invoke(registry, &task, handler_timeout).await;

    let (succeeded, result) = match result {
        Ok(value) => (true, value),
        Err(e) => (false, json!({ "status": "error", "error": e.to_string() })),
    };

    DispatchOutcome {
        agent: task.agent,
        decision_id: task.decision_id,
        event_id: task.event_id,
        succeeded,
        result,
    }
}

async fn invoke(
    registry: &AgentRegistry,
    task: &DispatchTask,
    handler_timeout: Option<Duration>,
) -> Result<Value, HandlerError> {
    let handler = registry
        .get(task.agent)
        .ok_or(HandlerError::Unregistered(task.agent))?;

    let call = AssertUnwindSafe(handler.handle(&task.payload)).catch_unwind();
    let joined = match handler_timeout {
        Some(timeout) => tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| HandlerError::TimedOut {
                agent: task.agent,
                timeout,
            })?,
        None => call.await,
    };

    match joined {
        Ok(result) => Ok(result?),
        Err(_) => Err(HandlerError::Failed(anyhow::anyhow!("handler panicked"))),
    }
}

fn log_outcome(worker: usize, outcome: &DispatchOutcome) {
    if outcome.succeeded {
        info!(
            worker,
            agent = %outcome.agent,
            event_id = %outcome.event_id,
            decision_id = ?outcome.decision_id,
            status = %outcome.result.get("status").unwrap_or(&serde_json::Value::Null),
            "Agent completed"
        );
    } else {
        error!(
            worker,
            agent = %outcome.agent,
            event_id = %outcome.event_id,
            decision_id = ?outcome.decision_id,
            error = %outcome.result.get("error").unwrap_or(&serde_json::Value::Null),
            "Agent failed"
        );
    }
}
