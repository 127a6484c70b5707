use crate::orchestrator::WorkflowProgress;
use chrono::{DateTime, Utc};
use relaycore::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use uuid::Uuid;

pub type RunId = Uuid;

/// Terminal-or-running state of a durable execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Queryable description of one execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionInfo {
    pub durable_execution_id: String,
    pub run_id: RunId,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub close_time: Option<DateTime<Utc>>,
}

struct ExecutionState {
    status: ExecutionStatus,
    close_time: Option<DateTime<Utc>>,
    result: Option<Value>,
    error: Option<EngineError>,
}

/// One tracked execution: status, timestamps, result slot, and the signal
/// and query channels wired to its orchestration loop.
pub struct ExecutionEntry {
    pub run_id: RunId,
    pub start_time: DateTime<Utc>,
    state: RwLock<ExecutionState>,
    done_tx: watch::Sender<bool>,
    cancel_tx: watch::Sender<bool>,
    progress_rx: watch::Receiver<WorkflowProgress>,
}

impl ExecutionEntry {
    pub fn status(&self) -> ExecutionStatus {
        self.state.read().unwrap().status
    }

    pub fn close_time(&self) -> Option<DateTime<Utc>> {
        self.state.read().unwrap().close_time
    }

    pub fn result(&self) -> Option<Value> {
        self.state.read().unwrap().result.clone()
    }

    pub fn error(&self) -> Option<EngineError> {
        self.state.read().unwrap().error.clone()
    }

    pub fn progress(&self) -> WorkflowProgress {
        self.progress_rx.borrow().clone()
    }

    /// Deliver the cancel signal. Best-effort: the loop observes it at its
    /// next iteration boundary.
    pub fn signal_cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Wait until the execution reaches a terminal status.
    pub async fn wait_done(&self) {
        let mut done_rx = self.done_tx.subscribe();
        while !*done_rx.borrow() {
            if done_rx.changed().await.is_err() {
                break;
            }
        }
    }

    fn close(&self, status: ExecutionStatus, result: Option<Value>, error: Option<EngineError>) {
        {
            let mut state = self.state.write().unwrap();
            state.status = status;
            state.close_time = Some(Utc::now());
            state.result = result;
            state.error = error;
        }
        let _ = self.done_tx.send(true);
    }
}

/// In-memory execution store: the substrate-side record of every durable
/// run this process has started.
#[derive(Default)]
pub struct ExecutionStore {
    executions: RwLock<HashMap<String, Arc<ExecutionEntry>>>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new running execution, returning the entry plus the signal
    /// and query endpoints its orchestration loop consumes.
    pub fn create(
        &self,
        durable_execution_id: &str,
        run_id: RunId,
    ) -> (
        Arc<ExecutionEntry>,
        watch::Receiver<bool>,
        watch::Sender<WorkflowProgress>,
    ) {
        let (done_tx, _) = watch::channel(false);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (progress_tx, progress_rx) = watch::channel(WorkflowProgress::default());

        let entry = Arc::new(ExecutionEntry {
            run_id,
            start_time: Utc::now(),
            state: RwLock::new(ExecutionState {
                status: ExecutionStatus::Running,
                close_time: None,
                result: None,
                error: None,
            }),
            done_tx,
            cancel_tx,
            progress_rx,
        });

        self.executions
            .write()
            .unwrap()
            .insert(durable_execution_id.to_string(), Arc::clone(&entry));

        (entry, cancel_rx, progress_tx)
    }

    pub fn get(&self, durable_execution_id: &str) -> Option<Arc<ExecutionEntry>> {
        self.executions
            .read()
            .unwrap()
            .get(durable_execution_id)
            .cloned()
    }

    pub fn complete(&self, durable_execution_id: &str, result: Value) {
        if let Some(entry) = self.get(durable_execution_id) {
            entry.close(ExecutionStatus::Completed, Some(result), None);
        }
    }

    pub fn fail(&self, durable_execution_id: &str, error: EngineError) {
        if let Some(entry) = self.get(durable_execution_id) {
            let status = match error.kind() {
                relaycore::ErrorKind::Cancelled => ExecutionStatus::Cancelled,
                _ => ExecutionStatus::Failed,
            };
            entry.close(status, None, Some(error));
        }
    }
}
