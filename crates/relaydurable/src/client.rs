use crate::activities::WorkerDeps;
use crate::orchestrator::{drive, RunRequest, WorkflowProgress};
use crate::store::{ExecutionInfo, ExecutionStatus, ExecutionStore, RunId};
use relaycore::{EngineError, WorkflowDefinition};
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

/// End-to-end bound on one durable execution.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Parameters for starting a durable execution.
pub struct StartWorkflowParams {
    pub definition_id: String,
    /// Snapshot of the definition as of start time; later edits to the
    /// stored definition never affect a running execution.
    pub dsl: WorkflowDefinition,
    pub input: Value,
    pub caller_id: Option<String>,
    pub context: Value,
}

/// Identifiers of a started execution.
#[derive(Debug, Clone)]
pub struct StartedExecution {
    pub durable_execution_id: String,
    pub run_id: RunId,
}

/// Client facade over the durable engine: start, monitor, fetch results of
/// and cancel executions. Start never blocks for completion.
pub struct DurableClient {
    deps: WorkerDeps,
    store: Arc<ExecutionStore>,
}

impl DurableClient {
    pub fn new(deps: WorkerDeps) -> Self {
        Self {
            deps,
            store: Arc::new(ExecutionStore::new()),
        }
    }

    /// Start a workflow asynchronously, returning its identifiers
    /// immediately. Definition and input are validated up front; a rejected
    /// start never registers an execution.
    pub fn start(&self, params: StartWorkflowParams) -> Result<StartedExecution, EngineError> {
        params.dsl.validate()?;
        params.dsl.validate_input(&params.input)?;

        let durable_execution_id = format!("dsl-{}-{}", params.definition_id, Uuid::new_v4());
        let run_id = Uuid::new_v4();
        let (_entry, cancel_rx, progress_tx) = self.store.create(&durable_execution_id, run_id);

        tracing::info!(
            workflow = %params.definition_id,
            execution = %durable_execution_id,
            "Starting durable workflow execution"
        );

        let request = RunRequest {
            definition_id: params.definition_id,
            dsl: params.dsl,
            input: params.input,
            caller_id: params.caller_id,
            context: params.context,
        };
        let deps = self.deps.clone();
        let store = Arc::clone(&self.store);
        let execution_id = durable_execution_id.clone();

        tokio::spawn(async move {
            let outcome = match timeout(EXECUTION_TIMEOUT, drive(deps, request, cancel_rx, progress_tx))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout("workflow execution".to_string())),
            };

            match outcome {
                Ok(output) => store.complete(&execution_id, output),
                Err(err) => {
                    tracing::error!(execution = %execution_id, "Workflow failed: {}", err);
                    store.fail(&execution_id, err);
                }
            }
        });

        Ok(StartedExecution {
            durable_execution_id,
            run_id,
        })
    }

    /// Describe an execution: status plus start/close times.
    pub fn status(&self, durable_execution_id: &str) -> Result<ExecutionInfo, EngineError> {
        let entry = self.entry(durable_execution_id)?;
        Ok(ExecutionInfo {
            durable_execution_id: durable_execution_id.to_string(),
            run_id: entry.run_id,
            status: entry.status(),
            start_time: entry.start_time,
            close_time: entry.close_time(),
        })
    }

    /// Fetch the output of a completed execution. Fails while the execution
    /// is still running, and surfaces the stored error for failed runs.
    pub fn result(&self, durable_execution_id: &str) -> Result<Value, EngineError> {
        let entry = self.entry(durable_execution_id)?;
        match entry.status() {
            ExecutionStatus::Running => Err(EngineError::Transient(format!(
                "execution {} has not completed",
                durable_execution_id
            ))),
            ExecutionStatus::Completed => Ok(entry.result().unwrap_or(Value::Null)),
            ExecutionStatus::Failed | ExecutionStatus::Cancelled => Err(entry
                .error()
                .unwrap_or_else(|| EngineError::Transient("execution failed".to_string()))),
        }
    }

    /// Wait for the execution to reach a terminal status, then fetch its
    /// result.
    pub async fn wait_result(&self, durable_execution_id: &str) -> Result<Value, EngineError> {
        let entry = self.entry(durable_execution_id)?;
        entry.wait_done().await;
        self.result(durable_execution_id)
    }

    /// Deliver the cancel signal. Best-effort and cooperative: a step
    /// already executing runs to completion first.
    pub fn cancel(&self, durable_execution_id: &str) -> Result<(), EngineError> {
        let entry = self.entry(durable_execution_id)?;
        tracing::info!(execution = %durable_execution_id, "Cancel signal delivered");
        entry.signal_cancel();
        Ok(())
    }

    /// Query the event type the execution is currently processing.
    pub fn current_step(&self, durable_execution_id: &str) -> Result<String, EngineError> {
        Ok(self.entry(durable_execution_id)?.progress().current_step)
    }

    /// Query the full progress snapshot, available mid-execution.
    pub fn progress(&self, durable_execution_id: &str) -> Result<WorkflowProgress, EngineError> {
        Ok(self.entry(durable_execution_id)?.progress())
    }

    fn entry(
        &self,
        durable_execution_id: &str,
    ) -> Result<Arc<crate::store::ExecutionEntry>, EngineError> {
        self.store.get(durable_execution_id).ok_or_else(|| {
            EngineError::Validation(format!("unknown execution: {}", durable_execution_id))
        })
    }
}
