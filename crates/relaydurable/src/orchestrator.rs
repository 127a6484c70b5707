use crate::activities::{Activities, WorkerDeps};
use crate::activity::{run_activity, ActivityProfile};
use relaycore::{EngineError, WorkflowDefinition, WorkflowEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

/// Upper bound on step iterations per run; guards against DSLs without a
/// reachable stop event.
pub const MAX_ITERATIONS: u32 = 50;

/// Read-only progress snapshot exposed through queries at any time,
/// including mid-execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub completed_steps: Vec<String>,
    pub current_step: String,
    pub total_steps: usize,
}

/// Everything needed to drive one durable run.
pub struct RunRequest {
    pub definition_id: String,
    pub dsl: WorkflowDefinition,
    pub input: Value,
    pub caller_id: Option<String>,
    pub context: Value,
}

/// The replay-deterministic orchestration loop.
///
/// Logically single-threaded per run: it awaits each activity before
/// proceeding, so steps within one run are strictly sequential. The
/// cancellation signal is cooperative, checked only at loop boundaries — a
/// step already executing runs to completion.
pub async fn drive(
    deps: WorkerDeps,
    request: RunRequest,
    cancel_rx: watch::Receiver<bool>,
    progress_tx: watch::Sender<WorkflowProgress>,
) -> Result<Value, EngineError> {
    let dsl = &request.dsl;
    let caller_id = request.caller_id.as_deref();
    let activities = Activities::new(&deps);

    // Phase 1: resolve declared tools once.
    run_activity(&ActivityProfile::resolution(), "resolveTools", |_hb| {
        activities.resolve_tools(&dsl.tools, caller_id)
    })
    .await?;

    // Phase 2: resolve declared agents once (idempotent per definition).
    run_activity(&ActivityProfile::resolution(), "resolveAgents", |_hb| {
        activities.resolve_agents(&dsl.agents, &request.definition_id, caller_id)
    })
    .await?;

    // Phase 3: build the event -> step map.
    let step_map = dsl.step_map();

    let mut completed_steps: Vec<String> = Vec::new();
    let mut current_step = String::new();
    let total_steps = dsl.steps.len();
    let _ = progress_tx.send(WorkflowProgress {
        completed_steps: completed_steps.clone(),
        current_step: current_step.clone(),
        total_steps,
    });

    // Phase 4: execute the event chain.
    let mut current_event = Some(WorkflowEvent::start(request.input.clone()));
    let mut context = request.context.clone();
    let mut iterations: u32 = 0;

    while let Some(event) = current_event.take() {
        if event.is_stop() || *cancel_rx.borrow() {
            current_event = Some(event);
            break;
        }

        if iterations >= MAX_ITERATIONS {
            return Err(EngineError::MaxIterationsExceeded(MAX_ITERATIONS));
        }
        iterations += 1;

        let step = *step_map.get(event.event_type.as_str()).ok_or_else(|| {
            EngineError::Validation(format!(
                "no step handler found for event: {}",
                event.event_type
            ))
        })?;

        current_step = event.event_type.clone();
        let _ = progress_tx.send(WorkflowProgress {
            completed_steps: completed_steps.clone(),
            current_step: current_step.clone(),
            total_steps,
        });

        // Steps whose handler text references an agent get the long profile.
        let has_agent_calls = dsl.agents.iter().any(|agent| step.references(&agent.name));
        let profile = if has_agent_calls {
            ActivityProfile::step_with_agents()
        } else {
            ActivityProfile::step()
        };

        let event_for_attempts = event.clone();
        let context_for_attempts = context.clone();
        let outcome = run_activity(&profile, "executeStep", |hb| {
            activities.execute_step(
                dsl,
                step,
                event_for_attempts.clone(),
                context_for_attempts.clone(),
                caller_id,
                hb,
            )
        })
        .await?;

        context = outcome.context;
        completed_steps.push(event.event_type.clone());
        let _ = progress_tx.send(WorkflowProgress {
            completed_steps: completed_steps.clone(),
            current_step: current_step.clone(),
            total_steps,
        });

        current_event = outcome.next_event;
    }

    // Cancellation observed at a loop boundary wins over any result.
    if *cancel_rx.borrow() {
        tracing::info!(workflow = %request.definition_id, "Workflow was cancelled");
        return Err(EngineError::Cancelled);
    }

    Ok(current_event.map(|event| event.data).unwrap_or(Value::Null))
}
