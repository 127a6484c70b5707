use relaycore::{
    AgentSpec, EngineError, EventDecl, LlmService, StepDecl, WorkflowDefinition, WorkflowEvent,
    WORKFLOW_START, WORKFLOW_STOP,
};
use relaydurable::{DurableClient, ExecutionStatus, StartWorkflowParams, WorkerDeps, MAX_ITERATIONS};
use relayruntime::{
    handler_fn, HandlerRegistry, InMemoryAgentStore, StepOutcome, ToolRegistry,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Initialize tracing for tests
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

struct NullLlm;

#[async_trait::async_trait]
impl LlmService for NullLlm {
    async fn invoke(
        &self,
        _prompt: &str,
        _tool_names: &[String],
        _caller_id: Option<&str>,
    ) -> Result<String, EngineError> {
        Ok("ok".to_string())
    }

    async fn extract_to_shape(
        &self,
        text: &str,
        _shape: &BTreeMap<String, String>,
    ) -> Result<Value, relaycore::ExtractError> {
        serde_json::from_str(text).map_err(|e| relaycore::ExtractError::Malformed(e.to_string()))
    }
}

fn deps_with(handlers: Arc<HandlerRegistry>, store: Arc<InMemoryAgentStore>) -> WorkerDeps {
    WorkerDeps {
        registry: Arc::new(ToolRegistry::new()),
        store,
        llm: Arc::new(NullLlm),
        handlers,
    }
}

fn params(definition: WorkflowDefinition, input: Value) -> StartWorkflowParams {
    StartWorkflowParams {
        definition_id: definition.id.clone(),
        dsl: definition,
        input,
        caller_id: None,
        context: Value::Object(Default::default()),
    }
}

fn doubling_definition() -> WorkflowDefinition {
    WorkflowDefinition::new("wf-double", "doubling")
        .with_event(EventDecl::new(WORKFLOW_START).with_field("x", "number"))
        .with_event(EventDecl::new("A"))
        .with_event(EventDecl::new(WORKFLOW_STOP))
        .with_step(StepDecl::new(WORKFLOW_START, "forward to A"))
        .with_step(StepDecl::new("A", "double x and stop"))
}

fn register_doubling_handlers(handlers: &HandlerRegistry) {
    handlers.register(
        "wf-double",
        WORKFLOW_START,
        handler_fn(|event, context, _caps| async move {
            Ok(StepOutcome::next(
                WorkflowEvent::new("A", event.data),
                context,
            ))
        }),
    );
    handlers.register(
        "wf-double",
        "A",
        handler_fn(|event, context, _caps| async move {
            let x = event.data["x"].as_i64().unwrap_or(0);
            Ok(StepOutcome::next(
                WorkflowEvent::stop(json!({ "result": x * 2 })),
                context,
            ))
        }),
    );
}

#[tokio::test]
async fn durable_run_doubles_input() {
    init_tracing();

    let handlers = Arc::new(HandlerRegistry::new());
    register_doubling_handlers(&handlers);
    let client = DurableClient::new(deps_with(handlers, Arc::new(InMemoryAgentStore::new())));

    let started = client
        .start(params(doubling_definition(), json!({ "x": 21 })))
        .unwrap();
    let output = client
        .wait_result(&started.durable_execution_id)
        .await
        .unwrap();

    assert_eq!(output["result"], json!(42));

    let info = client.status(&started.durable_execution_id).unwrap();
    assert_eq!(info.status, ExecutionStatus::Completed);
    assert!(info.close_time.is_some());
}

#[tokio::test]
async fn start_rejects_missing_input_fields() {
    init_tracing();

    let handlers = Arc::new(HandlerRegistry::new());
    register_doubling_handlers(&handlers);
    let client = DurableClient::new(deps_with(handlers, Arc::new(InMemoryAgentStore::new())));

    let err = client
        .start(params(doubling_definition(), json!({})))
        .unwrap_err();
    assert_eq!(err.kind(), relaycore::ErrorKind::Validation);
}

#[tokio::test]
async fn result_before_completion_is_an_error() {
    init_tracing();

    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register(
        "wf-slow",
        WORKFLOW_START,
        handler_fn(|_event, context, _caps| async move {
            sleep(Duration::from_millis(300)).await;
            Ok(StepOutcome::next(WorkflowEvent::stop(json!("done")), context))
        }),
    );
    let client = DurableClient::new(deps_with(handlers, Arc::new(InMemoryAgentStore::new())));

    let definition = WorkflowDefinition::new("wf-slow", "slow")
        .with_step(StepDecl::new(WORKFLOW_START, "sleep then stop"));
    let started = client.start(params(definition, json!({}))).unwrap();

    let err = client.result(&started.durable_execution_id).unwrap_err();
    assert!(err.to_string().contains("has not completed"));

    let output = client
        .wait_result(&started.durable_execution_id)
        .await
        .unwrap();
    assert_eq!(output, json!("done"));
}

#[tokio::test]
async fn cancellation_lets_the_running_step_finish() {
    init_tracing();

    let first_runs = Arc::new(AtomicU32::new(0));
    let second_runs = Arc::new(AtomicU32::new(0));

    let handlers = Arc::new(HandlerRegistry::new());
    {
        let first_runs = Arc::clone(&first_runs);
        handlers.register(
            "wf-cancel",
            WORKFLOW_START,
            handler_fn(move |_event, context, _caps| {
                let first_runs = Arc::clone(&first_runs);
                async move {
                    first_runs.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(300)).await;
                    Ok(StepOutcome::next(
                        WorkflowEvent::new("NEXT", Value::Null),
                        context,
                    ))
                }
            }),
        );
    }
    {
        let second_runs = Arc::clone(&second_runs);
        handlers.register(
            "wf-cancel",
            "NEXT",
            handler_fn(move |_event, context, _caps| {
                let second_runs = Arc::clone(&second_runs);
                async move {
                    second_runs.fetch_add(1, Ordering::SeqCst);
                    Ok(StepOutcome::next(WorkflowEvent::stop(Value::Null), context))
                }
            }),
        );
    }

    let client = DurableClient::new(deps_with(handlers, Arc::new(InMemoryAgentStore::new())));
    let definition = WorkflowDefinition::new("wf-cancel", "cancellable")
        .with_step(StepDecl::new(WORKFLOW_START, "slow first step"))
        .with_step(StepDecl::new("NEXT", "never reached after cancel"));

    let started = client.start(params(definition, json!({}))).unwrap();

    // Let the first step get in flight, then cancel while it is running.
    sleep(Duration::from_millis(100)).await;
    client.cancel(&started.durable_execution_id).unwrap();

    let err = client
        .wait_result(&started.durable_execution_id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), relaycore::ErrorKind::Cancelled);

    // The in-flight step ran to completion; the next one never started.
    assert_eq!(first_runs.load(Ordering::SeqCst), 1);
    assert_eq!(second_runs.load(Ordering::SeqCst), 0);

    let info = client.status(&started.durable_execution_id).unwrap();
    assert_eq!(info.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn cyclic_dsl_stops_after_exactly_max_iterations() {
    init_tracing();

    let executions = Arc::new(AtomicU32::new(0));
    let handlers = Arc::new(HandlerRegistry::new());
    for event_type in [WORKFLOW_START, "LOOP"] {
        let executions = Arc::clone(&executions);
        handlers.register(
            "wf-cycle",
            event_type,
            handler_fn(move |_event, context, _caps| {
                let executions = Arc::clone(&executions);
                async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok(StepOutcome::next(
                        WorkflowEvent::new("LOOP", Value::Null),
                        context,
                    ))
                }
            }),
        );
    }

    let client = DurableClient::new(deps_with(handlers, Arc::new(InMemoryAgentStore::new())));
    let definition = WorkflowDefinition::new("wf-cycle", "endless")
        .with_step(StepDecl::new(WORKFLOW_START, "into the loop"))
        .with_step(StepDecl::new("LOOP", "around again"));

    let started = client.start(params(definition, json!({}))).unwrap();
    let err = client
        .wait_result(&started.durable_execution_id)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), relaycore::ErrorKind::MaxIterationsExceeded);
    assert_eq!(executions.load(Ordering::SeqCst), MAX_ITERATIONS);
}

#[tokio::test]
async fn missing_step_fails_without_retry() {
    init_tracing();

    let runs = Arc::new(AtomicU32::new(0));
    let handlers = Arc::new(HandlerRegistry::new());
    {
        let runs = Arc::clone(&runs);
        handlers.register(
            "wf-gap",
            WORKFLOW_START,
            handler_fn(move |_event, context, _caps| {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(StepOutcome::next(
                        WorkflowEvent::new("UNMAPPED", Value::Null),
                        context,
                    ))
                }
            }),
        );
    }

    let client = DurableClient::new(deps_with(handlers, Arc::new(InMemoryAgentStore::new())));
    let definition = WorkflowDefinition::new("wf-gap", "missing handler")
        .with_step(StepDecl::new(WORKFLOW_START, "emit unmapped event"));

    let started = client.start(params(definition, json!({}))).unwrap();
    let err = client
        .wait_result(&started.durable_execution_id)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), relaycore::ErrorKind::Validation);
    assert!(err.to_string().contains("UNMAPPED"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let info = client.status(&started.durable_execution_id).unwrap();
    assert_eq!(info.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn non_retryable_step_failures_run_once() {
    init_tracing();

    let attempts = Arc::new(AtomicU32::new(0));
    let handlers = Arc::new(HandlerRegistry::new());
    {
        let attempts = Arc::clone(&attempts);
        handlers.register(
            "wf-notfound",
            WORKFLOW_START,
            handler_fn(move |_event, _context, _caps| {
                let attempts = Arc::clone(&attempts);
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(EngineError::ToolNotFound("searchWeb".to_string()))
                }
            }),
        );
    }

    let client = DurableClient::new(deps_with(handlers, Arc::new(InMemoryAgentStore::new())));
    let definition = WorkflowDefinition::new("wf-notfound", "bad tool ref")
        .with_step(StepDecl::new(WORKFLOW_START, "call a ghost tool"));

    let started = client.start(params(definition, json!({}))).unwrap();
    let err = client
        .wait_result(&started.durable_execution_id)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), relaycore::ErrorKind::ToolNotFound);
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transient_step_failures_are_retried() {
    init_tracing();

    let attempts = Arc::new(AtomicU32::new(0));
    let handlers = Arc::new(HandlerRegistry::new());
    {
        let attempts = Arc::clone(&attempts);
        handlers.register(
            "wf-flaky",
            WORKFLOW_START,
            handler_fn(move |_event, context, _caps| {
                let attempts = Arc::clone(&attempts);
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(EngineError::Transient("first attempt fails".to_string()))
                    } else {
                        Ok(StepOutcome::next(
                            WorkflowEvent::stop(json!("recovered")),
                            context,
                        ))
                    }
                }
            }),
        );
    }

    let client = DurableClient::new(deps_with(handlers, Arc::new(InMemoryAgentStore::new())));
    let definition = WorkflowDefinition::new("wf-flaky", "flaky step")
        .with_step(StepDecl::new(WORKFLOW_START, "fails once"));

    let started = client.start(params(definition, json!({}))).unwrap();
    let output = client
        .wait_result(&started.durable_execution_id)
        .await
        .unwrap();

    assert_eq!(output, json!("recovered"));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn agent_linkage_persists_once_across_runs() {
    init_tracing();

    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register(
        "wf-agentic",
        WORKFLOW_START,
        handler_fn(|_event, context, caps| async move {
            let answer = caps.agent("Analyst")?.run("analyze").await?;
            Ok(StepOutcome::next(WorkflowEvent::stop(json!(answer)), context))
        }),
    );

    let agent_store = Arc::new(InMemoryAgentStore::new());
    let client = DurableClient::new(deps_with(handlers, Arc::clone(&agent_store)));

    let definition = WorkflowDefinition::new("wf-agentic", "agentic")
        .with_agent(AgentSpec::new("Analyst", "You analyze."))
        .with_step(StepDecl::new(WORKFLOW_START, "await Analyst.run(...)"));

    for _ in 0..2 {
        let started = client.start(params(definition.clone(), json!({}))).unwrap();
        client
            .wait_result(&started.durable_execution_id)
            .await
            .unwrap();
    }

    assert_eq!(agent_store.linked_count("wf-agentic"), 1);
}

#[tokio::test]
async fn progress_is_queryable_mid_execution() {
    init_tracing();

    let handlers = Arc::new(HandlerRegistry::new());
    handlers.register(
        "wf-progress",
        WORKFLOW_START,
        handler_fn(|_event, context, _caps| async move {
            Ok(StepOutcome::next(
                WorkflowEvent::new("WORK", Value::Null),
                context,
            ))
        }),
    );
    handlers.register(
        "wf-progress",
        "WORK",
        handler_fn(|_event, context, _caps| async move {
            sleep(Duration::from_millis(300)).await;
            Ok(StepOutcome::next(WorkflowEvent::stop(Value::Null), context))
        }),
    );

    let client = DurableClient::new(deps_with(handlers, Arc::new(InMemoryAgentStore::new())));
    let definition = WorkflowDefinition::new("wf-progress", "progress")
        .with_step(StepDecl::new(WORKFLOW_START, "forward"))
        .with_step(StepDecl::new("WORK", "slow work"));

    let started = client.start(params(definition, json!({}))).unwrap();
    sleep(Duration::from_millis(100)).await;

    let progress = client.progress(&started.durable_execution_id).unwrap();
    assert_eq!(progress.current_step, "WORK");
    assert_eq!(progress.completed_steps, vec![WORKFLOW_START.to_string()]);
    assert_eq!(progress.total_steps, 2);

    client
        .wait_result(&started.durable_execution_id)
        .await
        .unwrap();
    let progress = client.progress(&started.durable_execution_id).unwrap();
    assert_eq!(progress.completed_steps.len(), 2);
}
