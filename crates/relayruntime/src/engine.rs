use crate::interpreter::StepInterpreter;
use crate::registry::ToolRegistry;
use crate::resolver::CapabilityResolver;
use crate::HandlerRegistry;
use relaycore::{
    AgentStore, EngineError, EventBus, InstanceId, LlmService, WorkflowDefinition, WorkflowEvent,
    DEFAULT_REQUIRE_TIMEOUT,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;

/// Configuration for the in-process runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub event_buffer_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1024,
        }
    }
}

/// In-process workflow runtime: runs one instance to completion on a shared
/// event bus within this process.
///
/// Different instances on the same bus interleave freely; instance-id
/// scoping keeps them isolated. Within one instance, events are processed
/// one at a time in publish order.
pub struct InProcessRuntime {
    bus: Arc<EventBus>,
    interpreter: Arc<StepInterpreter>,
    registry: Arc<ToolRegistry>,
    store: Arc<dyn AgentStore>,
    llm: Arc<dyn LlmService>,
    definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
}

impl InProcessRuntime {
    pub fn new(
        handlers: Arc<HandlerRegistry>,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn AgentStore>,
        llm: Arc<dyn LlmService>,
    ) -> Self {
        Self::with_config(handlers, registry, store, llm, RuntimeConfig::default())
    }

    pub fn with_config(
        handlers: Arc<HandlerRegistry>,
        registry: Arc<ToolRegistry>,
        store: Arc<dyn AgentStore>,
        llm: Arc<dyn LlmService>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            bus: Arc::new(EventBus::new(config.event_buffer_size)),
            interpreter: Arc::new(StepInterpreter::new(handlers)),
            registry,
            store,
            llm,
            definitions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a workflow definition for execution by id
    pub async fn register_definition(&self, definition: WorkflowDefinition) {
        let mut definitions = self.definitions.write().await;
        definitions.insert(definition.id.clone(), Arc::new(definition));
    }

    /// Execute a registered definition by id
    pub async fn execute_by_id(
        &self,
        definition_id: &str,
        input: Value,
        caller_id: Option<&str>,
    ) -> Result<Value, EngineError> {
        let definition = {
            let definitions = self.definitions.read().await;
            definitions
                .get(definition_id)
                .cloned()
                .ok_or_else(|| {
                    EngineError::Validation(format!("workflow not found: {}", definition_id))
                })?
        };

        self.instance(definition, caller_id, Value::Object(Default::default()))
            .execute(input)
            .await
    }

    /// Execute a definition directly (without registration)
    pub async fn execute(
        &self,
        definition: WorkflowDefinition,
        input: Value,
        caller_id: Option<&str>,
    ) -> Result<Value, EngineError> {
        self.instance(
            Arc::new(definition),
            caller_id,
            Value::Object(Default::default()),
        )
        .execute(input)
        .await
    }

    /// Create a workflow instance with an initial execution context.
    ///
    /// Each instance gets a fresh per-run capability resolver, so resolution
    /// caching never leaks across runs.
    pub fn instance(
        &self,
        definition: Arc<WorkflowDefinition>,
        caller_id: Option<&str>,
        initial_context: Value,
    ) -> WorkflowInstance {
        WorkflowInstance {
            instance_id: InstanceId::new_v4(),
            definition,
            bus: Arc::clone(&self.bus),
            interpreter: Arc::clone(&self.interpreter),
            resolver: Arc::new(CapabilityResolver::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.store),
                Arc::clone(&self.llm),
            )),
            caller_id: caller_id.map(str::to_string),
            context: Arc::new(AsyncMutex::new(initial_context)),
            error_slot: Arc::new(Mutex::new(None)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe to the shared event bus
    pub fn subscribe_events(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }
}

/// One running workflow on the in-process engine.
///
/// Lifecycle: created, `execute` drives it to completion, and teardown
/// releases every subscription. After teardown no further events are
/// dispatched to this instance.
pub struct WorkflowInstance {
    instance_id: InstanceId,
    definition: Arc<WorkflowDefinition>,
    bus: Arc<EventBus>,
    interpreter: Arc<StepInterpreter>,
    resolver: Arc<CapabilityResolver>,
    caller_id: Option<String>,
    context: Arc<AsyncMutex<Value>>,
    error_slot: Arc<Mutex<Option<EngineError>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkflowInstance {
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Run the workflow: publish `WORKFLOW_START` carrying `input` and
    /// resolve with the data of this instance's `WORKFLOW_STOP`.
    ///
    /// A step handler failure makes the runtime synthesize a stop event
    /// carrying the error before the future rejects with it.
    pub async fn execute(&self, input: Value) -> Result<Value, EngineError> {
        self.definition.validate()?;
        self.definition.validate_input(&input)?;

        // Subscribe before anything is published so no event can be missed.
        let mut stop_rx = self.bus.subscribe();

        for step in &self.definition.steps {
            self.register_step(step.clone());
        }

        tracing::info!(
            workflow = %self.definition.id,
            instance = %self.instance_id,
            "Starting workflow execution"
        );
        self.bus
            .publish(WorkflowEvent::start(input).scoped(self.instance_id));

        let result = loop {
            match stop_rx.recv().await {
                Ok(event)
                    if event.is_stop() && event.instance_id == Some(self.instance_id) =>
                {
                    let error = self.error_slot.lock().unwrap().take();
                    break match error {
                        Some(err) => Err(err),
                        None => Ok(event.data),
                    };
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "stop listener lagged behind the bus");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break Err(EngineError::Transient("event bus closed".to_string()));
                }
            }
        };

        self.destroy();
        result
    }

    /// Block-wait for a specific future event within this instance, racing
    /// the wait against a timer. Used for request/response style step
    /// coordination.
    pub async fn require_event(
        &self,
        event_type: &str,
        wait: Option<Duration>,
    ) -> Result<WorkflowEvent, EngineError> {
        self.bus
            .require_event(
                event_type,
                self.instance_id,
                wait.unwrap_or(DEFAULT_REQUIRE_TIMEOUT),
            )
            .await
    }

    /// Forced teardown: release every subscription held by this instance.
    pub fn destroy(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
    }

    /// Subscribe the step to (event type, this instance) on the shared bus.
    /// On match the saved context is restored, the step runs, and any next
    /// event is republished under the same instance.
    fn register_step(&self, step: relaycore::StepDecl) {
        let instance_id = self.instance_id;
        let definition = Arc::clone(&self.definition);
        let bus = Arc::clone(&self.bus);
        let interpreter = Arc::clone(&self.interpreter);
        let resolver = Arc::clone(&self.resolver);
        let context = Arc::clone(&self.context);
        let error_slot = Arc::clone(&self.error_slot);
        let caller_id = self.caller_id.clone();
        let mut rx = self.bus.subscribe();

        let task = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event)
                        if event.event_type == step.event_type
                            && event.instance_id == Some(instance_id) =>
                    {
                        event
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "step subscription lagged behind the bus");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let outcome = {
                    let mut saved = context.lock().await;
                    let result = run_step(
                        &definition,
                        &step,
                        event,
                        saved.clone(),
                        &resolver,
                        &interpreter,
                        caller_id.as_deref(),
                    )
                    .await;
                    match result {
                        Ok(outcome) => {
                            *saved = outcome.context;
                            Ok(outcome.next_event)
                        }
                        Err(err) => Err(err),
                    }
                };

                match outcome {
                    Ok(Some(next)) => bus.publish(next.scoped(instance_id)),
                    // No next event: implicit terminal stop with no output.
                    Ok(None) => bus.publish(WorkflowEvent::stop(Value::Null).scoped(instance_id)),
                    Err(err) => {
                        tracing::error!(
                            instance = %instance_id,
                            "Error in workflow instance: {}",
                            err
                        );
                        let stop = WorkflowEvent::stop(
                            serde_json::json!({ "error": err.to_string() }),
                        );
                        *error_slot.lock().unwrap() = Some(err);
                        bus.publish(stop.scoped(instance_id));
                    }
                }
            }
        });

        self.tasks.lock().unwrap().push(task);
    }
}

impl Drop for WorkflowInstance {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Resolve the capabilities this step references, then run it through the
/// interpreter. Resolution is lazy: names absent from the handler text are
/// never resolved.
async fn run_step(
    definition: &WorkflowDefinition,
    step: &relaycore::StepDecl,
    event: WorkflowEvent,
    context: Value,
    resolver: &CapabilityResolver,
    interpreter: &StepInterpreter,
    caller_id: Option<&str>,
) -> Result<crate::interpreter::StepOutcome, EngineError> {
    let (tools, agents) = resolver
        .resolve_for_step(definition, step, caller_id)
        .await?;

    interpreter
        .execute_step(&definition.id, step, event, context, &tools, &agents)
        .await
}
