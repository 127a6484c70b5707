use async_trait::async_trait;
use futures::future::BoxFuture;
use relaycore::{
    AgentCapability, EngineError, ErrorKind, StepDecl, ToolCapability, WorkflowEvent,
};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

/// Cap on event-data snapshots embedded in step failure diagnostics.
const EVENT_SNAPSHOT_LEN: usize = 200;

/// Capabilities available to one step invocation: exactly the tools and
/// agents the step's handler text references.
#[derive(Clone, Default)]
pub struct StepCapabilities {
    tools: HashMap<String, Arc<dyn ToolCapability>>,
    agents: HashMap<String, Arc<dyn AgentCapability>>,
}

impl StepCapabilities {
    pub fn new(
        tools: HashMap<String, Arc<dyn ToolCapability>>,
        agents: HashMap<String, Arc<dyn AgentCapability>>,
    ) -> Self {
        Self { tools, agents }
    }

    pub fn tool(&self, name: &str) -> Result<Arc<dyn ToolCapability>, EngineError> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))
    }

    pub fn agent(&self, name: &str) -> Result<Arc<dyn AgentCapability>, EngineError> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::AgentNotFound(name.to_string()))
    }
}

/// Result of one step invocation: the next event (if any) and the updated
/// execution context.
#[derive(Debug)]
pub struct StepOutcome {
    pub next_event: Option<WorkflowEvent>,
    pub context: Value,
}

impl StepOutcome {
    pub fn next(event: WorkflowEvent, context: Value) -> Self {
        Self {
            next_event: Some(event),
            context,
        }
    }

    /// Implicit terminal stop with no output.
    pub fn done(context: Value) -> Self {
        Self {
            next_event: None,
            context,
        }
    }
}

/// Compiled body of one step.
///
/// Handler bodies ship as versioned text in the DSL; their compiled form is
/// registered here, keyed by definition and event type. The text stays
/// authoritative for which capability names the step references.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn handle(
        &self,
        event: WorkflowEvent,
        context: Value,
        capabilities: StepCapabilities,
    ) -> Result<StepOutcome, EngineError>;
}

struct FnHandler {
    f: Box<
        dyn Fn(WorkflowEvent, Value, StepCapabilities) -> BoxFuture<'static, Result<StepOutcome, EngineError>>
            + Send
            + Sync,
    >,
}

#[async_trait]
impl StepHandler for FnHandler {
    async fn handle(
        &self,
        event: WorkflowEvent,
        context: Value,
        capabilities: StepCapabilities,
    ) -> Result<StepOutcome, EngineError> {
        (self.f)(event, context, capabilities).await
    }
}

/// Wrap an async closure as a step handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn StepHandler>
where
    F: Fn(WorkflowEvent, Value, StepCapabilities) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StepOutcome, EngineError>> + Send + 'static,
{
    Arc::new(FnHandler {
        f: Box::new(move |event, context, capabilities| {
            Box::pin(f(event, context, capabilities))
        }),
    })
}

/// Registry of compiled step handlers, keyed by (definition id, event type).
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<(String, String), Arc<dyn StepHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        definition_id: impl Into<String>,
        event_type: impl Into<String>,
        handler: Arc<dyn StepHandler>,
    ) {
        let key = (definition_id.into(), event_type.into());
        tracing::debug!("Registering handler: {}/{}", key.0, key.1);
        self.handlers.write().unwrap().insert(key, handler);
    }

    pub fn get(&self, definition_id: &str, event_type: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers
            .read()
            .unwrap()
            .get(&(definition_id.to_string(), event_type.to_string()))
            .cloned()
    }
}

/// Executes one step against one event.
///
/// Capabilities the handler text never mentions are filtered out before the
/// handler runs; unreferenced dependencies stay unresolved and unpaid for.
pub struct StepInterpreter {
    handlers: Arc<HandlerRegistry>,
}

impl StepInterpreter {
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self { handlers }
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub async fn execute_step(
        &self,
        definition_id: &str,
        step: &StepDecl,
        event: WorkflowEvent,
        context: Value,
        tools: &HashMap<String, Arc<dyn ToolCapability>>,
        agents: &HashMap<String, Arc<dyn AgentCapability>>,
    ) -> Result<StepOutcome, EngineError> {
        let handler = self.handlers.get(definition_id, &step.event_type).ok_or_else(|| {
            EngineError::HandlerSyntax {
                definition_id: definition_id.to_string(),
                event_type: step.event_type.clone(),
            }
        })?;

        let referenced_tools: HashMap<_, _> = tools
            .iter()
            .filter(|(name, _)| step.references(name))
            .map(|(name, tool)| (name.clone(), Arc::clone(tool)))
            .collect();
        let referenced_agents: HashMap<_, _> = agents
            .iter()
            .filter(|(name, _)| step.references(name))
            .map(|(name, agent)| (name.clone(), Arc::clone(agent)))
            .collect();

        tracing::info!("Executing step: {}", step.event_type);

        let snapshot = event.data_snapshot(EVENT_SNAPSHOT_LEN);
        let capabilities = StepCapabilities::new(referenced_tools, referenced_agents);

        match handler.handle(event, context, capabilities).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                tracing::error!("Step {} failed: {}", step.event_type, err);
                match err.kind() {
                    // Already-classified terminal kinds pass through so retry
                    // policies see them unchanged.
                    ErrorKind::Validation
                    | ErrorKind::ToolNotFound
                    | ErrorKind::AgentNotFound
                    | ErrorKind::HandlerSyntax
                    | ErrorKind::Cancelled => Err(err),
                    _ => Err(EngineError::StepExecution {
                        event_type: step.event_type.clone(),
                        message: err.to_string(),
                        event_snapshot: snapshot,
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn interpreter_with(
        definition_id: &str,
        event_type: &str,
        handler: Arc<dyn StepHandler>,
    ) -> StepInterpreter {
        let registry = HandlerRegistry::new();
        registry.register(definition_id, event_type, handler);
        StepInterpreter::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn missing_handler_is_a_syntax_error() {
        let interpreter = StepInterpreter::new(Arc::new(HandlerRegistry::new()));
        let step = StepDecl::new("A", "body");
        let err = interpreter
            .execute_step(
                "wf-1",
                &step,
                WorkflowEvent::new("A", json!({})),
                json!({}),
                &HashMap::new(),
                &HashMap::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HandlerSyntax);
    }

    #[tokio::test]
    async fn handler_failures_carry_event_diagnostics() {
        let handler = handler_fn(|_event, _context, _caps| async {
            Err(EngineError::Transient("backend down".to_string()))
        });
        let interpreter = interpreter_with("wf-1", "A", handler);
        let step = StepDecl::new("A", "body");

        let err = interpreter
            .execute_step(
                "wf-1",
                &step,
                WorkflowEvent::new("A", json!({"payload": "z".repeat(400)})),
                json!({}),
                &HashMap::new(),
                &HashMap::new(),
            )
            .await
            .unwrap_err();

        match err {
            EngineError::StepExecution {
                event_type,
                event_snapshot,
                ..
            } => {
                assert_eq!(event_type, "A");
                assert!(event_snapshot.len() <= EVENT_SNAPSHOT_LEN + 3);
            }
            other => panic!("expected StepExecution, got {other}"),
        }
    }

    #[tokio::test]
    async fn unreferenced_capabilities_are_withheld() {
        let handler = handler_fn(|_event, context, caps| async move {
            assert!(caps.tool("used").is_ok());
            assert!(caps.tool("unused").is_err());
            Ok(StepOutcome::done(context))
        });
        let interpreter = interpreter_with("wf-1", "A", handler);
        let step = StepDecl::new("A", "call used here");

        #[derive(Debug)]
        struct Noop(&'static str);
        #[async_trait]
        impl ToolCapability for Noop {
            fn name(&self) -> &str {
                self.0
            }
            async fn invoke(&self, _args: Value) -> Result<Value, EngineError> {
                Ok(Value::Null)
            }
        }

        let tools: HashMap<String, Arc<dyn ToolCapability>> = HashMap::from([
            ("used".to_string(), Arc::new(Noop("used")) as Arc<dyn ToolCapability>),
            ("unused".to_string(), Arc::new(Noop("unused")) as Arc<dyn ToolCapability>),
        ]);

        interpreter
            .execute_step(
                "wf-1",
                &step,
                WorkflowEvent::new("A", json!({})),
                json!({}),
                &tools,
                &HashMap::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn returning_no_event_is_an_implicit_stop() {
        let handler = handler_fn(|_event, context, _caps| async move {
            Ok(StepOutcome::done(context))
        });
        let interpreter = interpreter_with("wf-1", "A", handler);
        let step = StepDecl::new("A", "body");

        let outcome = interpreter
            .execute_step(
                "wf-1",
                &step,
                WorkflowEvent::new("A", json!({})),
                json!({}),
                &HashMap::new(),
                &HashMap::new(),
            )
            .await
            .unwrap();
        assert!(outcome.next_event.is_none());
    }
}
