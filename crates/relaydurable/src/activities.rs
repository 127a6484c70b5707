use crate::activity::Heartbeat;
use relaycore::{
    AgentSpec, AgentStore, EngineError, LlmService, StepDecl, WorkflowDefinition, WorkflowEvent,
};
use relayruntime::{CapabilityResolver, HandlerRegistry, StepInterpreter, StepOutcome, ToolRegistry};
use serde_json::Value;
use std::sync::Arc;

/// Services an activity worker needs. Shared across runs; cheap to clone.
#[derive(Clone)]
pub struct WorkerDeps {
    pub registry: Arc<ToolRegistry>,
    pub store: Arc<dyn AgentStore>,
    pub llm: Arc<dyn LlmService>,
    pub handlers: Arc<HandlerRegistry>,
}

/// The three retryable units of work the orchestration loop dispatches.
///
/// One instance per workflow run: the embedded resolver caches capability
/// resolution for the run and never shares it across runs.
pub struct Activities {
    resolver: CapabilityResolver,
    interpreter: StepInterpreter,
}

impl Activities {
    pub fn new(deps: &WorkerDeps) -> Self {
        Self {
            resolver: CapabilityResolver::new(
                Arc::clone(&deps.registry),
                Arc::clone(&deps.store),
                Arc::clone(&deps.llm),
            ),
            interpreter: StepInterpreter::new(Arc::clone(&deps.handlers)),
        }
    }

    /// Validate every declared tool against the registry, returning the
    /// resolved names.
    pub async fn resolve_tools(
        &self,
        tool_names: &[String],
        caller_id: Option<&str>,
    ) -> Result<Vec<String>, EngineError> {
        let resolved = self.resolver.resolve_tools(tool_names, caller_id).await?;
        tracing::info!("Resolved {} tools", resolved.len());
        Ok(tool_names.to_vec())
    }

    /// Resolve declared agents, persisting the definition linkage on first
    /// use. Returns the resolved agent names.
    pub async fn resolve_agents(
        &self,
        specs: &[AgentSpec],
        definition_id: &str,
        caller_id: Option<&str>,
    ) -> Result<Vec<String>, EngineError> {
        let resolved = self
            .resolver
            .resolve_agents(specs, definition_id, caller_id)
            .await?;
        tracing::info!("Resolved {} agents", resolved.len());
        Ok(specs.iter().map(|spec| spec.name.clone()).collect())
    }

    /// Execute one DSL step: resolve the capabilities its handler text
    /// references, run the compiled handler, and return the next event plus
    /// the updated context.
    pub async fn execute_step(
        &self,
        definition: &WorkflowDefinition,
        step: &StepDecl,
        event: WorkflowEvent,
        context: Value,
        caller_id: Option<&str>,
        heartbeat: Heartbeat,
    ) -> Result<StepOutcome, EngineError> {
        heartbeat.record();
        let (tools, agents) = self
            .resolver
            .resolve_for_step(definition, step, caller_id)
            .await?;
        heartbeat.record();

        let outcome = self
            .interpreter
            .execute_step(&definition.id, step, event, context, &tools, &agents)
            .await?;
        heartbeat.record();
        Ok(outcome)
    }
}
