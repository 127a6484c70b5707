use crate::registry::ToolRegistry;
use crate::structured::StructuredOutputAgent;
use async_trait::async_trait;
use relaycore::{
    AgentCapability, AgentSpec, AgentStore, EngineError, LlmService, ToolCapability,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Resolves declared tool and agent names into live capabilities for one
/// workflow run.
///
/// Resolution is cached per (name, caller) for the lifetime of the resolver,
/// which the runtimes create once per run. Resolving an agent spec also
/// persists the (definition, spec name) linkage on first use; the store
/// contract keeps that idempotent under races.
pub struct CapabilityResolver {
    registry: Arc<ToolRegistry>,
    store: Arc<dyn AgentStore>,
    llm: Arc<dyn LlmService>,
    tool_cache: Mutex<HashMap<(String, Option<String>), Arc<dyn ToolCapability>>>,
    agent_cache: Mutex<HashMap<String, Arc<dyn AgentCapability>>>,
}

impl CapabilityResolver {
    pub fn new(
        registry: Arc<ToolRegistry>,
        store: Arc<dyn AgentStore>,
        llm: Arc<dyn LlmService>,
    ) -> Self {
        Self {
            registry,
            store,
            llm,
            tool_cache: Mutex::new(HashMap::new()),
            agent_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve tool names into capabilities. Fails with `ToolNotFound` for
    /// names missing from the registry.
    pub async fn resolve_tools(
        &self,
        names: &[String],
        caller_id: Option<&str>,
    ) -> Result<HashMap<String, Arc<dyn ToolCapability>>, EngineError> {
        let mut resolved = HashMap::new();

        for name in names {
            let key = (name.clone(), caller_id.map(str::to_string));
            let cached = self.tool_cache.lock().unwrap().get(&key).cloned();
            let tool = match cached {
                Some(tool) => tool,
                None => {
                    let tool = self.registry.find_tool_by_name(name, caller_id)?;
                    self.tool_cache
                        .lock()
                        .unwrap()
                        .insert(key, Arc::clone(&tool));
                    tool
                }
            };
            resolved.insert(name.clone(), tool);
        }

        tracing::debug!("Resolved {} tools", resolved.len());
        Ok(resolved)
    }

    /// Resolve agent specs into capabilities, persisting the definition
    /// linkage on first use.
    pub async fn resolve_agents(
        &self,
        specs: &[AgentSpec],
        definition_id: &str,
        caller_id: Option<&str>,
    ) -> Result<HashMap<String, Arc<dyn AgentCapability>>, EngineError> {
        let mut resolved = HashMap::new();

        for spec in specs {
            let cached = self.agent_cache.lock().unwrap().get(&spec.name).cloned();
            let agent = match cached {
                Some(agent) => agent,
                None => {
                    self.persist_linkage(definition_id, spec).await?;
                    let agent = self.materialize(spec, caller_id);
                    self.agent_cache
                        .lock()
                        .unwrap()
                        .insert(spec.name.clone(), Arc::clone(&agent));
                    agent
                }
            };
            resolved.insert(spec.name.clone(), agent);
        }

        tracing::debug!("Resolved {} agents", resolved.len());
        Ok(resolved)
    }

    /// Resolve exactly the capabilities one step references, by literal name
    /// presence in its handler text. Unreferenced declarations stay
    /// unresolved and unpaid for.
    #[allow(clippy::type_complexity)]
    pub async fn resolve_for_step(
        &self,
        definition: &relaycore::WorkflowDefinition,
        step: &relaycore::StepDecl,
        caller_id: Option<&str>,
    ) -> Result<
        (
            HashMap<String, Arc<dyn ToolCapability>>,
            HashMap<String, Arc<dyn AgentCapability>>,
        ),
        EngineError,
    > {
        let tool_names: Vec<String> = definition
            .tools
            .iter()
            .filter(|name| step.references(name))
            .cloned()
            .collect();
        let agent_specs: Vec<AgentSpec> = definition
            .agents
            .iter()
            .filter(|agent| step.references(&agent.name))
            .cloned()
            .collect();

        let tools = self.resolve_tools(&tool_names, caller_id).await?;
        let agents = self
            .resolve_agents(&agent_specs, &definition.id, caller_id)
            .await?;
        Ok((tools, agents))
    }

    /// Check-then-create; a concurrent create surfacing "already exists" from
    /// the store counts as success.
    async fn persist_linkage(
        &self,
        definition_id: &str,
        spec: &AgentSpec,
    ) -> Result<(), EngineError> {
        if self
            .store
            .find_linked_agent(definition_id, &spec.name)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let agent_id = self.store.create_linked_agent(definition_id, spec).await?;
        tracing::info!(
            "Created workflow agent: {} ({})",
            spec.name,
            agent_id
        );
        Ok(())
    }

    fn materialize(&self, spec: &AgentSpec, caller_id: Option<&str>) -> Arc<dyn AgentCapability> {
        let agent: Arc<dyn AgentCapability> = Arc::new(LlmAgent {
            name: spec.name.clone(),
            prompt: compose_prompt(spec),
            tools: spec.tools.clone(),
            caller_id: caller_id.map(str::to_string),
            llm: Arc::clone(&self.llm),
        });

        if spec.output.is_empty() {
            agent
        } else {
            Arc::new(StructuredOutputAgent::new(
                agent,
                spec.output.clone(),
                Arc::clone(&self.llm),
            ))
        }
    }
}

/// Effective prompt of a materialized agent: the base prompt, plus a strict
/// JSON-structure instruction when an output shape is declared.
fn compose_prompt(spec: &AgentSpec) -> String {
    if spec.output.is_empty() {
        return spec.prompt.clone();
    }
    format!(
        "{}\nAlways respond with exactly the following JSON structure, with no other commentary.\n{}",
        spec.prompt,
        serde_json::to_string_pretty(&spec.output).unwrap_or_default()
    )
}

/// Agent capability backed by the LLM invocation service.
struct LlmAgent {
    name: String,
    prompt: String,
    tools: Vec<String>,
    caller_id: Option<String>,
    llm: Arc<dyn LlmService>,
}

#[async_trait]
impl AgentCapability for LlmAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, input: &str) -> Result<String, EngineError> {
        let prompt = format!("{}\n\n{}", self.prompt, input);
        self.llm
            .invoke(&prompt, &self.tools, self.caller_id.as_deref())
            .await
    }
}

/// In-memory agent store. The production deployment fronts a database; this
/// implementation backs tests and the demo CLI.
#[derive(Default)]
pub struct InMemoryAgentStore {
    records: Mutex<HashMap<(String, String), StoredAgent>>,
}

#[derive(Clone)]
struct StoredAgent {
    id: String,
    #[allow(dead_code)]
    prompt: String,
}

impl InMemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persistent records linked to a definition.
    pub fn linked_count(&self, definition_id: &str) -> usize {
        self.records
            .lock()
            .unwrap()
            .keys()
            .filter(|(def, _)| def == definition_id)
            .count()
    }
}

#[async_trait]
impl AgentStore for InMemoryAgentStore {
    async fn find_linked_agent(
        &self,
        definition_id: &str,
        spec_name: &str,
    ) -> Result<Option<String>, EngineError> {
        let records = self.records.lock().unwrap();
        Ok(records
            .get(&(definition_id.to_string(), spec_name.to_string()))
            .map(|record| record.id.clone()))
    }

    async fn create_linked_agent(
        &self,
        definition_id: &str,
        spec: &AgentSpec,
    ) -> Result<String, EngineError> {
        let mut records = self.records.lock().unwrap();
        let key = (definition_id.to_string(), spec.name.clone());
        // Create-if-absent: racing callers both see the surviving record.
        let record = records.entry(key).or_insert_with(|| StoredAgent {
            id: format!("{}_{}_{}", definition_id, spec.name, Uuid::new_v4()),
            prompt: spec.prompt.clone(),
        });
        Ok(record.id.clone())
    }
}
