use crate::error::EngineError;
use crate::event::WORKFLOW_START;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Complete workflow definition: declared tools, agents, events and steps.
///
/// Definitions are pure data. They are authored (or generated) once, stored
/// with a version, and read-only at execution time. The runtimes interpret
/// them; they carry no behavior themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub version: String,
    /// Tool names available to step handlers, in declaration order.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub agents: Vec<AgentSpec>,
    #[serde(default)]
    pub events: Vec<EventDecl>,
    #[serde(default)]
    pub steps: Vec<StepDecl>,
}

impl WorkflowDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            version: "v1".to_string(),
            tools: Vec::new(),
            agents: Vec::new(),
            events: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>) -> Self {
        self.tools.push(name.into());
        self
    }

    pub fn with_agent(mut self, agent: AgentSpec) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn with_event(mut self, event: EventDecl) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_step(mut self, step: StepDecl) -> Self {
        self.steps.push(step);
        self
    }

    pub fn find_step(&self, event_type: &str) -> Option<&StepDecl> {
        self.steps.iter().find(|s| s.event_type == event_type)
    }

    /// Build the event-type to step mapping used by both runtimes.
    pub fn step_map(&self) -> HashMap<&str, &StepDecl> {
        self.steps
            .iter()
            .map(|s| (s.event_type.as_str(), s))
            .collect()
    }

    /// Input schema of the workflow: the declared data shape of the
    /// `WORKFLOW_START` event, empty if none was declared.
    pub fn input_schema(&self) -> BTreeMap<String, String> {
        self.events
            .iter()
            .find(|e| e.event_type == WORKFLOW_START)
            .and_then(|e| e.data_shape.clone())
            .unwrap_or_default()
    }

    /// Check structural invariants of the definition.
    ///
    /// Rejects duplicate step keys, steps bound to undeclared events, agents
    /// referencing undeclared tools, and a definition with steps but no
    /// handler for `WORKFLOW_START`.
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.event_type.as_str()) {
                return Err(EngineError::Validation(format!(
                    "duplicate step for event: {}",
                    step.event_type
                )));
            }
        }

        let declared: HashSet<&str> = self.events.iter().map(|e| e.event_type.as_str()).collect();
        if !declared.is_empty() {
            for step in &self.steps {
                if !declared.contains(step.event_type.as_str()) {
                    return Err(EngineError::Validation(format!(
                        "step bound to undeclared event: {}",
                        step.event_type
                    )));
                }
            }
        }

        let tools: HashSet<&str> = self.tools.iter().map(|t| t.as_str()).collect();
        for agent in &self.agents {
            for tool in &agent.tools {
                if !tools.contains(tool.as_str()) {
                    return Err(EngineError::Validation(format!(
                        "agent {} references undeclared tool: {}",
                        agent.name, tool
                    )));
                }
            }
        }

        if !self.steps.is_empty() && self.find_step(WORKFLOW_START).is_none() {
            return Err(EngineError::Validation(
                "no step handler for WORKFLOW_START".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate run input against the workflow's input schema.
    ///
    /// Every field declared on the `WORKFLOW_START` event must be present in
    /// the input object. Extra fields pass through untouched.
    pub fn validate_input(&self, input: &Value) -> Result<(), EngineError> {
        let schema = self.input_schema();
        if schema.is_empty() {
            return Ok(());
        }

        let missing: Vec<&str> = schema
            .keys()
            .filter(|key| input.get(key.as_str()).is_none())
            .map(|key| key.as_str())
            .collect();

        if !missing.is_empty() {
            return Err(EngineError::Validation(format!(
                "input is missing required fields: {} (expected schema: {})",
                missing.join(", "),
                serde_json::to_string(&schema).unwrap_or_default()
            )));
        }

        Ok(())
    }
}

/// Agent declared inside a workflow definition.
///
/// Materialized into an invocable agent capability per execution, bound to
/// its prompt and its own tool subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub prompt: String,
    /// Expected output shape: field name to declared scalar type. Empty means
    /// free text output.
    #[serde(default)]
    pub output: BTreeMap<String, String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_bases: Option<Vec<String>>,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            prompt: prompt.into(),
            output: BTreeMap::new(),
            tools: Vec::new(),
            knowledge_bases: None,
        }
    }

    pub fn with_output_field(
        mut self,
        field: impl Into<String>,
        field_type: impl Into<String>,
    ) -> Self {
        self.output.insert(field.into(), field_type.into());
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>) -> Self {
        self.tools.push(name.into());
        self
    }
}

/// Event type declared by a workflow, with an optional data shape.
///
/// The `WORKFLOW_START` declaration's shape doubles as the workflow's input
/// schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDecl {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_shape: Option<BTreeMap<String, String>>,
}

impl EventDecl {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data_shape: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, field_type: impl Into<String>) -> Self {
        let shape = self.data_shape.get_or_insert_with(BTreeMap::new);
        shape.insert(field.into(), field_type.into());
        self
    }
}

/// Step bound to one event type.
///
/// `handler_text` is the stored, versioned source of the handler body. The
/// compiled handler is looked up separately; the text stays authoritative
/// for which tool and agent names the step references (literal presence).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDecl {
    #[serde(rename = "event")]
    pub event_type: String,
    #[serde(rename = "handle")]
    pub handler_text: String,
}

impl StepDecl {
    pub fn new(event_type: impl Into<String>, handler_text: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            handler_text: handler_text.into(),
        }
    }

    /// Whether the handler body textually references a capability name.
    /// Capabilities a step never mentions are not resolved for it.
    pub fn references(&self, name: &str) -> bool {
        self.handler_text.contains(name)
    }
}
