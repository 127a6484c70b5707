use crate::dsl::AgentSpec;
use crate::error::EngineError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// A named, invocable external-action wrapper.
///
/// Tools are stateless or lightly stateful; resolving the same name twice
/// within one run must yield capabilities with identical invocation
/// behavior.
#[async_trait]
pub trait ToolCapability: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;

    async fn invoke(&self, args: Value) -> Result<Value, EngineError>;
}

/// An LLM-backed invocable bound to a prompt and its own tool subset.
///
/// `run` takes the step's instruction text and returns the agent's textual
/// result. When the owning spec declares an output shape, the structured
/// output adapter wraps this trait and returns serialized JSON instead of
/// free text.
#[async_trait]
pub trait AgentCapability: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, input: &str) -> Result<String, EngineError>;
}

/// Persistence for the `(definition id, agent spec name)` linkage.
///
/// `create_linked_agent` is create-if-absent: concurrent callers racing on
/// the same pair must both observe success and a single stored record.
#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn find_linked_agent(
        &self,
        definition_id: &str,
        spec_name: &str,
    ) -> Result<Option<String>, EngineError>;

    async fn create_linked_agent(
        &self,
        definition_id: &str,
        spec: &AgentSpec,
    ) -> Result<String, EngineError>;
}

/// Raised by `LlmService::extract_to_shape` when the model output cannot be
/// coerced into the requested shape. Distinguishable from transport errors
/// so the structured output adapter can fall back instead of failing.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("output does not match requested shape: {0}")]
    Malformed(String),

    #[error("extraction call failed: {0}")]
    Service(String),
}

/// Contract an LLM invocation backend must satisfy.
#[async_trait]
pub trait LlmService: Send + Sync {
    /// Run a completion with the given prompt and the named tools available.
    async fn invoke(
        &self,
        prompt: &str,
        tool_names: &[String],
        caller_id: Option<&str>,
    ) -> Result<String, EngineError>;

    /// Coerce free text into the declared shape, returning structured JSON.
    async fn extract_to_shape(
        &self,
        text: &str,
        shape: &BTreeMap<String, String>,
    ) -> Result<Value, ExtractError>;
}
