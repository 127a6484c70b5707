//! Workflow execution runtime
//!
//! This crate turns workflow definitions into running instances: it resolves
//! declared tools and agents into live capabilities, interprets steps, and
//! drives whole workflows to completion on an in-process event bus.

mod engine;
mod interpreter;
mod registry;
mod resolver;
mod structured;

pub use engine::{InProcessRuntime, RuntimeConfig, WorkflowInstance};
pub use interpreter::{
    handler_fn, HandlerRegistry, StepCapabilities, StepHandler, StepInterpreter, StepOutcome,
};
pub use registry::{ParamDefinition, ToolFactory, ToolMetadata, ToolRegistry};
pub use resolver::{CapabilityResolver, InMemoryAgentStore};
pub use structured::{strip_markdown_fences, StructuredOutputAgent};
