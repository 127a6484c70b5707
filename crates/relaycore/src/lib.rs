//! Core abstractions for the relay workflow engine
//!
//! This crate provides the DSL data model, the instance-scoped event bus and
//! the capability contracts that both runtimes depend on. It carries no
//! execution logic.

mod bus;
mod capability;
mod dsl;
mod error;
mod event;

pub use bus::{EventBus, DEFAULT_REQUIRE_TIMEOUT};
pub use capability::{AgentCapability, AgentStore, ExtractError, LlmService, ToolCapability};
pub use dsl::{AgentSpec, EventDecl, StepDecl, WorkflowDefinition};
pub use error::{EngineError, ErrorKind};
pub use event::{InstanceId, WorkflowEvent, WORKFLOW_START, WORKFLOW_STOP};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
