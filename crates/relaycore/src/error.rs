use thiserror::Error;

/// Explicit classification of engine failures.
///
/// Retry decisions consult this enumeration, never error type names or
/// message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed DSL: missing step for an event, bad input, bad definition.
    Validation,
    ToolNotFound,
    AgentNotFound,
    /// Handler body cannot be turned into a callable (no compiled handler
    /// registered for the step).
    HandlerSyntax,
    /// A step handler failed while executing.
    StepExecution,
    /// Network/LLM/service unavailability; safe to retry.
    Transient,
    Timeout,
    Cancelled,
    MaxIterationsExceeded,
}

impl ErrorKind {
    /// Whether a failure of this kind may be retried at all. Profiles narrow
    /// this further with their own non-retryable sets.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::StepExecution | ErrorKind::Transient | ErrorKind::Timeout
        )
    }
}

/// Failure taxonomy shared by both runtimes.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("invalid workflow definition: {0}")]
    Validation(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("no compiled handler for event {event_type} in definition {definition_id}")]
    HandlerSyntax {
        definition_id: String,
        event_type: String,
    },

    #[error("step {event_type} failed: {message} (event data: {event_snapshot})")]
    StepExecution {
        event_type: String,
        message: String,
        event_snapshot: String,
    },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("workflow was cancelled")]
    Cancelled,

    #[error("workflow exceeded maximum step iterations ({0})")]
    MaxIterationsExceeded(u32),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::ToolNotFound(_) => ErrorKind::ToolNotFound,
            EngineError::AgentNotFound(_) => ErrorKind::AgentNotFound,
            EngineError::HandlerSyntax { .. } => ErrorKind::HandlerSyntax,
            EngineError::StepExecution { .. } => ErrorKind::StepExecution,
            EngineError::Transient(_) => ErrorKind::Transient,
            EngineError::Timeout(_) => ErrorKind::Timeout,
            EngineError::Cancelled => ErrorKind::Cancelled,
            EngineError::MaxIterationsExceeded(_) => ErrorKind::MaxIterationsExceeded,
            // Serialization failures come from malformed data, not outages.
            EngineError::Serialization(_) => ErrorKind::Validation,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
