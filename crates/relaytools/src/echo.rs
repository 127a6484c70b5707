use async_trait::async_trait;
use relaycore::{EngineError, ToolCapability};
use relayruntime::{ToolFactory, ToolMetadata};
use serde_json::Value;
use std::sync::Arc;

/// Logs its arguments and returns them unchanged. Handy while authoring a
/// DSL to see what a step actually receives.
#[derive(Debug)]
pub struct EchoTool;

#[async_trait]
impl ToolCapability for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, args: Value) -> Result<Value, EngineError> {
        tracing::info!("echo: {}", args);
        Ok(args)
    }
}

pub struct EchoToolFactory;

impl ToolFactory for EchoToolFactory {
    fn create(&self, _settings: &Value) -> Result<Arc<dyn ToolCapability>, EngineError> {
        Ok(Arc::new(EchoTool))
    }

    fn tool_name(&self) -> &str {
        "echo"
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Log and return the arguments".to_string(),
            category: "debug".to_string(),
            params: vec![],
        }
    }
}
