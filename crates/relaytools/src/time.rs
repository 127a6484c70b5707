use async_trait::async_trait;
use chrono::Utc;
use relaycore::{EngineError, ToolCapability};
use relayruntime::{ToolFactory, ToolMetadata};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Current date/time tool
#[derive(Debug)]
pub struct CurrentTimeTool;

#[async_trait]
impl ToolCapability for CurrentTimeTool {
    fn name(&self) -> &str {
        "currentTime"
    }

    async fn invoke(&self, args: Value) -> Result<Value, EngineError> {
        let now = Utc::now();
        let format = args["format"].as_str().unwrap_or("%Y-%m-%d %H:%M:%S");
        Ok(json!({
            "iso": now.to_rfc3339(),
            "formatted": now.format(format).to_string(),
            "unix": now.timestamp(),
        }))
    }
}

pub struct CurrentTimeToolFactory;

impl ToolFactory for CurrentTimeToolFactory {
    fn create(&self, _settings: &Value) -> Result<Arc<dyn ToolCapability>, EngineError> {
        Ok(Arc::new(CurrentTimeTool))
    }

    fn tool_name(&self) -> &str {
        "currentTime"
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Current UTC time, optionally formatted".to_string(),
            category: "time".to_string(),
            params: vec![],
        }
    }
}

/// Wait for a given number of milliseconds, passing inputs through.
/// Useful between polling steps (e.g. waiting on another execution).
#[derive(Debug)]
pub struct WaitTool;

#[async_trait]
impl ToolCapability for WaitTool {
    fn name(&self) -> &str {
        "wait"
    }

    async fn invoke(&self, args: Value) -> Result<Value, EngineError> {
        let delay_ms = args["delay_ms"].as_u64().unwrap_or(1000);
        tracing::info!("Waiting for {}ms", delay_ms);
        sleep(Duration::from_millis(delay_ms)).await;
        Ok(args)
    }
}

pub struct WaitToolFactory;

impl ToolFactory for WaitToolFactory {
    fn create(&self, _settings: &Value) -> Result<Arc<dyn ToolCapability>, EngineError> {
        Ok(Arc::new(WaitTool))
    }

    fn tool_name(&self) -> &str {
        "wait"
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Delay for the given milliseconds".to_string(),
            category: "time".to_string(),
            params: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn current_time_reports_unix_and_iso() {
        let result = CurrentTimeTool.invoke(json!({})).await.unwrap();
        assert!(result["unix"].as_i64().unwrap() > 0);
        assert!(result["iso"].as_str().unwrap().contains('T'));
    }

    #[tokio::test]
    async fn wait_passes_arguments_through() {
        let args = json!({ "delay_ms": 1, "marker": true });
        let result = WaitTool.invoke(args.clone()).await.unwrap();
        assert_eq!(result, args);
    }
}
