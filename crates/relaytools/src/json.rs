use async_trait::async_trait;
use relaycore::{EngineError, ToolCapability};
use relayruntime::{ToolFactory, ToolMetadata};
use serde_json::Value;
use std::sync::Arc;

/// Parse a JSON string into a value
#[derive(Debug)]
pub struct JsonParseTool;

#[async_trait]
impl ToolCapability for JsonParseTool {
    fn name(&self) -> &str {
        "parseJson"
    }

    async fn invoke(&self, args: Value) -> Result<Value, EngineError> {
        let text = args["text"]
            .as_str()
            .ok_or_else(|| EngineError::Validation("parseJson requires text".to_string()))?;

        let parsed: Value = serde_json::from_str(text)
            .map_err(|e| EngineError::Validation(format!("JSON parse error: {}", e)))?;
        Ok(parsed)
    }
}

pub struct JsonParseToolFactory;

impl ToolFactory for JsonParseToolFactory {
    fn create(&self, _settings: &Value) -> Result<Arc<dyn ToolCapability>, EngineError> {
        Ok(Arc::new(JsonParseTool))
    }

    fn tool_name(&self) -> &str {
        "parseJson"
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Parse a JSON string".to_string(),
            category: "transform".to_string(),
            params: vec![],
        }
    }
}

/// Serialize a value to a JSON string
#[derive(Debug)]
pub struct JsonStringifyTool;

#[async_trait]
impl ToolCapability for JsonStringifyTool {
    fn name(&self) -> &str {
        "stringifyJson"
    }

    async fn invoke(&self, args: Value) -> Result<Value, EngineError> {
        let pretty = serde_json::to_string_pretty(&args["value"])?;
        Ok(Value::String(pretty))
    }
}

pub struct JsonStringifyToolFactory;

impl ToolFactory for JsonStringifyToolFactory {
    fn create(&self, _settings: &Value) -> Result<Arc<dyn ToolCapability>, EngineError> {
        Ok(Arc::new(JsonStringifyTool))
    }

    fn tool_name(&self) -> &str {
        "stringifyJson"
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Serialize a value to a JSON string".to_string(),
            category: "transform".to_string(),
            params: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn parse_round_trips_stringify() {
        let value = json!({ "nested": { "n": 1 } });
        let text = JsonStringifyTool
            .invoke(json!({ "value": value }))
            .await
            .unwrap();
        let parsed = JsonParseTool
            .invoke(json!({ "text": text }))
            .await
            .unwrap();
        assert_eq!(parsed, value);
    }

    #[tokio::test]
    async fn parse_rejects_malformed_input() {
        let err = JsonParseTool
            .invoke(json!({ "text": "{not json" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), relaycore::ErrorKind::Validation);
    }
}
