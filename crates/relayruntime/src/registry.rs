use relaycore::{EngineError, ToolCapability};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory trait for creating tool capability instances
pub trait ToolFactory: Send + Sync {
    /// Create an instance of the tool with the given settings (per-caller
    /// credentials, endpoints, etc.).
    fn create(&self, settings: &Value) -> Result<Arc<dyn ToolCapability>, EngineError>;

    /// Registered tool name (e.g., "httpRequest", "searchWeb")
    fn tool_name(&self) -> &str;

    /// Optional: Get tool metadata (description, parameter schema, etc.)
    fn metadata(&self) -> ToolMetadata {
        ToolMetadata::default()
    }
}

/// Metadata about a tool type
#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub description: String,
    pub category: String,
    pub params: Vec<ParamDefinition>,
}

impl Default for ToolMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            params: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamDefinition {
    pub name: String,
    pub description: String,
    pub required: bool,
}

/// Registry of available tools.
///
/// Looked up once per resolution; concurrent lookups for different names are
/// safe. Settings resolve per caller: a caller-scoped override wins over the
/// tool's defaults.
pub struct ToolRegistry {
    factories: HashMap<String, Arc<dyn ToolFactory>>,
    default_settings: HashMap<String, Value>,
    caller_settings: HashMap<(String, String), Value>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            default_settings: HashMap::new(),
            caller_settings: HashMap::new(),
        }
    }

    /// Register a tool factory
    pub fn register(&mut self, factory: Arc<dyn ToolFactory>) {
        let name = factory.tool_name().to_string();
        tracing::info!("Registering tool: {}", name);
        self.factories.insert(name, factory);
    }

    /// Set default settings for a tool
    pub fn set_default_settings(&mut self, tool_name: impl Into<String>, settings: Value) {
        self.default_settings.insert(tool_name.into(), settings);
    }

    /// Set caller-scoped settings overriding the tool's defaults
    pub fn set_caller_settings(
        &mut self,
        caller_id: impl Into<String>,
        tool_name: impl Into<String>,
        settings: Value,
    ) {
        self.caller_settings
            .insert((caller_id.into(), tool_name.into()), settings);
    }

    /// Instantiate a tool capability by name, honoring caller settings
    pub fn find_tool_by_name(
        &self,
        name: &str,
        caller_id: Option<&str>,
    ) -> Result<Arc<dyn ToolCapability>, EngineError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))?;

        let settings = caller_id
            .and_then(|caller| {
                self.caller_settings
                    .get(&(caller.to_string(), name.to_string()))
            })
            .or_else(|| self.default_settings.get(name))
            .cloned()
            .unwrap_or(Value::Null);

        factory.create(&settings)
    }

    /// Get all registered tool names
    pub fn list_tools(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Get metadata for a tool
    pub fn get_metadata(&self, name: &str) -> Option<ToolMetadata> {
        self.factories.get(name).map(|f| f.metadata())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct SettingsEcho {
        settings: Value,
    }

    #[async_trait]
    impl ToolCapability for SettingsEcho {
        fn name(&self) -> &str {
            "settingsEcho"
        }

        async fn invoke(&self, _args: Value) -> Result<Value, EngineError> {
            Ok(self.settings.clone())
        }
    }

    struct SettingsEchoFactory;

    impl ToolFactory for SettingsEchoFactory {
        fn create(&self, settings: &Value) -> Result<Arc<dyn ToolCapability>, EngineError> {
            Ok(Arc::new(SettingsEcho {
                settings: settings.clone(),
            }))
        }

        fn tool_name(&self) -> &str {
            "settingsEcho"
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.find_tool_by_name("missing", None).unwrap_err();
        assert_eq!(err.kind(), relaycore::ErrorKind::ToolNotFound);
    }

    #[tokio::test]
    async fn caller_settings_override_defaults() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SettingsEchoFactory));
        registry.set_default_settings("settingsEcho", serde_json::json!({"key": "default"}));
        registry.set_caller_settings("user-1", "settingsEcho", serde_json::json!({"key": "mine"}));

        let tool = registry.find_tool_by_name("settingsEcho", None).unwrap();
        assert_eq!(
            tool.invoke(Value::Null).await.unwrap(),
            serde_json::json!({"key": "default"})
        );

        let tool = registry
            .find_tool_by_name("settingsEcho", Some("user-1"))
            .unwrap();
        assert_eq!(
            tool.invoke(Value::Null).await.unwrap(),
            serde_json::json!({"key": "mine"})
        );
    }
}
