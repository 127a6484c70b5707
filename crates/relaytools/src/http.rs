use async_trait::async_trait;
use relaycore::{EngineError, ToolCapability};
use relayruntime::{ParamDefinition, ToolFactory, ToolMetadata};
use serde_json::{json, Value};
use std::sync::Arc;

/// HTTP request tool
#[derive(Debug)]
pub struct HttpRequestTool {
    client: reqwest::Client,
    default_headers: Value,
}

impl HttpRequestTool {
    pub fn new(settings: &Value) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_headers: settings.get("headers").cloned().unwrap_or(Value::Null),
        }
    }
}

#[async_trait]
impl ToolCapability for HttpRequestTool {
    fn name(&self) -> &str {
        "httpRequest"
    }

    async fn invoke(&self, args: Value) -> Result<Value, EngineError> {
        let url = args["url"]
            .as_str()
            .ok_or_else(|| EngineError::Validation("httpRequest requires a url".to_string()))?;
        let method = args["method"].as_str().unwrap_or("GET");

        tracing::info!("{} {}", method, url);

        let request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(url),
            "POST" => {
                let mut req = self.client.post(url);
                if let Some(body) = args.get("body") {
                    req = req.json(body);
                }
                req
            }
            "PUT" => {
                let mut req = self.client.put(url);
                if let Some(body) = args.get("body") {
                    req = req.json(body);
                }
                req
            }
            "DELETE" => self.client.delete(url),
            other => {
                return Err(EngineError::Validation(format!(
                    "unsupported method: {}",
                    other
                )))
            }
        };

        // Caller headers stack on top of the settings-provided defaults.
        let mut request = request;
        for headers in [&self.default_headers, &args["headers"]] {
            if let Value::Object(map) = headers {
                for (key, value) in map {
                    if let Some(text) = value.as_str() {
                        request = request.header(key, text);
                    }
                }
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Transient(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| EngineError::Transient(format!("failed to read response: {}", e)))?;

        Ok(json!({ "status": status, "body": body }))
    }
}

pub struct HttpRequestToolFactory;

impl ToolFactory for HttpRequestToolFactory {
    fn create(&self, settings: &Value) -> Result<Arc<dyn ToolCapability>, EngineError> {
        Ok(Arc::new(HttpRequestTool::new(settings)))
    }

    fn tool_name(&self) -> &str {
        "httpRequest"
    }

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            params: vec![
                ParamDefinition {
                    name: "url".to_string(),
                    description: "Request URL".to_string(),
                    required: true,
                },
                ParamDefinition {
                    name: "method".to_string(),
                    description: "GET, POST, PUT or DELETE (default GET)".to_string(),
                    required: false,
                },
                ParamDefinition {
                    name: "body".to_string(),
                    description: "JSON body for POST/PUT".to_string(),
                    required: false,
                },
            ],
        }
    }
}
