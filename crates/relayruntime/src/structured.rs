use async_trait::async_trait;
use relaycore::{AgentCapability, EngineError, LlmService};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Strip a surrounding markdown code fence from agent output.
///
/// LLMs routinely wrap JSON in ```json ... ``` fences, which breaks parsing
/// downstream. Returns the inner text when the whole (trimmed) output is one
/// fenced block, the original text otherwise.
pub fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return text;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return text;
    };
    // Drop the optional language tag on the opening fence line.
    let body = match body.find('\n') {
        Some(idx) if body[..idx].chars().all(|c| c.is_alphanumeric()) => &body[idx + 1..],
        _ => body,
    };
    body.trim()
}

/// Wraps an agent capability so free-text output is coerced into the spec's
/// declared output shape.
///
/// After the wrapped call returns, a secondary extraction call turns the raw
/// text into structured JSON. Extraction failures degrade gracefully: every
/// declared field maps to the original raw text, and the step never fails on
/// a coercion error. The wrapped result is never mutated in place.
pub struct StructuredOutputAgent {
    inner: Arc<dyn AgentCapability>,
    shape: BTreeMap<String, String>,
    llm: Arc<dyn LlmService>,
}

impl StructuredOutputAgent {
    pub fn new(
        inner: Arc<dyn AgentCapability>,
        shape: BTreeMap<String, String>,
        llm: Arc<dyn LlmService>,
    ) -> Self {
        Self { inner, shape, llm }
    }

    fn fallback(&self, raw: &str) -> Value {
        let fields: serde_json::Map<String, Value> = self
            .shape
            .keys()
            .map(|field| (field.clone(), Value::String(raw.to_string())))
            .collect();
        Value::Object(fields)
    }
}

#[async_trait]
impl AgentCapability for StructuredOutputAgent {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn run(&self, input: &str) -> Result<String, EngineError> {
        let raw = self.inner.run(input).await?;
        let cleaned = strip_markdown_fences(&raw);

        if self.shape.is_empty() {
            return Ok(cleaned.to_string());
        }

        match self.llm.extract_to_shape(cleaned, &self.shape).await {
            Ok(structured) => Ok(structured.to_string()),
            Err(err) => {
                tracing::warn!(
                    agent = %self.inner.name(),
                    error = %err,
                    "structured extraction failed, falling back to raw text"
                );
                Ok(self.fallback(cleaned).to_string())
            }
        }
    }
}
