//! Standard tool library
//!
//! Collection of built-in tool capabilities for common operations

mod echo;
mod http;
mod json;
mod time;

pub use echo::EchoTool;
pub use http::HttpRequestTool;
pub use json::{JsonParseTool, JsonStringifyTool};
pub use time::{CurrentTimeTool, WaitTool};

use relayruntime::ToolRegistry;
use std::sync::Arc;

/// Register all standard tools with a registry
pub fn register_all(registry: &mut ToolRegistry) {
    registry.register(Arc::new(echo::EchoToolFactory));
    registry.register(Arc::new(http::HttpRequestToolFactory));
    registry.register(Arc::new(json::JsonParseToolFactory));
    registry.register(Arc::new(json::JsonStringifyToolFactory));
    registry.register(Arc::new(time::CurrentTimeToolFactory));
    registry.register(Arc::new(time::WaitToolFactory));
}
