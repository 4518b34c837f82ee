//! Hub tool registry, retargeted from agent tools (teacher) to gateway
//! tools: each registered [`Tool`] backs one `tools/call` method name.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::McpError;
use crate::protocol::{CallToolResult, McpTool};

/// A single tool exposed by the Hub over MCP.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;

    async fn call(&self, arguments: serde_json::Value) -> Result<CallToolResult, McpError>;

    /// Maximum execution time before the registry reports a timeout. Most
    /// tools are quick lookups; `reindex_vector` overrides this to return
    /// almost immediately since it only starts a background job.
    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
}

/// Holds every tool the Hub exposes, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!(tool = %name, "registering hub tool");
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list_tools(&self) -> Vec<McpTool> {
        self.tools
            .values()
            .map(|tool| McpTool {
                name: tool.name().to_string(),
                description: Some(tool.description().to_string()),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    pub async fn call(&self, name: &str, arguments: serde_json::Value) -> Result<CallToolResult, McpError> {
        let tool = self.get(name).ok_or_else(|| McpError::MethodNotFound {
            method: name.to_string(),
        })?;

        info!(tool = %name, "executing hub tool");
        match tokio::time::timeout(tool.timeout(), tool.call(arguments)).await {
            Ok(result) => result,
            Err(_) => Err(McpError::Timeout {
                timeout_secs: tool.timeout().as_secs(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes input"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn call(&self, arguments: serde_json::Value) -> Result<CallToolResult, McpError> {
            Ok(CallToolResult::text(arguments["text"].as_str().unwrap_or("").to_string()))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never returns in time"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn call(&self, _arguments: serde_json::Value) -> Result<CallToolResult, McpError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(CallToolResult::text("too slow"))
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(10)
        }
    }

    #[tokio::test]
    async fn registered_tool_is_callable_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));

        let result = registry.call("echo", serde_json::json!({"text": "hi"})).await.unwrap();
        assert!(matches!(&result.content[0], crate::protocol::ToolContent::Text { text } if text == "hi"));
    }

    #[tokio::test]
    async fn unknown_tool_is_method_not_found() {
        let registry = ToolRegistry::new();
        let err = registry.call("missing", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::MethodNotFound { .. }));
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SlowTool));
        let err = registry.call("slow", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));
    }

    #[test]
    fn list_tools_reports_schema() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let tools = registry.list_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
    }
}
