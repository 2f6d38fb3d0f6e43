//! Tool system for AI agent tool calling.
//!
//! Defines the `Tool` trait that all tools implement, plus a registry
//! for managing available tools and converting them to LLM API format.

pub mod list_files;
pub mod read_file;
pub mod write_file;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::provider::ToolDefinition;

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text content returned to the LLM.
    pub content: String,
    /// Whether the tool execution failed.
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Trait that all tools must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name for this tool (e.g. "read_file").
    fn name(&self) -> &str;
    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;
    /// Execute the tool with the given input.
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

/// Name→executor map. The agent loop's only entry point into tool
/// execution — `execute` never panics or propagates an error; an unknown
/// name or a failing executor both come back as an `is_error` result.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: BTreeMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Registry with the built-in file tools, ready for agent loop use.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(read_file::ReadFileTool));
        registry.register(Arc::new(write_file::WriteFileTool));
        registry.register(Arc::new(list_files::ListFilesTool));
        registry
    }

    /// Declared schemas for every registered tool, in a stable (name-sorted)
    /// order so the system prompt and wire request are deterministic.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute `name` with `args`. Unknown tool names return `is_error=true`
    /// with a descriptive message rather than panicking — the model can see
    /// and react to the failure.
    pub async fn execute(&self, name: &str, args: serde_json::Value) -> ToolResult {
        match self.tools.get(name) {
            Some(tool) => {
                debug!(tool = name, "executing tool");
                tool.execute(args).await
            }
            None => ToolResult::error(format!("unknown tool: {name}")),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_tool_is_reported_not_panicked() {
        let registry = ToolRegistry::with_builtins();
        let result = registry.execute("does_not_exist", serde_json::json!({})).await;
        assert!(result.is_error);
        assert!(result.content.contains("does_not_exist"));
    }

    #[test]
    fn definitions_cover_builtins() {
        let registry = ToolRegistry::with_builtins();
        let names: Vec<&str> = registry.definitions().iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"read_file"));
        assert!(names.contains(&"write_file"));
        assert!(names.contains(&"list_files"));
    }
}
