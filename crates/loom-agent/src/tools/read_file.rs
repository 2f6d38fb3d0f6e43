//! Tool: read_file — read the contents of a file from disk.

use async_trait::async_trait;

use super::{Tool, ToolResult};
use crate::truncate::{truncate_output, DEFAULT_MAX_CHARS};

/// Maximum characters returned by read_file to avoid flooding the context window.
const MAX_OUTPUT_CHARS: usize = DEFAULT_MAX_CHARS;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Optionally limit to a line range with \
         `offset` (1-based first line) and `limit` (number of lines to return)."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file."
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line number to start reading from (optional)."
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (optional)."
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let path = match input.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolResult::error("missing required parameter: path"),
        };

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("failed to read '{}': {}", path, e)),
        };

        let offset = input
            .get("offset")
            .and_then(|v| v.as_u64())
            .map(|v| v.saturating_sub(1) as usize); // convert to 0-based
        let limit = input.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);

        let result = if offset.is_some() || limit.is_some() {
            let start = offset.unwrap_or(0);
            let lines: Vec<&str> = content.lines().skip(start).collect();
            let lines = if let Some(n) = limit { &lines[..n.min(lines.len())] } else { &lines };
            lines.join("\n")
        } else {
            content
        };

        // Truncate if needed to avoid overwhelming the context window.
        let result = truncate_output(&result, MAX_OUTPUT_CHARS);

        ToolResult::success(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello world").unwrap();

        let result = ReadFileTool
            .execute(serde_json::json!({ "path": path.to_str().unwrap() }))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, "hello world");
    }

    #[tokio::test]
    async fn missing_path_is_reported_not_panicked() {
        let result = ReadFileTool.execute(serde_json::json!({})).await;
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn long_multibyte_file_truncates_without_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        // Each '€' is 3 bytes — a byte-index slice at MAX_OUTPUT_CHARS would
        // land mid-character and panic.
        let content = "€".repeat(MAX_OUTPUT_CHARS + 1);
        std::fs::write(&path, &content).unwrap();

        let result = ReadFileTool
            .execute(serde_json::json!({ "path": path.to_str().unwrap() }))
            .await;
        assert!(!result.is_error);
        assert!(result.content.contains("OUTPUT TRUNCATED"));
    }
}
