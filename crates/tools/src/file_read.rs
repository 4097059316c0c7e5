//! File read tool — read file contents with path validation.

use async_trait::async_trait;
use ironloop_core::error::ToolError;
use ironloop_core::tool::{Tool, ToolCall, ToolResult};

/// Path prefixes that are never readable, regardless of configuration.
const FORBIDDEN_PREFIXES: &[&str] = &["/etc/shadow", "/etc/sudoers", "/proc/", "/sys/"];

/// Path components that are never readable.
const FORBIDDEN_COMPONENTS: &[&str] = &[".ssh", ".gnupg", ".aws"];

pub struct FileReadTool {
    /// Allowed root directories. Empty = allow all.
    allowed_roots: Vec<String>,
}

impl FileReadTool {
    /// A file read tool with no root restriction.
    pub fn new() -> Self {
        Self {
            allowed_roots: Vec::new(),
        }
    }

    /// Restrict reads to the given root directories.
    pub fn with_roots(allowed_roots: Vec<String>) -> Self {
        Self { allowed_roots }
    }

    fn validate(&self, path: &str) -> Result<(), String> {
        if FORBIDDEN_PREFIXES.iter().any(|p| path.starts_with(p)) {
            return Err(format!("path '{path}' is forbidden"));
        }
        if std::path::Path::new(path)
            .components()
            .any(|c| FORBIDDEN_COMPONENTS.contains(&c.as_os_str().to_string_lossy().as_ref()))
        {
            return Err(format!("path '{path}' is forbidden"));
        }
        if !self.allowed_roots.is_empty()
            && !self.allowed_roots.iter().any(|root| path.starts_with(root))
        {
            return Err(format!("path '{path}' is outside the allowed roots"));
        }
        Ok(())
    }
}

impl Default for FileReadTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let path = call.arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        if let Err(reason) = self.validate(path) {
            return Err(ToolError::PermissionDenied {
                tool_name: "file_read".into(),
                reason,
            });
        }

        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(ToolResult::ok(&call.id, content)),
            Err(e) => Ok(ToolResult::failure(
                &call.id,
                format!("Failed to read file: {e}"),
            )),
        }
    }
}
