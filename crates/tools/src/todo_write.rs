//! Todo write tool — whole-list task rewriting.
//!
//! The model sends the complete task list on every call; there is no
//! per-item patching. The replacement list rides back in the result's
//! structured data under the `"todos"` key, which is how the loop
//! recognizes and applies the update.

use async_trait::async_trait;
use ironloop_core::error::ToolError;
use ironloop_core::todo::{TodoItem, TodoStatus};
use ironloop_core::tool::{Tool, ToolCall, ToolResult};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TodoWriteArgs {
    todos: Vec<TodoWriteItem>,
}

#[derive(Debug, Deserialize)]
struct TodoWriteItem {
    title: String,
    #[serde(default)]
    status: TodoStatus,
}

pub struct TodoWriteTool;

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Replace the entire task list. Send every task with its current \
         status; tasks you omit are removed."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "failed"]
                            }
                        },
                        "required": ["title"]
                    },
                    "description": "The complete replacement task list, in order"
                }
            },
            "required": ["todos"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        let args: TodoWriteArgs = serde_json::from_value(call.arguments.clone())
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let items: Vec<TodoItem> = args
            .todos
            .into_iter()
            .map(|t| {
                let mut item = TodoItem::new(t.title);
                item.status = t.status;
                item
            })
            .collect();

        let data = serde_json::json!({
            "todos": serde_json::to_value(&items)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?
        });

        Ok(
            ToolResult::ok(&call.id, format!("Task list updated ({} tasks)", items.len()))
                .with_data(data),
        )
    }
}
