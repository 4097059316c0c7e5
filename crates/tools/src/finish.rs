//! Finish tool — the terminal capability that ends a run.
//!
//! The only tool whose result carries [`ToolControl::Terminal`]. A call
//! with a usable `answer` succeeds and its output becomes the run's final
//! text. A call with a missing or empty answer is still terminal-tagged
//! but unsuccessful, so the loop counts it against the failure ceiling
//! instead of ending the run.

use async_trait::async_trait;
use ironloop_core::error::ToolError;
use ironloop_core::tool::{Tool, ToolCall, ToolControl, ToolResult};

pub struct FinishTool;

#[async_trait]
impl Tool for FinishTool {
    fn name(&self) -> &str {
        "finish"
    }

    fn description(&self) -> &str {
        "Finish the task and deliver the final answer to the user. \
         Call this exactly once, when all work is done."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "answer": {
                    "type": "string",
                    "description": "The complete final answer for the user"
                }
            },
            "required": ["answer"]
        })
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolResult, ToolError> {
        match call.arguments["answer"].as_str() {
            Some(answer) if !answer.trim().is_empty() => {
                Ok(ToolResult::terminal(&call.id, answer.trim()))
            }
            _ => {
                let mut result = ToolResult::failure(
                    &call.id,
                    "finish requires a non-empty 'answer' string",
                );
                result.control = ToolControl::Terminal;
                Ok(result)
            }
        }
    }
}
