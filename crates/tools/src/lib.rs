//! Built-in tool implementations for Ironloop.
//!
//! Tools give the agent the ability to act: run shell commands, read
//! files, rewrite its task list, and deliver the final answer through the
//! terminal `finish` capability.

pub mod file_read;
pub mod finish;
pub mod shell;
pub mod todo_write;

pub use file_read::FileReadTool;
pub use finish::FinishTool;
pub use shell::ShellTool;
pub use todo_write::TodoWriteTool;

use ironloop_core::tool::ToolRegistry;

/// The default shell allowlist: common read-only and developer commands.
pub fn safe_shell_commands() -> Vec<String> {
    [
        "ls", "cat", "head", "tail", "echo", "pwd", "date", "wc", "grep", "find", "which",
        "git", "cargo", "rustc",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Create a default tool registry with all built-in tools.
///
/// Security defaults: the shell allowlist covers common read-only and
/// developer commands; sensitive paths (~/.ssh, /etc/shadow, etc.) are
/// blocked by the file reader.
pub fn default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(ShellTool::new(safe_shell_commands())));
    registry.register(Box::new(FileReadTool::new()));
    registry.register(Box::new(TodoWriteTool));
    registry.register(Box::new(FinishTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_the_builtins() {
        let registry = default_registry();
        assert_eq!(registry.names(), ["shell", "file_read", "todo_write", "finish"]);
        assert!(registry.get("finish").is_some());
    }
}
