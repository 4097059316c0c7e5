//! Task list domain types.
//!
//! The planning call (or a `todo_write` tool call) produces a [`TodoList`].
//! Mutation is replace-list only: the model rewrites the whole list each
//! time rather than patching individual items, so the list never drifts
//! into a state the model has not seen.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One task in the plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    /// Unique task ID
    pub id: String,

    /// Short task description
    pub title: String,

    /// Current status
    #[serde(default)]
    pub status: TodoStatus,
}

impl TodoItem {
    /// Create a new pending task.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            status: TodoStatus::Pending,
        }
    }
}

/// The current plan: an ordered task list with replace-list semantics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TodoList {
    items: Vec<TodoItem>,
}

impl TodoList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from items in order.
    pub fn from_items(items: Vec<TodoItem>) -> Self {
        Self { items }
    }

    /// Replace the entire list. This is the only mutation path.
    pub fn replace(&mut self, items: Vec<TodoItem>) {
        self.items = items;
    }

    /// Clear all tasks (cancellation or new planning).
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[TodoItem] {
        &self.items
    }

    /// Render the list as plain text for injection into the conversation.
    ///
    /// Format: one task per line, `[x]` done, `[>]` in progress, `[!]`
    /// failed, `[ ]` pending.
    pub fn render(&self) -> String {
        let mut out = String::from("Current task list:\n");
        for item in &self.items {
            let marker = match item.status {
                TodoStatus::Pending => "[ ]",
                TodoStatus::InProgress => "[>]",
                TodoStatus::Completed => "[x]",
                TodoStatus::Failed => "[!]",
            };
            out.push_str(&format!("{} {}\n", marker, item.title));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_is_pending() {
        let item = TodoItem::new("Read the config");
        assert_eq!(item.status, TodoStatus::Pending);
        assert!(!item.id.is_empty());
    }

    #[test]
    fn replace_swaps_whole_list() {
        let mut list = TodoList::from_items(vec![TodoItem::new("old task")]);
        list.replace(vec![TodoItem::new("task a"), TodoItem::new("task b")]);
        assert_eq!(list.len(), 2);
        assert_eq!(list.items()[0].title, "task a");
    }

    #[test]
    fn clear_empties_the_list() {
        let mut list = TodoList::from_items(vec![TodoItem::new("task")]);
        list.clear();
        assert!(list.is_empty());
    }

    #[test]
    fn render_shows_status_markers() {
        let mut done = TodoItem::new("finished task");
        done.status = TodoStatus::Completed;
        let mut active = TodoItem::new("active task");
        active.status = TodoStatus::InProgress;
        let list = TodoList::from_items(vec![done, active, TodoItem::new("waiting task")]);

        let text = list.render();
        assert!(text.contains("[x] finished task"));
        assert!(text.contains("[>] active task"));
        assert!(text.contains("[ ] waiting task"));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TodoStatus::InProgress).unwrap();
        assert_eq!(json, r#""in_progress""#);
    }
}
