//! Output formatting utilities for markdown and JSON.

use crate::types::{Task, User};
use serde::Serialize;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Json,
    #[default]
    Markdown,
}

fn checkbox(task: &Task) -> &'static str {
    if task.completed { "[x]" } else { "[ ]" }
}

fn push_task_line(md: &mut String, task: &Task, depth: usize) {
    md.push_str(&"  ".repeat(depth));
    md.push_str(&format!("- {} **{}** `#{}`", checkbox(task), task.title, task.id));
    md.push_str(&format!(" ({}, {})", task.status, task.priority));

    if let Some(due) = task.due_date {
        md.push_str(&format!(" due {}", due));
    }
    if !task.tags.is_empty() {
        let tags: Vec<String> = task.tags.iter().map(|t| format!("#{}", t)).collect();
        md.push_str(&format!(" {}", tags.join(" ")));
    }
    if task.total_count > 0 {
        md.push_str(&format!(
            " [{}/{} {:.0}%]",
            task.completed_count,
            task.total_count,
            task.progress * 100.0
        ));
    }
    md.push('\n');
}

/// Render a task tree as a nested markdown checklist.
pub fn format_tree_markdown(task: &Task) -> String {
    let mut md = String::new();
    let mut stack = vec![(task, 0usize)];
    while let Some((node, depth)) = stack.pop() {
        push_task_line(&mut md, node, depth);
        for child in node.sub_tasks.iter().rev() {
            stack.push((child, depth + 1));
        }
    }
    md
}

/// Render a single task with its description, followed by its subtree.
pub fn format_task_markdown(task: &Task) -> String {
    let mut md = String::new();

    md.push_str(&format!("## Task: {}\n", task.title));
    md.push_str(&format!("- **id**: `{}`\n", task.id));
    md.push_str(&format!("- **status**: {}\n", task.status));
    md.push_str(&format!("- **priority**: {}\n", task.priority));

    if let Some(parent_id) = task.parent_id {
        md.push_str(&format!("- **parent_id**: `{}`\n", parent_id));
    }
    if let Some(due) = task.due_date {
        md.push_str(&format!("- **due**: {}\n", due));
    }
    if !task.tags.is_empty() {
        md.push_str(&format!("- **tags**: {}\n", task.tags.join(", ")));
    }
    if task.total_count > 0 {
        md.push_str(&format!(
            "- **progress**: {}/{} ({:.0}%)\n",
            task.completed_count,
            task.total_count,
            task.progress * 100.0
        ));
    }

    if let Some(ref desc) = task.description {
        md.push_str("\n### Description\n");
        md.push_str(desc);
        md.push('\n');
    }

    if !task.sub_tasks.is_empty() {
        md.push_str("\n### Subtasks\n");
        for child in &task.sub_tasks {
            md.push_str(&format_tree_markdown(child));
        }
    }

    md
}

/// Render a user's root tasks, each with its subtree.
pub fn format_tasks_markdown(tasks: &[Task]) -> String {
    let mut md = String::new();
    md.push_str(&format!("# Tasks ({})\n\n", tasks.len()));
    if tasks.is_empty() {
        md.push_str("_No tasks._\n");
    }
    for task in tasks {
        md.push_str(&format_tree_markdown(task));
    }
    md
}

pub fn format_users_markdown(users: &[User]) -> String {
    let mut md = String::new();
    md.push_str(&format!("# Users ({})\n\n", users.len()));
    for user in users {
        md.push_str(&format!("- `{}` {}\n", user.id, user.username));
    }
    md
}

/// Pretty JSON for any serializable result.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    serde_json::to_string_pretty(value)
}
