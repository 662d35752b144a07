//! Core types for the task tracker.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Workflow state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in-progress",
            TaskStatus::Done => "done",
        }
    }

    /// Parse a status name. Accepts `in_progress` as an alias.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "todo" => Some(TaskStatus::Todo),
            "in-progress" | "in_progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            _ => None,
        }
    }

    /// The completion flag that must accompany this status.
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskStatus::Done)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "medium" => Some(Priority::Medium),
            "high" => Some(Priority::High),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task, optionally carrying its assembled subtree.
///
/// `sub_tasks`, `total_count`, `completed_count` and `progress` are derived by
/// the tree assembler and never persisted. A task read straight from a row has
/// them zeroed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub user_id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub display_order: i32,
    pub status: TaskStatus,
    pub completed: bool,
    pub priority: Priority,
    pub created_at: i64,
    pub updated_at: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_tasks: Vec<Task>,
    #[serde(default)]
    pub total_count: usize,
    #[serde(default)]
    pub completed_count: usize,
    #[serde(default)]
    pub progress: f64,
}

impl Task {
    /// Whether `task_id` appears anywhere below this node.
    pub fn has_descendant(&self, task_id: i64) -> bool {
        let mut stack: Vec<&Task> = self.sub_tasks.iter().collect();
        while let Some(node) = stack.pop() {
            if node.id == task_id {
                return true;
            }
            stack.extend(node.sub_tasks.iter());
        }
        false
    }

    /// IDs of every node below this one, in depth-first order.
    pub fn descendant_ids(&self) -> Vec<i64> {
        let mut ids = Vec::new();
        let mut stack: Vec<&Task> = self.sub_tasks.iter().rev().collect();
        while let Some(node) = stack.pop() {
            ids.push(node.id);
            stack.extend(node.sub_tasks.iter().rev());
        }
        ids
    }
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub user_id: i64,
    pub parent_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub priority: Option<Priority>,
    pub display_order: Option<i32>,
}

impl NewTask {
    pub fn new(user_id: i64, title: impl Into<String>) -> Self {
        Self {
            user_id,
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_id: i64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Partial update of a task. `None` leaves a field unchanged; the nested
/// options clear a nullable column when set to `Some(None)`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub due_date: Option<Option<NaiveDate>>,
    pub tags: Option<Vec<String>>,
    pub display_order: Option<i32>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn priority(priority: Priority) -> Self {
        Self {
            priority: Some(priority),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.due_date.is_none()
            && self.tags.is_none()
            && self.display_order.is_none()
            && self.status.is_none()
            && self.priority.is_none()
    }
}

/// Owner of task trees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: i64,
}
