//! Synchronous task service: validation, store round-trips and tree assembly.

use super::{TaskService, check_cancelled, validate_id, validate_title};
use crate::db::{Database, TaskStore};
use crate::error::{TaskError, TaskResult};
use crate::tree::assemble;
use crate::types::{NewTask, Priority, Task, TaskPatch, TaskStatus, User};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Task service backed directly by a [`TaskStore`].
pub struct DbTaskService<S = Database> {
    store: S,
}

impl<S: TaskStore> DbTaskService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Fetch and assemble the tree rooted at `task_id`.
    fn load_tree(&self, task_id: i64) -> TaskResult<Task> {
        let rows = self.store.fetch_tree(task_id)?;
        // An empty row set means the root does not exist.
        assemble(rows).ok_or_else(|| TaskError::task_not_found(task_id))
    }

    pub fn register_user(&self, username: &str) -> TaskResult<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(TaskError::invalid("username", "must not be empty"));
        }
        let user = self.store.create_user(username)?;
        info!(user_id = user.id, username = %user.username, "Registered user");
        Ok(user)
    }

    pub fn users(&self) -> TaskResult<Vec<User>> {
        self.store.list_users()
    }

    fn patch(&self, ctx: &CancellationToken, task_id: i64, patch: &TaskPatch) -> TaskResult<Task> {
        check_cancelled(ctx)?;
        validate_id("task_id", task_id)?;
        if let Some(ref title) = patch.title {
            validate_title(title)?;
        }

        let mut patch = patch.clone();
        patch.title = patch.title.map(|t| t.trim().to_string());

        let updated = self.store.update_task(task_id, &patch)?;
        debug!(task_id, status = %updated.status, "Updated task");
        self.load_tree(task_id)
    }
}

#[async_trait]
impl<S: TaskStore> TaskService for DbTaskService<S> {
    async fn create(&self, ctx: &CancellationToken, input: NewTask) -> TaskResult<Task> {
        check_cancelled(ctx)?;
        validate_id("user_id", input.user_id)?;
        let title = validate_title(&input.title)?;

        self.store.get_user(input.user_id)?;

        if let Some(parent_id) = input.parent_id {
            validate_id("parent_id", parent_id)?;
            let parent = self.store.fetch_by_id(parent_id)?;
            if parent.user_id != input.user_id {
                return Err(TaskError::invalid(
                    "parent_id",
                    format!("task {} belongs to another user", parent_id),
                ));
            }
        }

        let input = NewTask { title, ..input };
        let task = self.store.insert_task(&input)?;
        info!(task_id = task.id, user_id = task.user_id, parent_id = ?task.parent_id, "Created task");
        self.load_tree(task.id)
    }

    async fn show(&self, ctx: &CancellationToken, task_id: i64) -> TaskResult<Task> {
        check_cancelled(ctx)?;
        validate_id("task_id", task_id)?;
        self.load_tree(task_id)
    }

    async fn list(&self, ctx: &CancellationToken, user_id: i64) -> TaskResult<Vec<Task>> {
        check_cancelled(ctx)?;
        validate_id("user_id", user_id)?;

        let roots = self.store.list_roots(user_id)?;
        let mut trees = Vec::with_capacity(roots.len());
        for root in roots {
            check_cancelled(ctx)?;
            match self.load_tree(root.id) {
                Ok(tree) => trees.push(tree),
                // Deleted between the two queries.
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(trees)
    }

    async fn update(
        &self,
        ctx: &CancellationToken,
        task_id: i64,
        patch: TaskPatch,
    ) -> TaskResult<Task> {
        if patch.is_empty() {
            check_cancelled(ctx)?;
            validate_id("task_id", task_id)?;
            return self.load_tree(task_id);
        }
        self.patch(ctx, task_id, &patch)
    }

    async fn delete(&self, ctx: &CancellationToken, task_id: i64) -> TaskResult<()> {
        check_cancelled(ctx)?;
        validate_id("task_id", task_id)?;
        self.store.delete_task(task_id)?;
        info!(task_id, "Deleted task");
        Ok(())
    }

    async fn complete(&self, ctx: &CancellationToken, task_id: i64) -> TaskResult<Task> {
        self.patch(ctx, task_id, &TaskPatch::status(TaskStatus::Done))
    }

    async fn change_status(
        &self,
        ctx: &CancellationToken,
        task_id: i64,
        status: TaskStatus,
    ) -> TaskResult<Task> {
        self.patch(ctx, task_id, &TaskPatch::status(status))
    }

    async fn change_priority(
        &self,
        ctx: &CancellationToken,
        task_id: i64,
        priority: Priority,
    ) -> TaskResult<Task> {
        self.patch(ctx, task_id, &TaskPatch::priority(priority))
    }
}
