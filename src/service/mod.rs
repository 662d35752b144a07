//! Task service contract offered to the presentation layer.
//!
//! Two implementations share the contract: [`DbTaskService`] talks to the
//! store synchronously and assembles trees; [`CachedTaskService`] wraps any
//! implementation with a read cache kept coherent by background jobs.

mod cached;
mod store;

pub use cached::{CachedTaskService, RefreshPolicy};
pub use store::DbTaskService;

use crate::error::{TaskError, TaskResult};
use crate::types::{NewTask, Priority, Task, TaskPatch, TaskStatus};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Read/write operations on task trees.
///
/// Every call takes the caller's cancellation token. Reads and writes return
/// fully assembled trees.
#[async_trait]
pub trait TaskService: Send + Sync + 'static {
    async fn create(&self, ctx: &CancellationToken, input: NewTask) -> TaskResult<Task>;

    /// The tree rooted at `task_id`.
    async fn show(&self, ctx: &CancellationToken, task_id: i64) -> TaskResult<Task>;

    /// Every root task of `user_id`, each with its assembled tree.
    async fn list(&self, ctx: &CancellationToken, user_id: i64) -> TaskResult<Vec<Task>>;

    async fn update(&self, ctx: &CancellationToken, task_id: i64, patch: TaskPatch)
    -> TaskResult<Task>;

    /// Delete a task and everything beneath it.
    async fn delete(&self, ctx: &CancellationToken, task_id: i64) -> TaskResult<()>;

    async fn complete(&self, ctx: &CancellationToken, task_id: i64) -> TaskResult<Task>;

    async fn change_status(
        &self,
        ctx: &CancellationToken,
        task_id: i64,
        status: TaskStatus,
    ) -> TaskResult<Task>;

    async fn change_priority(
        &self,
        ctx: &CancellationToken,
        task_id: i64,
        priority: Priority,
    ) -> TaskResult<Task>;
}

/// Fail fast if the caller has already given up.
pub(crate) fn check_cancelled(ctx: &CancellationToken) -> TaskResult<()> {
    if ctx.is_cancelled() {
        Err(TaskError::Cancelled)
    } else {
        Ok(())
    }
}

pub(crate) fn validate_id(field: &str, id: i64) -> TaskResult<()> {
    if id <= 0 {
        return Err(TaskError::invalid(field, format!("must be positive, got {}", id)));
    }
    Ok(())
}

pub(crate) fn validate_title(title: &str) -> TaskResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TaskError::invalid("title", "must not be empty"));
    }
    Ok(title.to_string())
}
