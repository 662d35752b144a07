//! Cache-coherent wrapper around a task service.
//!
//! Reads are served from [`TaskCache`] when possible. Writes always go to the
//! inner service first; on success the cache is corrected immediately and
//! background jobs on the [`WorkerPool`] re-fetch the affected entries so the
//! next read is warm. Background jobs run with their own cancellation token,
//! so cancelling a foreground call never aborts cache maintenance.

use super::TaskService;
use crate::cache::{CacheKey, CacheValue, TaskCache};
use crate::error::TaskResult;
use crate::pool::WorkerPool;
use crate::types::{NewTask, Priority, Task, TaskPatch, TaskStatus};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// When a cache hit also schedules a background refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Refresh a user's root list on every `list` hit.
    pub list_on_hit: bool,
    /// Refresh a task tree on every `show` hit.
    pub task_on_hit: bool,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            list_on_hit: true,
            task_on_hit: false,
        }
    }
}

/// Drop-in [`TaskService`] with a stale-while-revalidate read cache.
pub struct CachedTaskService<S> {
    inner: Arc<S>,
    cache: Arc<TaskCache>,
    pool: Arc<WorkerPool>,
    policy: RefreshPolicy,
}

impl<S: TaskService> CachedTaskService<S> {
    pub fn new(inner: Arc<S>, cache: Arc<TaskCache>, pool: Arc<WorkerPool>) -> Self {
        Self {
            inner,
            cache,
            pool,
            policy: RefreshPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cache(&self) -> &Arc<TaskCache> {
        &self.cache
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Queue a re-fetch of the tree rooted at `task_id`.
    async fn refresh_task(&self, task_id: i64) {
        let key = CacheKey::Task(task_id);
        let generation = self.cache.generation(&key);
        let inner = Arc::clone(&self.inner);
        let cache = Arc::clone(&self.cache);

        self.pool
            .submit(async move {
                let ctx = CancellationToken::new();
                match inner.show(&ctx, task_id).await {
                    Ok(tree) => {
                        cache.put_if_current(key, generation, CacheValue::Task(tree));
                        Ok(())
                    }
                    // Deleted since the job was queued; nothing to warm.
                    Err(e) if e.is_not_found() => {
                        trace!(task_id, "Skipping refresh of deleted task");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            })
            .await;
    }

    /// Queue a re-fetch of `user_id`'s root list.
    async fn refresh_list(&self, user_id: i64) {
        let key = CacheKey::UserTasks(user_id);
        let generation = self.cache.generation(&key);
        let inner = Arc::clone(&self.inner);
        let cache = Arc::clone(&self.cache);

        self.pool
            .submit(async move {
                let ctx = CancellationToken::new();
                let tasks = inner.list(&ctx, user_id).await?;
                cache.put_if_current(key, generation, CacheValue::List(tasks));
                Ok(())
            })
            .await;
    }

    /// Bring the cache in line with a successful write that produced `tree`.
    async fn after_write(&self, tree: &Task) {
        self.cache
            .store(CacheKey::Task(tree.id), CacheValue::Task(tree.clone()));
        let mut ancestors = self.cache.invalidate_containing(tree.id);
        if let Some(parent_id) = tree.parent_id {
            // A freshly created child is not yet inside any cached tree.
            if self.cache.invalidate(&CacheKey::Task(parent_id)) {
                ancestors += 1;
            }
            ancestors += self.cache.invalidate_containing(parent_id);
        }
        self.cache.invalidate(&CacheKey::UserTasks(tree.user_id));
        debug!(
            task_id = tree.id,
            user_id = tree.user_id,
            ancestors,
            "Cache updated after write"
        );

        self.refresh_task(tree.id).await;
        self.refresh_list(tree.user_id).await;
    }

    /// Owner and subtree of `task_id`, preferring the cached copy.
    async fn resolve(&self, ctx: &CancellationToken, task_id: i64) -> Option<Task> {
        if let Some(task) = self.cache.get_task(task_id) {
            return Some(task);
        }
        match self.inner.show(ctx, task_id).await {
            Ok(task) => Some(task),
            Err(e) => {
                debug!(task_id, error = %e, "Could not resolve task owner before delete");
                None
            }
        }
    }
}

#[async_trait]
impl<S: TaskService> TaskService for CachedTaskService<S> {
    async fn create(&self, ctx: &CancellationToken, input: NewTask) -> TaskResult<Task> {
        let task = self.inner.create(ctx, input).await?;
        self.after_write(&task).await;
        Ok(task)
    }

    async fn show(&self, ctx: &CancellationToken, task_id: i64) -> TaskResult<Task> {
        if let Some(task) = self.cache.get_task(task_id) {
            trace!(task_id, "Task cache hit");
            if self.policy.task_on_hit && !ctx.is_cancelled() {
                self.refresh_task(task_id).await;
            }
            return Ok(task);
        }

        let key = CacheKey::Task(task_id);
        let generation = self.cache.generation(&key);
        let task = self.inner.show(ctx, task_id).await?;
        self.cache
            .put_if_current(key, generation, CacheValue::Task(task.clone()));
        Ok(task)
    }

    async fn list(&self, ctx: &CancellationToken, user_id: i64) -> TaskResult<Vec<Task>> {
        if let Some(tasks) = self.cache.get_list(user_id) {
            trace!(user_id, "Task list cache hit");
            if self.policy.list_on_hit && !ctx.is_cancelled() {
                self.refresh_list(user_id).await;
            }
            return Ok(tasks);
        }

        let key = CacheKey::UserTasks(user_id);
        let generation = self.cache.generation(&key);
        let tasks = self.inner.list(ctx, user_id).await?;
        self.cache
            .put_if_current(key, generation, CacheValue::List(tasks.clone()));
        Ok(tasks)
    }

    async fn update(
        &self,
        ctx: &CancellationToken,
        task_id: i64,
        patch: TaskPatch,
    ) -> TaskResult<Task> {
        let task = self.inner.update(ctx, task_id, patch).await?;
        self.after_write(&task).await;
        Ok(task)
    }

    async fn delete(&self, ctx: &CancellationToken, task_id: i64) -> TaskResult<()> {
        let existing = self.resolve(ctx, task_id).await;

        self.inner.delete(ctx, task_id).await?;

        self.cache.invalidate(&CacheKey::Task(task_id));
        self.cache.invalidate_containing(task_id);
        let Some(existing) = existing else {
            // Owner unknown: the user's list stays as cached until its next refresh.
            return Ok(());
        };

        for descendant in existing.descendant_ids() {
            self.cache.invalidate(&CacheKey::Task(descendant));
        }
        self.cache.invalidate(&CacheKey::UserTasks(existing.user_id));
        debug!(task_id, user_id = existing.user_id, "Cache updated after delete");

        self.refresh_list(existing.user_id).await;
        Ok(())
    }

    async fn complete(&self, ctx: &CancellationToken, task_id: i64) -> TaskResult<Task> {
        let task = self.inner.complete(ctx, task_id).await?;
        self.after_write(&task).await;
        Ok(task)
    }

    async fn change_status(
        &self,
        ctx: &CancellationToken,
        task_id: i64,
        status: TaskStatus,
    ) -> TaskResult<Task> {
        let task = self.inner.change_status(ctx, task_id, status).await?;
        self.after_write(&task).await;
        Ok(task)
    }

    async fn change_priority(
        &self,
        ctx: &CancellationToken,
        task_id: i64,
        priority: Priority,
    ) -> TaskResult<Task> {
        let task = self.inner.change_priority(ctx, task_id, priority).await?;
        self.after_write(&task).await;
        Ok(task)
    }
}
