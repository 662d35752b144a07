//! Tests for the cache-coherent task service wrapper.
//!
//! The wrapped service is the real store-backed service behind a thin
//! counting layer, so tests can tell cache hits from store round-trips.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tasktrack::cache::{CacheKey, TaskCache};
use tasktrack::db::Database;
use tasktrack::error::{TaskError, TaskResult};
use tasktrack::pool::WorkerPool;
use tasktrack::service::{CachedTaskService, DbTaskService, RefreshPolicy, TaskService};
use tasktrack::types::{NewTask, Priority, Task, TaskPatch, TaskStatus};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Calls {
    shows: AtomicUsize,
    lists: AtomicUsize,
    writes: AtomicUsize,
}

/// Store-backed service that counts calls and can be told to fail writes
/// or single-task reads.
struct CountingService {
    inner: DbTaskService,
    calls: Arc<Calls>,
    fail_writes: AtomicBool,
    fail_shows: AtomicBool,
}

impl CountingService {
    fn write(&self) -> TaskResult<()> {
        self.calls.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TaskError::internal("store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskService for CountingService {
    async fn create(&self, ctx: &CancellationToken, input: NewTask) -> TaskResult<Task> {
        self.write()?;
        self.inner.create(ctx, input).await
    }

    async fn show(&self, ctx: &CancellationToken, task_id: i64) -> TaskResult<Task> {
        self.calls.shows.fetch_add(1, Ordering::SeqCst);
        if self.fail_shows.load(Ordering::SeqCst) {
            return Err(TaskError::internal("read replica down"));
        }
        self.inner.show(ctx, task_id).await
    }

    async fn list(&self, ctx: &CancellationToken, user_id: i64) -> TaskResult<Vec<Task>> {
        self.calls.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list(ctx, user_id).await
    }

    async fn update(
        &self,
        ctx: &CancellationToken,
        task_id: i64,
        patch: TaskPatch,
    ) -> TaskResult<Task> {
        self.write()?;
        self.inner.update(ctx, task_id, patch).await
    }

    async fn delete(&self, ctx: &CancellationToken, task_id: i64) -> TaskResult<()> {
        self.write()?;
        self.inner.delete(ctx, task_id).await
    }

    async fn complete(&self, ctx: &CancellationToken, task_id: i64) -> TaskResult<Task> {
        self.write()?;
        self.inner.complete(ctx, task_id).await
    }

    async fn change_status(
        &self,
        ctx: &CancellationToken,
        task_id: i64,
        status: TaskStatus,
    ) -> TaskResult<Task> {
        self.write()?;
        self.inner.change_status(ctx, task_id, status).await
    }

    async fn change_priority(
        &self,
        ctx: &CancellationToken,
        task_id: i64,
        priority: Priority,
    ) -> TaskResult<Task> {
        self.write()?;
        self.inner.change_priority(ctx, task_id, priority).await
    }
}

struct Harness {
    service: Arc<CachedTaskService<CountingService>>,
    inner: Arc<CountingService>,
    calls: Arc<Calls>,
    user: i64,
}

impl Harness {
    fn new() -> Self {
        Self::with_policy(RefreshPolicy::default())
    }

    fn with_policy(policy: RefreshPolicy) -> Self {
        let db = Database::open_in_memory().expect("Failed to create in-memory database");
        let store = DbTaskService::new(db);
        let user = store.register_user("alice").unwrap().id;
        let calls = Arc::new(Calls::default());
        let inner = Arc::new(CountingService {
            inner: store,
            calls: Arc::clone(&calls),
            fail_writes: AtomicBool::new(false),
            fail_shows: AtomicBool::new(false),
        });
        let service = Arc::new(
            CachedTaskService::new(
                Arc::clone(&inner),
                Arc::new(TaskCache::new()),
                Arc::new(WorkerPool::new(2)),
            )
            .with_policy(policy),
        );

        Self {
            service,
            inner,
            calls,
            user,
        }
    }

    /// Let queued cache maintenance finish.
    async fn settle(&self) {
        self.service.pool().wait().await;
    }

    fn shows(&self) -> usize {
        self.calls.shows.load(Ordering::SeqCst)
    }

    fn lists(&self) -> usize {
        self.calls.lists.load(Ordering::SeqCst)
    }

    async fn create(&self, title: &str, parent: Option<i64>) -> Task {
        let mut input = NewTask::new(self.user, title);
        input.parent_id = parent;
        self.service.create(&ctx(), input).await.unwrap()
    }
}

fn ctx() -> CancellationToken {
    CancellationToken::new()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn show_hit_does_not_reach_the_store() {
    let h = Harness::new();
    let root = h.create("Root", None).await;
    h.settle().await;

    let before = h.shows();
    let shown = h.service.show(&ctx(), root.id).await.unwrap();
    h.settle().await;

    assert_eq!(shown.id, root.id);
    assert_eq!(h.shows(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn show_miss_populates_the_cache() {
    let h = Harness::new();
    let root = h.create("Root", None).await;
    h.settle().await;
    h.service.cache().clear();

    let before = h.shows();
    h.service.show(&ctx(), root.id).await.unwrap();
    h.service.show(&ctx(), root.id).await.unwrap();
    h.settle().await;

    assert_eq!(h.shows(), before + 1);
    assert!(h.service.cache().get_task(root.id).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn show_hit_refreshes_when_configured() {
    let h = Harness::with_policy(RefreshPolicy {
        list_on_hit: false,
        task_on_hit: true,
    });
    let root = h.create("Root", None).await;
    h.settle().await;

    let before = h.shows();
    h.service.show(&ctx(), root.id).await.unwrap();
    h.settle().await;
    assert_eq!(h.shows(), before + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_hit_schedules_a_refresh() {
    let h = Harness::new();
    h.create("Root", None).await;
    h.settle().await;

    h.service.list(&ctx(), h.user).await.unwrap();
    h.settle().await;
    let before = h.lists();

    let tasks = h.service.list(&ctx(), h.user).await.unwrap();
    assert_eq!(tasks.len(), 1);
    h.settle().await;
    assert_eq!(h.lists(), before + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_hit_with_cancelled_context_skips_refresh() {
    let h = Harness::new();
    h.create("Root", None).await;
    h.service.list(&ctx(), h.user).await.unwrap();
    h.settle().await;
    let before = h.lists();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let tasks = h.service.list(&cancelled, h.user).await.unwrap();
    h.settle().await;

    assert_eq!(tasks.len(), 1);
    assert_eq!(h.lists(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn show_after_write_sees_the_write() {
    let h = Harness::new();
    let root = h.create("Root", None).await;
    h.service.show(&ctx(), root.id).await.unwrap();

    h.service
        .change_priority(&ctx(), root.id, Priority::High)
        .await
        .unwrap();

    // No settling: the write itself corrected the entry.
    let shown = h.service.show(&ctx(), root.id).await.unwrap();
    assert_eq!(shown.priority, Priority::High);

    h.settle().await;
    let shown = h.service.show(&ctx(), root.id).await.unwrap();
    assert_eq!(shown.priority, Priority::High);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn child_write_invalidates_cached_ancestors() {
    let h = Harness::new();
    let root = h.create("Root", None).await;
    let mid = h.create("Mid", Some(root.id)).await;
    let leaf = h.create("Leaf", Some(mid.id)).await;
    h.settle().await;

    let tree = h.service.show(&ctx(), root.id).await.unwrap();
    assert_eq!(tree.total_count, 2);
    assert_eq!(tree.completed_count, 0);

    h.service.complete(&ctx(), leaf.id).await.unwrap();

    let tree = h.service.show(&ctx(), root.id).await.unwrap();
    assert_eq!(tree.completed_count, 1);
    assert_eq!(tree.progress, 0.5);
    let mid_tree = h.service.show(&ctx(), mid.id).await.unwrap();
    assert_eq!(mid_tree.progress, 1.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn new_child_appears_in_cached_parent() {
    let h = Harness::new();
    let root = h.create("Root", None).await;
    h.settle().await;
    assert!(h.service.show(&ctx(), root.id).await.unwrap().sub_tasks.is_empty());

    let child = h.create("Child", Some(root.id)).await;

    let tree = h.service.show(&ctx(), root.id).await.unwrap();
    assert_eq!(tree.sub_tasks.len(), 1);
    assert_eq!(tree.sub_tasks[0].id, child.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_after_write_is_not_stale() {
    let h = Harness::new();
    h.create("First", None).await;
    assert_eq!(h.service.list(&ctx(), h.user).await.unwrap().len(), 1);

    h.create("Second", None).await;

    let titles: Vec<String> = h
        .service
        .list(&ctx(), h.user)
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, vec!["First", "Second"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_write_leaves_cache_untouched() {
    let h = Harness::new();
    let root = h.create("Root", None).await;
    h.service.list(&ctx(), h.user).await.unwrap();
    h.settle().await;

    let task_key = CacheKey::Task(root.id);
    let list_key = CacheKey::UserTasks(h.user);
    let task_gen = h.service.cache().generation(&task_key);
    let list_gen = h.service.cache().generation(&list_key);
    let cached = h.service.cache().get_task(root.id);

    h.inner.fail_writes.store(true, Ordering::SeqCst);
    let err = h
        .service
        .update(&ctx(), root.id, TaskPatch::priority(Priority::Low))
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::Internal(_)));
    h.settle().await;

    assert_eq!(h.service.cache().generation(&task_key), task_gen);
    assert_eq!(h.service.cache().generation(&list_key), list_gen);
    assert_eq!(h.service.cache().get_task(root.id), cached);
    assert!(h.service.cache().get_list(h.user).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_drops_descendants_and_refreshes_ancestors() {
    let h = Harness::new();
    let root = h.create("Root", None).await;
    let child = h.create("Child", Some(root.id)).await;
    let grandchild = h.create("Grandchild", Some(child.id)).await;
    h.settle().await;

    for id in [root.id, child.id, grandchild.id] {
        h.service.show(&ctx(), id).await.unwrap();
    }
    h.service.list(&ctx(), h.user).await.unwrap();

    h.service.delete(&ctx(), child.id).await.unwrap();

    assert!(h.service.cache().get_task(child.id).is_none());
    assert!(h.service.cache().get_task(grandchild.id).is_none());
    assert!(h.service.show(&ctx(), child.id).await.unwrap_err().is_not_found());
    assert!(h.service.show(&ctx(), grandchild.id).await.unwrap_err().is_not_found());

    let tree = h.service.show(&ctx(), root.id).await.unwrap();
    assert!(tree.sub_tasks.is_empty());

    let roots = h.service.list(&ctx(), h.user).await.unwrap();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].total_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_delete_keeps_cached_tree() {
    let h = Harness::new();
    let root = h.create("Root", None).await;
    h.settle().await;

    let err = h.service.delete(&ctx(), 9999).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(h.service.cache().get_task(root.id).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_refresh_survives_caller_cancellation() {
    let h = Harness::new();
    let caller = CancellationToken::new();
    let root = h
        .service
        .create(&caller, NewTask::new(h.user, "Root"))
        .await
        .unwrap();
    caller.cancel();
    h.settle().await;

    // The queued warm-up ran with its own context and filled the list.
    assert!(h.service.cache().get_list(h.user).is_some());
    assert!(h.service.cache().get_task(root.id).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_of_uncached_task_resolves_owner_from_store() {
    let h = Harness::new();
    let keep = h.create("Keep", None).await;
    let doomed = h.create("Doomed", None).await;
    h.settle().await;
    assert_eq!(h.service.list(&ctx(), h.user).await.unwrap().len(), 2);
    h.settle().await;

    h.service.cache().invalidate(&CacheKey::Task(doomed.id));
    let before = h.shows();

    h.service.delete(&ctx(), doomed.id).await.unwrap();
    assert_eq!(h.shows(), before + 1);

    let ids: Vec<i64> = h
        .service
        .list(&ctx(), h.user)
        .await
        .unwrap()
        .iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, vec![keep.id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_with_unknown_owner_keeps_list_entry() {
    let h = Harness::new();
    let doomed = h.create("Doomed", None).await;
    h.settle().await;
    h.service.list(&ctx(), h.user).await.unwrap();
    h.settle().await;

    let list_key = CacheKey::UserTasks(h.user);
    let list_gen = h.service.cache().generation(&list_key);
    h.service.cache().invalidate(&CacheKey::Task(doomed.id));
    h.inner.fail_shows.store(true, Ordering::SeqCst);

    h.service.delete(&ctx(), doomed.id).await.unwrap();
    h.settle().await;

    // The store no longer has the task, but the list entry was left alone.
    assert!(h.service.cache().get_task(doomed.id).is_none());
    assert_eq!(h.service.cache().generation(&list_key), list_gen);
    let cached = h.service.cache().get_list(h.user).unwrap();
    assert!(cached.iter().any(|t| t.id == doomed.id));
    assert!(h.inner.list(&ctx(), h.user).await.unwrap().is_empty());
}

const PRIORITIES: [Priority; 3] = [Priority::Low, Priority::Medium, Priority::High];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_converge_on_store_state() {
    let h = Harness::new();
    let mut roots = Vec::new();
    for i in 0..4 {
        let root = h.create(&format!("Root {}", i), None).await;
        h.create(&format!("Child {}", i), Some(root.id)).await;
        roots.push(root.id);
    }

    let mut handles = Vec::new();
    for (caller, &root_id) in roots.iter().enumerate() {
        let service = Arc::clone(&h.service);
        let others = roots.clone();
        let user = h.user;
        handles.push(tokio::spawn(async move {
            let ctx = CancellationToken::new();
            let mut last = None;
            for round in 0..20 {
                let patch = TaskPatch {
                    title: Some(format!("Root {} v{}", caller, round)),
                    priority: Some(PRIORITIES[round % PRIORITIES.len()]),
                    ..Default::default()
                };
                last = Some(service.update(&ctx, root_id, patch).await.unwrap());
                service.list(&ctx, user).await.unwrap();
                for &other in &others {
                    service.show(&ctx, other).await.unwrap();
                }
            }
            (root_id, last)
        }));
    }

    let mut last_writes = Vec::new();
    for handle in handles {
        let (root_id, last) = handle.await.unwrap();
        last_writes.push((root_id, last.unwrap()));
    }
    h.settle().await;

    for (root_id, last) in last_writes {
        let shown = h.service.show(&ctx(), root_id).await.unwrap();
        assert_eq!(shown, last);
    }

    let cached = h.service.list(&ctx(), h.user).await.unwrap();
    let authoritative = h.inner.list(&ctx(), h.user).await.unwrap();
    assert_eq!(cached, authoritative);
}
