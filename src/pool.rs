//! Bounded worker pool for background cache maintenance.
//!
//! A fixed number of worker tasks pull units of work from a bounded queue
//! (capacity `10 × workers`). Each unit's outcome is handed to an observer
//! exactly once. `stop` drains everything that was accepted before shutting
//! the workers down.
//!
//! The pool must be started and used from within a Tokio runtime.

use crate::error::{TaskError, TaskResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Queue slots per worker.
pub const QUEUE_FACTOR: usize = 10;

/// A unit of work: an opaque future yielding success or an error.
pub type Job = Pin<Box<dyn Future<Output = TaskResult<()>> + Send + 'static>>;

/// Callback receiving the outcome of every unit of work.
pub type Observer = Arc<dyn Fn(&TaskResult<()>) + Send + Sync>;

/// Observer that logs failures at WARN.
pub fn log_outcome(result: &TaskResult<()>) {
    match result {
        Ok(()) => trace!("Background job finished"),
        Err(e) => warn!(error = %e, code = %e.code(), "Background job failed"),
    }
}

/// Count of accepted-but-unfinished units, with a wakeup for waiters.
#[derive(Default)]
struct Pending {
    count: AtomicUsize,
    drained: Notify,
}

impl Pending {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// One pending count held by a submission that has not reached the queue yet.
struct PendingGuard {
    pending: Arc<Pending>,
    armed: bool,
}

impl PendingGuard {
    fn new(pending: Arc<Pending>) -> Self {
        Self {
            pending,
            armed: true,
        }
    }

    /// The job is queued; a worker now owns the count.
    fn accepted(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.armed {
            self.pending.done();
        }
    }
}

#[derive(Default)]
struct PoolState {
    started: bool,
    closed: bool,
    sender: Option<mpsc::Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

/// Fixed-size pool of background workers.
pub struct WorkerPool {
    workers: usize,
    state: Mutex<PoolState>,
    pending: Arc<Pending>,
    shutdown: CancellationToken,
    observer: Observer,
}

impl WorkerPool {
    /// Create a pool of `workers` workers (at least one). Workers are not
    /// spawned until [`WorkerPool::start`] or the first submission.
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            state: Mutex::new(PoolState::default()),
            pending: Arc::new(Pending::default()),
            shutdown: CancellationToken::new(),
            observer: Arc::new(log_outcome),
        }
    }

    /// Tie the pool to a process-wide cancellation token. When `token` fires,
    /// idle workers exit and queued units are reported as cancelled.
    pub fn with_shutdown(mut self, token: &CancellationToken) -> Self {
        self.shutdown = token.child_token();
        self
    }

    /// Replace the default logging observer.
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&TaskResult<()>) + Send + Sync + 'static,
    {
        self.observer = Arc::new(observer);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn capacity(&self) -> usize {
        self.workers * QUEUE_FACTOR
    }

    /// Units accepted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Spawn the workers. Does nothing if already started or stopped.
    pub fn start(&self) {
        let mut state = self.state.lock().unwrap();
        self.start_locked(&mut state);
    }

    fn start_locked(&self, state: &mut PoolState) {
        if state.started || state.closed {
            return;
        }

        let (sender, receiver) = mpsc::channel::<Job>(self.capacity());
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        for worker in 0..self.workers {
            let handle = tokio::spawn(worker_loop(
                worker,
                Arc::clone(&receiver),
                Arc::clone(&self.pending),
                self.shutdown.clone(),
                Arc::clone(&self.observer),
            ));
            state.handles.push(handle);
        }

        state.sender = Some(sender);
        state.started = true;
        info!(workers = self.workers, capacity = self.capacity(), "Worker pool started");
    }

    /// Queue a unit of work, starting the pool if needed.
    ///
    /// Waits only while the queue is full. Returns `false` without running
    /// `job` if the pool has been stopped or cancelled.
    pub async fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = TaskResult<()>> + Send + 'static,
    {
        let sender = {
            let mut state = self.state.lock().unwrap();
            if state.closed || self.shutdown.is_cancelled() {
                debug!("Discarding job submitted to a stopped pool");
                return false;
            }
            self.start_locked(&mut state);
            self.pending.add();
            state.sender.clone()
        };

        // Released on every exit path except a completed send, including the
        // caller dropping this future while it waits for a free slot.
        let mut reservation = PendingGuard::new(Arc::clone(&self.pending));

        let Some(sender) = sender else {
            return false;
        };

        if sender.send(Box::pin(job)).await.is_err() {
            debug!("Worker queue closed before the job was accepted");
            return false;
        }
        reservation.accepted();
        true
    }

    /// Wait until every accepted unit has finished.
    pub async fn wait(&self) {
        self.pending.wait().await;
    }

    /// Reject new work, drain accepted work, then shut the workers down.
    ///
    /// Safe to call more than once; later calls return immediately.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
        }

        self.wait().await;
        self.shutdown.cancel();

        let (sender, handles) = {
            let mut state = self.state.lock().unwrap();
            (state.sender.take(), std::mem::take(&mut state.handles))
        };
        drop(sender);

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker exited abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    pending: Arc<Pending>,
    shutdown: CancellationToken,
    observer: Observer,
) {
    trace!(worker, "Worker started");
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                job = receiver.recv() => job,
            }
        };

        let Some(job) = job else {
            break;
        };

        // Run in its own task so a panicking job cannot take the worker down.
        let result = match tokio::spawn(job).await {
            Ok(result) => result,
            Err(e) => Err(TaskError::internal(format!("background job aborted: {}", e))),
        };
        observer(&result);
        pending.done();
    }

    // Anything still queued will never run; account for it so waiters return.
    let mut receiver = receiver.lock().await;
    receiver.close();
    while let Ok(job) = receiver.try_recv() {
        drop(job);
        observer(&Err(TaskError::Cancelled));
        pending.done();
    }
    trace!(worker, "Worker exited");
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
