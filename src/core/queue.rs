//! Priority-ordered worker pool for asynchronous jobs.
//!
//! Jobs are enqueued as zero-argument factories tagged with an integer
//! priority (lower runs first). Workers are tokio tasks draining a binary
//! heap; among items simultaneously queued, ordering is strict priority then
//! FIFO via a monotonically increasing sequence counter. One job's failure
//! or panic is logged and never takes down a worker loop.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::core::error::{AppResult, RuntimeError};

/// Boxed unit of work produced by a task factory at dequeue time.
pub type TaskFuture = Pin<Box<dyn Future<Output = AppResult<()>> + Send>>;

/// Deferred job construction: invoked by a worker, never at enqueue time.
type TaskFactory = Box<dyn FnOnce() -> TaskFuture + Send>;

/// Heap entry ordering jobs by priority, then enqueue sequence.
struct QueuedTask {
    priority: i32,
    seq: u64,
    factory: TaskFactory,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap: reverse both keys so the lowest priority
        // number wins, and the earliest sequence wins within a priority.
        match other.priority.cmp(&self.priority) {
            CmpOrdering::Equal => other.seq.cmp(&self.seq),
            unequal => unequal,
        }
    }
}

struct QueueShared {
    heap: Mutex<BinaryHeap<QueuedTask>>,
    notify: Notify,
    draining: AtomicBool,
    seq: AtomicU64,
}

/// Worker pool draining a priority-ordered work queue.
///
/// `start` is idempotent; `stop` is a graceful drain that processes every
/// already-enqueued item before returning. A stopped queue can be started
/// again and will pick up anything enqueued in the meantime.
pub struct PriorityTaskQueue {
    workers: usize,
    shared: Arc<QueueShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl PriorityTaskQueue {
    /// Create a queue served by `workers` concurrent consumer loops.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            shared: Arc::new(QueueShared {
                heap: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                draining: AtomicBool::new(false),
                seq: AtomicU64::new(0),
            }),
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the worker loops.
    ///
    /// A no-op if the queue is already running, or while a `stop` drain is
    /// still in flight (workers spawned mid-drain would exit with the
    /// drain, leaving a running queue with no consumers).
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if self.shared.draining.load(Ordering::SeqCst)
            || self.running.swap(true, Ordering::SeqCst)
        {
            return;
        }
        for worker_id in 0..self.workers {
            let shared = Arc::clone(&self.shared);
            handles.push(tokio::spawn(worker_loop(shared, worker_id)));
        }
        debug!(workers = self.workers, "priority queue started");
    }

    /// Queue `factory` to be executed with the given priority.
    ///
    /// Lower priority numbers are more urgent. The factory is only invoked
    /// when a worker claims the item; enqueueing never blocks and returns no
    /// result to the caller.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::QueueClosed`] while a `stop` drain is in flight.
    pub fn enqueue<F, Fut>(&self, factory: F, priority: i32) -> Result<(), RuntimeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        if self.shared.draining.load(Ordering::SeqCst) {
            return Err(RuntimeError::QueueClosed(
                "priority queue is draining".into(),
            ));
        }
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        self.shared.heap.lock().push(QueuedTask {
            priority,
            seq,
            factory: Box::new(move || Box::pin(factory())),
        });
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Number of items waiting to be claimed by a worker.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.heap.lock().len()
    }

    /// Drain remaining queued items, then stop the workers.
    ///
    /// Already-enqueued items are never dropped; this waits until every
    /// worker has processed its share and exited. A no-op if not running.
    pub async fn stop(&self) {
        // Flag transitions share the handles lock with start() so a start
        // cannot slip between the running swap and the drain flag.
        let handles = {
            let mut handles = self.handles.lock();
            if !self.running.swap(false, Ordering::SeqCst) {
                return;
            }
            self.shared.draining.store(true, Ordering::SeqCst);
            self.shared.notify.notify_waiters();
            std::mem::take(&mut *handles)
        };
        for handle in handles {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    error!("priority worker panicked during drain");
                }
            }
        }
        self.shared.draining.store(false, Ordering::SeqCst);
        debug!("priority queue stopped");
    }
}

async fn worker_loop(shared: Arc<QueueShared>, worker_id: usize) {
    loop {
        let next = shared.heap.lock().pop();
        if let Some(task) = next {
            debug!(
                worker_id,
                priority = task.priority,
                seq = task.seq,
                "running queued task"
            );
            run_isolated(task).await;
            continue;
        }

        // Register interest before re-checking the drain flag so a stop (or
        // enqueue) landing in between cannot be missed.
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if shared.draining.load(Ordering::SeqCst) {
            break;
        }
        notified.await;
    }
    debug!(worker_id, "priority worker exiting");
}

/// Run one claimed task, containing its failure or panic.
async fn run_isolated(task: QueuedTask) {
    let seq = task.seq;
    let factory = task.factory;
    // A nested spawn turns a panic into a JoinError instead of unwinding
    // through the worker loop.
    match tokio::spawn(async move { factory().await }).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(seq, error = %err, "queued task failed"),
        Err(join_err) => {
            if join_err.is_panic() {
                error!(seq, "queued task panicked");
            }
        }
    }
}
