//! FIFO fire-and-forget runner for order-insensitive jobs.
//!
//! The lower-overhead companion to [`PriorityTaskQueue`]: no priority
//! bookkeeping, just an unbounded channel drained by a configurable number
//! of workers. Used for jobs like streaming scan results to storage where
//! completion order does not matter.
//!
//! [`PriorityTaskQueue`]: crate::core::PriorityTaskQueue

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::core::error::{AppResult, RuntimeError};
use crate::core::queue::TaskFuture;

type TaskFactory = Box<dyn FnOnce() -> TaskFuture + Send>;

/// FIFO worker pool for background jobs.
///
/// Shutdown follows the drop-the-sender pattern: `stop` closes the channel,
/// workers drain whatever is still buffered, then exit on their own.
pub struct BackgroundTaskQueue {
    workers: usize,
    tx: Mutex<Option<mpsc::UnboundedSender<TaskFactory>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl BackgroundTaskQueue {
    /// Create a queue served by `workers` concurrent consumer loops.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            tx: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Spawn the worker loops. A no-op if the queue is already running.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel::<TaskFactory>();
        *self.tx.lock() = Some(tx);

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut handles = self.handles.lock();
        for worker_id in 0..self.workers {
            let rx = Arc::clone(&rx);
            handles.push(tokio::spawn(worker_loop(rx, worker_id)));
        }
        debug!(workers = self.workers, "background queue started");
    }

    /// Schedule `factory` for execution by a worker.
    ///
    /// Multiple jobs may run concurrently depending on the configured worker
    /// count; completion order need not match enqueue order.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::QueueClosed`] if the queue has not been started or has
    /// been stopped.
    pub fn enqueue<F, Fut>(&self, factory: F) -> Result<(), RuntimeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<()>> + Send + 'static,
    {
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(RuntimeError::QueueClosed(
                "background queue is not running".into(),
            ));
        };
        tx.send(Box::new(move || Box::pin(factory())))
            .map_err(|_| RuntimeError::QueueClosed("background queue is draining".into()))
    }

    /// Drain pending work, then stop the workers.
    ///
    /// Closing the channel lets each worker finish the jobs already buffered
    /// before exiting; nothing enqueued is dropped. A no-op if not running.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        // Dropping the sender ends the stream once the buffer is empty.
        self.tx.lock().take();

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    error!("background worker panicked during drain");
                }
            }
        }
        debug!("background queue stopped");
    }
}

async fn worker_loop(
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<TaskFactory>>>,
    worker_id: usize,
) {
    loop {
        let factory = { rx.lock().await.recv().await };
        let Some(factory) = factory else {
            // Channel closed and drained.
            break;
        };
        match tokio::spawn(async move { factory().await }).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(worker_id, error = %err, "background task failed"),
            Err(join_err) => {
                if join_err.is_panic() {
                    error!(worker_id, "background task panicked");
                }
            }
        }
    }
    debug!(worker_id, "background worker exiting");
}
