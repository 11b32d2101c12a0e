//! # Wardrive Runtime
//!
//! The asynchronous execution and resource-lifecycle core of the wardrive
//! wireless-scanning platform.
//!
//! Every periodic job, background scan, and maintenance task in the platform
//! runs through this crate: analytics refresh, model retraining, continuous
//! RF scanning, database vacuuming, cloud sync. The host is a small embedded
//! board that must keep running unattended for weeks, so the design goals are
//! deterministic shutdown, strict failure isolation, and zero leaked file
//! handles, connections, or orphaned tasks.
//!
//! ## Core Components
//!
//! - **`PriorityTaskQueue`**: bounded worker pool draining a priority-ordered
//!   work queue. Lower priority numbers run first; ties preserve enqueue order.
//! - **`BackgroundTaskQueue`**: FIFO fire-and-forget runner for jobs with no
//!   ordering requirement (e.g. streaming scan results to storage).
//! - **`PollScheduler`**: named periodic callbacks with an immediate first
//!   fire, then a fixed cadence. Missed ticks are skipped, never backfilled.
//! - **`CircuitBreaker`**: per-call-site guard that stops invoking a failing
//!   external dependency for a cooldown period after repeated failures.
//! - **`ResourceManager`**: scoped ownership of files, SQLite connections,
//!   and spawned tasks, so one shutdown call releases everything.
//!
//! ## Typical Wiring
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use wardrive_runtime::core::{PollScheduler, PriorityTaskQueue};
//!
//! let queue = Arc::new(PriorityTaskQueue::new(2));
//! queue.start();
//!
//! let scheduler = PollScheduler::new();
//! let q = Arc::clone(&queue);
//! scheduler.schedule("analytics-refresh", move |_elapsed| {
//!     let q = Arc::clone(&q);
//!     async move {
//!         q.enqueue(|| async { refresh_analytics().await }, 1)?;
//!         Ok(())
//!     }
//! }, Duration::from_secs(60))?;
//!
//! // Shutdown: drain queues first, then hard-cancel tracked tasks.
//! scheduler.cancel_all();
//! queue.stop().await;
//! resources.cancel_all().await;
//! ```
//!
//! The scheduler's timing loop never performs real work itself; callbacks are
//! expected to return quickly and offload to a queue. Calls to unreliable
//! external services (cloud upload, sensor reads) go through a dedicated
//! [`core::CircuitBreaker`] per call site, and the distinct circuit-open
//! rejection is handled as a skip condition rather than a hard error.
//!
//! For complete examples, see the integration tests under `tests/`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling, queueing, and resource-lifecycle components.
pub mod core;
/// Configuration models for queues, the scheduler, and circuit breakers.
pub mod config;
/// Shared utilities.
pub mod util;
