//! Core scheduling, queueing, and resource-lifecycle components.

pub mod background;
pub mod breaker;
pub mod error;
pub mod queue;
pub mod resources;
pub mod scheduler;

pub use background::BackgroundTaskQueue;
pub use breaker::{BreakerError, CircuitBreaker};
pub use error::{AppResult, RuntimeError};
pub use queue::{PriorityTaskQueue, TaskFuture};
pub use resources::{FileMode, ResourceManager};
pub use scheduler::{JobMetrics, PollScheduler, Pollable};
