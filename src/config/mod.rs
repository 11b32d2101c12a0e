//! Configuration models for queues, the scheduler, and circuit breakers.

pub mod runtime;

pub use runtime::{BreakerConfig, QueueConfig, RuntimeConfig};
