//! Runtime configuration structures.

use serde::{Deserialize, Serialize};

/// Worker-count configuration for one task queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Number of concurrent consumer loops.
    pub workers: usize,
}

/// Circuit-breaker defaults applied to guarded call sites.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub max_failures: u32,
    /// Cooldown in milliseconds before a semi-open attempt is allowed.
    pub reset_timeout_ms: u64,
}

/// Root runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Priority queue worker pool.
    pub priority_queue: QueueConfig,
    /// Background queue worker pool.
    pub background_queue: QueueConfig,
    /// Breaker defaults for external dependencies.
    pub breaker: BreakerConfig,
}

impl Default for QueueConfig {
    fn default() -> Self {
        // Embedded hosts have few cores; cap the default pool accordingly.
        Self {
            workers: num_cpus::get().clamp(1, 4),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 3,
            reset_timeout_ms: 30_000,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            priority_queue: QueueConfig::default(),
            background_queue: QueueConfig { workers: 1 },
            breaker: BreakerConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Validate queue configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".into());
        }
        Ok(())
    }
}

impl BreakerConfig {
    /// Validate breaker configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_failures == 0 {
            return Err("max_failures must be greater than 0".into());
        }
        if self.reset_timeout_ms == 0 {
            return Err("reset_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }
}

impl RuntimeConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// A description of the first invalid section.
    pub fn validate(&self) -> Result<(), String> {
        self.priority_queue
            .validate()
            .map_err(|e| format!("priority_queue invalid: {e}"))?;
        self.background_queue
            .validate()
            .map_err(|e| format!("background_queue invalid: {e}"))?;
        self.breaker
            .validate()
            .map_err(|e| format!("breaker invalid: {e}"))?;
        Ok(())
    }

    /// Parse runtime configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Parse failures and validation failures, as a description.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
