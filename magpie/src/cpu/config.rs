use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use magpie_api::errors::ConfigError;
use magpie_api::pool::{ExecutorPool, PoolId};

/// Default interval a basic pool worker sleeps on an empty queue before
/// re-checking for work.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(10);

/// Default sustained-pressure threshold before the harmonizer lends a
/// thread, microseconds.
pub const DEFAULT_MAX_AVG_PING_US: u64 = 100_000;

// --- Pool Configuration ---

/// Configuration for a general-purpose, CPU-bound executor pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicPoolConfig {
    /// Identifier of the pool within the manager's pool table.
    pub pool_id: PoolId,

    /// Number of worker threads the pool owns outright.
    pub threads: usize,

    /// Thread count below which the pool is never a lending donor.
    pub min_threads: usize,

    /// Upper bound on the pool's thread budget, lending included.
    pub max_threads: Option<usize>,

    /// Whether the pool's nominal budget includes one thread leased from
    /// the shared pool instead of owned outright. When true, `threads`
    /// (and `max_threads` if set) are reduced by one at pool-creation time
    /// so the leased thread is not double counted.
    pub has_shared_thread: bool,

    /// Duration a worker sleeps on an empty queue before checking again.
    pub idle_timeout: Duration,

    /// Stack size for worker threads, bytes. None uses the platform default.
    pub thread_stack_size: Option<usize>,
}

impl Default for BasicPoolConfig {
    fn default() -> Self {
        Self {
            pool_id: 0,
            threads: num_cpus::get(),
            min_threads: 1,
            max_threads: None,
            has_shared_thread: false,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            thread_stack_size: None,
        }
    }
}

/// Configuration for a fixed-size blocking-work executor pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IoPoolConfig {
    /// Identifier of the pool within the manager's pool table.
    pub pool_id: PoolId,

    /// Number of worker threads. Fixed; IO pools are never rebalanced.
    pub threads: usize,

    /// Capacity of the bounded work queue feeding the workers.
    pub queue_capacity: usize,
}

impl Default for IoPoolConfig {
    fn default() -> Self {
        Self {
            pool_id: 0,
            threads: 1,
            queue_capacity: 1024,
        }
    }
}

/// Configuration for the shared pool: the total lendable thread supply.
///
/// The set of pools eligible to borrow is derived from the basic pool
/// configs (`has_shared_thread`) at setup time, not configured here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SharedPoolConfig {
    /// Total number of lendable threads.
    pub threads: usize,
}

/// Per-pool latency thresholds consumed by the harmonizer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PingConfig {
    /// Sustained queue pressure beyond this many microseconds makes the
    /// pool a borrow candidate.
    pub max_avg_ping_us: u64,
}

impl Default for PingConfig {
    fn default() -> Self {
        Self { max_avg_ping_us: DEFAULT_MAX_AVG_PING_US }
    }
}

// --- Manager Configuration ---

/// Configuration for the `CpuManager`.
///
/// Read once at manager construction and mutated in place only during pool
/// creation (the shared-thread netting adjustment); read-only afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CpuManagerConfig {
    /// Basic pool configurations.
    pub basic: Vec<BasicPoolConfig>,

    /// IO pool configurations.
    pub io: Vec<IoPoolConfig>,

    /// Shared pool configuration.
    pub shared: SharedPoolConfig,

    /// Per-pool ping thresholds, indexed by PoolId. May be shorter than
    /// the pool table; missing entries fall back to defaults.
    pub ping_info_by_pool: Vec<PingConfig>,
}

impl CpuManagerConfig {
    /// Check internal consistency against the pool table size.
    ///
    /// The manager itself treats a missing pool entry as fatal at pool
    /// creation; this pass lets a hosting process reject a bad table
    /// before construction.
    pub fn validate(&self, pool_count: usize) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for cfg in &self.basic {
            if !seen.insert(cfg.pool_id) {
                return Err(ConfigError::DuplicatePoolId(cfg.pool_id));
            }
            if cfg.threads == 0 {
                return Err(ConfigError::Invalid(format!(
                    "basic pool {} must have at least one thread",
                    cfg.pool_id
                )));
            }
            if cfg.min_threads > cfg.threads {
                return Err(ConfigError::Invalid(format!(
                    "basic pool {}: min_threads {} exceeds threads {}",
                    cfg.pool_id, cfg.min_threads, cfg.threads
                )));
            }
            if let Some(max) = cfg.max_threads {
                if max < cfg.threads {
                    return Err(ConfigError::Invalid(format!(
                        "basic pool {}: max_threads {} below threads {}",
                        cfg.pool_id, max, cfg.threads
                    )));
                }
            }
        }
        for cfg in &self.io {
            if !seen.insert(cfg.pool_id) {
                return Err(ConfigError::DuplicatePoolId(cfg.pool_id));
            }
            if cfg.threads == 0 {
                return Err(ConfigError::Invalid(format!(
                    "IO pool {} must have at least one thread",
                    cfg.pool_id
                )));
            }
        }
        for pool_id in 0..pool_count {
            if !seen.contains(&pool_id) {
                return Err(ConfigError::MissingPoolId(pool_id));
            }
        }
        let shared_homes = self.basic.iter().filter(|c| c.has_shared_thread).count();
        if shared_homes > self.shared.threads {
            return Err(ConfigError::Invalid(format!(
                "{} pools declare a shared thread but the shared pool supplies {}",
                shared_homes, self.shared.threads
            )));
        }
        Ok(())
    }
}

// --- System Setup ---

/// Setup descriptor the CPU manager is constructed from.
#[derive(Debug)]
pub struct ActorSystemSetup {
    /// Number of executor pools. Fixed at construction.
    pub pool_count: usize,

    /// Pool configurations, consumed when `executors` is None.
    pub cpu_manager: CpuManagerConfig,

    /// Explicit mode: an already-constructed pool array. When supplied,
    /// the shared pool and harmonizer machinery are bypassed entirely.
    pub executors: Option<Vec<Arc<dyn ExecutorPool>>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_config_defaults() {
        let config = BasicPoolConfig::default();
        assert_eq!(config.threads, num_cpus::get());
        assert_eq!(config.min_threads, 1);
        assert!(config.max_threads.is_none());
        assert!(!config.has_shared_thread);
        assert_eq!(config.idle_timeout, DEFAULT_IDLE_TIMEOUT);
    }

    #[test]
    fn validate_accepts_complete_table() {
        let config = CpuManagerConfig {
            basic: vec![
                BasicPoolConfig { pool_id: 0, threads: 2, ..Default::default() },
                BasicPoolConfig {
                    pool_id: 1,
                    threads: 2,
                    has_shared_thread: true,
                    ..Default::default()
                },
            ],
            io: vec![IoPoolConfig { pool_id: 2, ..Default::default() }],
            shared: SharedPoolConfig { threads: 1 },
            ping_info_by_pool: Vec::new(),
        };
        assert!(config.validate(3).is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_pool_id() {
        let config = CpuManagerConfig {
            basic: vec![
                BasicPoolConfig { pool_id: 0, threads: 1, ..Default::default() },
                BasicPoolConfig { pool_id: 0, threads: 1, ..Default::default() },
            ],
            ..Default::default()
        };
        assert_eq!(config.validate(1), Err(ConfigError::DuplicatePoolId(0)));
    }

    #[test]
    fn validate_rejects_missing_pool_id() {
        let config = CpuManagerConfig {
            basic: vec![BasicPoolConfig { pool_id: 0, threads: 1, ..Default::default() }],
            ..Default::default()
        };
        assert_eq!(config.validate(2), Err(ConfigError::MissingPoolId(1)));
    }

    #[test]
    fn validate_rejects_undersized_shared_supply() {
        let config = CpuManagerConfig {
            basic: vec![BasicPoolConfig {
                pool_id: 0,
                threads: 2,
                has_shared_thread: true,
                ..Default::default()
            }],
            shared: SharedPoolConfig { threads: 0 },
            ..Default::default()
        };
        assert!(matches!(config.validate(1), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_zero_threads() {
        let config = CpuManagerConfig {
            basic: vec![BasicPoolConfig { pool_id: 0, threads: 0, ..Default::default() }],
            ..Default::default()
        };
        assert!(matches!(config.validate(1), Err(ConfigError::Invalid(_))));
    }
}
