use std::fmt;
use std::sync::Arc;

use crate::delivery::EventDelivery;
use crate::schedule::SchedulerQueueReader;
use crate::stats::{ExecutorPoolStats, ExecutorThreadStats};

/// Dense identifier of an executor pool, `0 <= PoolId < pool_count`.
/// Stable for the lifetime of the process.
pub type PoolId = usize;

/// Variant tag for executor pools.
///
/// The manager exposes typed views of its pool set (e.g. only the
/// basic pools) by filtering on this tag instead of downcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// General-purpose CPU-bound pool, eligible for thread lending.
    Basic,

    /// Fixed-size pool for blocking operations, never rebalanced.
    Io,

    /// Pool of threads not permanently owned by any basic pool.
    Shared,
}

/// Common interface for all executor pool implementations.
///
/// A pool owns its worker threads and a work queue. The CPU manager drives
/// every pool through the same lifecycle, in a fixed order relative to the
/// shared pool; see the manager for the ordering guarantees.
///
/// Lifecycle operations carry no error-return contract: with a valid
/// configuration they always succeed, and internal inconsistencies are
/// process-fatal rather than reported.
pub trait ExecutorPool: fmt::Debug + Send + Sync {
    /// Identifier of this pool within the manager's pool table.
    fn pool_id(&self) -> PoolId;

    /// Variant tag of this pool.
    fn kind(&self) -> PoolKind;

    /// Create this pool's per-thread delayed-execution queues and return
    /// their reader handles, binding the delivery handle the global timer
    /// facility will use for due events.
    fn prepare(&self, delivery: &Arc<dyn EventDelivery>) -> Vec<SchedulerQueueReader>;

    /// Begin servicing the work queue.
    fn start(&self);

    /// Stop accepting new work while draining what is already queued.
    fn prepare_stop(&self);

    /// Signal all worker threads to stop.
    fn shutdown(&self);

    /// Poll for terminal state. Returns true once every worker thread has
    /// been reclaimed; callers poll this in bounded rounds.
    fn cleanup(&self) -> bool;

    /// Point-in-time snapshot of pool and per-thread statistics.
    fn current_stats(&self) -> (ExecutorPoolStats, Vec<ExecutorThreadStats>);
}
