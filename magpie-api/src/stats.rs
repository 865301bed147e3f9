use serde::Serialize;

/// Point-in-time snapshot of an executor pool.
///
/// `current_thread_count` is fractional: a thread leased from the shared
/// pool contributes 0.5 to each side of the lease, so that sums across
/// pools stay close to the physical thread count. This is a reporting
/// convention, not a scheduling input.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorPoolStats {
    /// Current thread budget, including fractional lending contributions.
    pub current_thread_count: f64,

    /// Thread count the pool was constructed with.
    pub default_thread_count: usize,

    /// Upper bound on the pool's thread budget.
    pub max_thread_count: usize,

    /// Work items waiting in the pool's queue.
    pub queue_depth: usize,

    /// Total work items executed since start.
    pub executed_tasks: u64,
}

/// Point-in-time snapshot of a single worker thread.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorThreadStats {
    /// Work items this thread has executed.
    pub executed_tasks: u64,

    /// Accumulated time spent executing work, microseconds.
    pub busy_time_us: u64,
}
