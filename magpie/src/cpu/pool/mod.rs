//! Executor pool implementations.
//!
//! Three variants behind the common [`ExecutorPool`] contract:
//! [`basic::BasicExecutorPool`] for CPU-bound actor work (lending-capable),
//! [`io::IoExecutorPool`] for blocking operations (fixed size) and
//! [`shared::SharedExecutorPool`] for the lendable thread supply.
//!
//! [`ExecutorPool`]: magpie_api::pool::ExecutorPool

pub mod basic;
pub mod io;
pub mod shared;

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::error;

use magpie_api::errors::SystemError;
use magpie_api::pool::PoolId;
use magpie_api::stats::ExecutorThreadStats;

/// A unit of actor work pulled and run by pool worker threads.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Outcome of a blocking pop against a [`TaskQueue`].
pub enum Pop {
    /// A task was dequeued.
    Task(Task),
    /// The wait timed out with the queue still open and empty.
    Empty,
    /// The queue has been closed; workers should exit.
    Closed,
}

/// Status codes shared by the pool implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// Pool is constructed but not yet servicing work
    Initializing = 0,

    /// Pool is servicing its queue
    Running = 1,

    /// Pool no longer accepts work but is draining what is queued
    Draining = 2,

    /// Worker threads have been signaled to stop
    ShuttingDown = 3,

    /// Every worker thread has been reclaimed
    Stopped = 4,
}

impl PoolStatus {
    pub(crate) fn from_usize(value: usize) -> PoolStatus {
        match value {
            0 => PoolStatus::Initializing,
            1 => PoolStatus::Running,
            2 => PoolStatus::Draining,
            3 => PoolStatus::ShuttingDown,
            _ => PoolStatus::Stopped,
        }
    }
}

struct QueueInner {
    jobs: VecDeque<Task>,
    accepting: bool,
    closed: bool,
}

/// The work feed of a basic pool.
///
/// Worker threads owned by the pool and shared threads currently lent to
/// it pull from the same queue, so a lent thread needs nothing beyond a
/// handle to this queue to start contributing.
///
/// # Thread Safety
/// - Mutex-protected deque with a condvar for blocking pops
/// - `close` wakes every waiter; a closed queue rejects pushes and makes
///   workers exit promptly even if tasks remain queued
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    cond: Condvar,
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("TaskQueue")
            .field("len", &inner.jobs.len())
            .field("accepting", &inner.accepting)
            .field("closed", &inner.closed)
            .finish()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                jobs: VecDeque::new(),
                accepting: true,
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Enqueue a task, waking one waiting worker.
    pub fn push(&self, task: Task) -> Result<(), SystemError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed || !inner.accepting {
            return Err(SystemError::ShuttingDown);
        }
        inner.jobs.push_back(task);
        drop(inner);
        self.cond.notify_one();
        Ok(())
    }

    /// Dequeue one task, blocking up to `timeout` for one to arrive.
    pub fn pop_timeout(&self, timeout: Duration) -> Pop {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Pop::Closed;
        }
        if let Some(task) = inner.jobs.pop_front() {
            return Pop::Task(task);
        }
        let (mut inner, _timed_out) = self.cond.wait_timeout(inner, timeout).unwrap();
        if inner.closed {
            return Pop::Closed;
        }
        match inner.jobs.pop_front() {
            Some(task) => Pop::Task(task),
            None => Pop::Empty,
        }
    }

    /// Stop accepting new work; queued tasks remain poppable.
    pub fn stop_accepting(&self) {
        self.inner.lock().unwrap().accepting = false;
    }

    /// Close the queue and wake every waiter.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.cond.notify_all();
    }

    /// Number of queued tasks. Snapshot only.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-thread execution counters, updated by the worker and read by stats
/// snapshots.
#[derive(Debug, Default)]
pub(crate) struct ThreadStatsCell {
    executed: AtomicU64,
    busy_us: AtomicU64,
}

impl ThreadStatsCell {
    pub(crate) fn record(&self, busy_us: u64) {
        self.executed.fetch_add(1, Ordering::Relaxed);
        self.busy_us.fetch_add(busy_us, Ordering::Relaxed);
    }

    pub(crate) fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshot(&self) -> ExecutorThreadStats {
        ExecutorThreadStats {
            executed_tasks: self.executed.load(Ordering::Relaxed),
            busy_time_us: self.busy_us.load(Ordering::Relaxed),
        }
    }
}

/// Run one task with panic isolation, recording execution time.
pub(crate) fn run_task(task: Task, stats: &ThreadStatsCell, pool_id: PoolId) {
    let started = Instant::now();
    if let Err(panic_error) = panic::catch_unwind(AssertUnwindSafe(task)) {
        let message = match panic_error.downcast::<String>() {
            Ok(text) => *text,
            Err(other) => format!("{:?}", other),
        };
        error!(pool = pool_id, "task panicked: {}", message);
    }
    stats.record(started.elapsed().as_micros() as u64);
}
