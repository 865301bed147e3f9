use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use magpie_api::delivery::EventDelivery;
use magpie_api::errors::SystemError;
use magpie_api::pool::{ExecutorPool, PoolId, PoolKind};
use magpie_api::schedule::{SchedulerQueue, SchedulerQueueReader};
use magpie_api::stats::{ExecutorPoolStats, ExecutorThreadStats};

use crate::cpu::clock;
use crate::cpu::config::BasicPoolConfig;
use crate::cpu::harmonizer::Harmonizer;
use crate::cpu::pool::shared::SharedThread;
use crate::cpu::pool::{run_task, Pop, PoolStatus, Task, TaskQueue, ThreadStatsCell};

/// General-purpose executor pool for CPU-bound actor work.
///
/// Owns a fixed set of worker threads pulling from one [`TaskQueue`]. A
/// pool constructed with a shared-thread lease additionally has one shared
/// pool thread attached at creation, serving the same queue; that thread
/// counts 0.5 toward the pool's own thread statistics, with the other half
/// accounted on the lending side.
///
/// # Worker Thread Behavior
/// 1. Pull a task from the queue, blocking up to the idle timeout
/// 2. Run it with panic isolation, recording execution time
/// 3. On idle wake-ups, give the harmonizer a chance to rebalance
/// 4. Exit promptly once the queue is closed
pub struct BasicExecutorPool {
    /// Pool identity within the manager's table
    pool_id: PoolId,

    /// Configuration after shared-thread netting
    config: BasicPoolConfig,

    /// Work feed shared with any lent threads
    queue: Arc<TaskQueue>,

    /// Rebalancing engine, driven from worker idle wake-ups
    harmonizer: Option<Arc<Harmonizer>>,

    /// Worker thread handles, reclaimed by cleanup
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Per-thread execution counters, one per owned worker
    thread_stats: Vec<Arc<ThreadStatsCell>>,

    /// Delayed-execution queues created at prepare time
    scheduler_queues: Mutex<Vec<SchedulerQueueReader>>,

    /// Delivery handle bound at prepare time for timer-driven events
    #[allow(dead_code)]
    delivery: Mutex<Option<Arc<dyn EventDelivery>>>,

    /// Current pool status
    status: AtomicUsize,

    /// Shared thread attached at creation, if the pool leases one
    home_shared: Mutex<Option<SharedThread>>,
}

impl fmt::Debug for BasicExecutorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicExecutorPool")
            .field("pool_id", &self.pool_id)
            .field("threads", &self.config.threads)
            .field("status", &self.status())
            .finish()
    }
}

impl BasicExecutorPool {
    /// Create a new pool from an already-netted configuration.
    pub fn new(config: BasicPoolConfig, harmonizer: Option<Arc<Harmonizer>>) -> Arc<Self> {
        let thread_stats = (0..config.threads)
            .map(|_| Arc::new(ThreadStatsCell::default()))
            .collect();
        Arc::new(Self {
            pool_id: config.pool_id,
            queue: Arc::new(TaskQueue::new()),
            harmonizer,
            workers: Mutex::new(Vec::with_capacity(config.threads)),
            thread_stats,
            scheduler_queues: Mutex::new(Vec::new()),
            delivery: Mutex::new(None),
            status: AtomicUsize::new(PoolStatus::Initializing as usize),
            home_shared: Mutex::new(None),
            config,
        })
    }

    /// Submit a unit of actor work to the pool.
    ///
    /// Work may be queued before `start`; it is held until workers exist.
    pub fn submit(&self, task: Task) -> Result<(), SystemError> {
        self.queue.push(task)
    }

    /// Bind the shared thread leased to this pool at creation time.
    ///
    /// The thread starts serving this pool's queue as soon as the shared
    /// pool is started.
    pub fn attach_shared_thread(&self, thread: SharedThread) {
        thread.serve(self.pool_id, self.queue.clone());
        debug!(pool = self.pool_id, thread = thread.index(), "attached shared thread");
        *self.home_shared.lock().unwrap() = Some(thread);
    }

    /// Whether a shared thread was attached at creation.
    pub fn has_shared_thread(&self) -> bool {
        self.home_shared.lock().unwrap().is_some()
    }

    /// Handle to the pool's work feed, used when lending threads to it.
    pub fn task_queue(&self) -> Arc<TaskQueue> {
        self.queue.clone()
    }

    /// Tasks currently waiting in the queue.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    /// The delayed-execution queues created at prepare time.
    pub fn schedule_readers(&self) -> Vec<SchedulerQueueReader> {
        self.scheduler_queues.lock().unwrap().clone()
    }

    /// Worker threads the pool owns outright.
    pub fn owned_threads(&self) -> usize {
        self.config.threads
    }

    /// Thread count below which the pool must not donate capacity.
    pub fn min_threads(&self) -> usize {
        self.config.min_threads
    }

    /// Upper bound on the pool's total thread budget, lease included.
    pub fn max_total_threads(&self) -> Option<usize> {
        self.config
            .max_threads
            .map(|max| max + usize::from(self.config.has_shared_thread))
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus::from_usize(self.status.load(Ordering::Relaxed))
    }

    fn spawn_worker(&self, worker_id: usize) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let stats = self.thread_stats[worker_id].clone();
        let harmonizer = self.harmonizer.clone();
        let idle_timeout = self.config.idle_timeout;
        let pool_id = self.pool_id;

        let mut builder =
            thread::Builder::new().name(format!("magpie-basic-{}-{}", pool_id, worker_id));
        if let Some(stack) = self.config.thread_stack_size {
            builder = builder.stack_size(stack);
        }
        builder
            .spawn(move || {
                debug!(pool = pool_id, worker = worker_id, "worker started");
                loop {
                    match queue.pop_timeout(idle_timeout) {
                        Pop::Task(task) => run_task(task, &stats, pool_id),
                        Pop::Empty => {
                            if let Some(harmonizer) = &harmonizer {
                                harmonizer.harmonize(clock::now_us());
                            }
                        }
                        Pop::Closed => break,
                    }
                }
                debug!(pool = pool_id, worker = worker_id, "worker stopped");
            })
            .expect("Failed to spawn worker thread")
    }
}

impl ExecutorPool for BasicExecutorPool {
    fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    fn kind(&self) -> PoolKind {
        PoolKind::Basic
    }

    fn prepare(&self, delivery: &Arc<dyn EventDelivery>) -> Vec<SchedulerQueueReader> {
        *self.delivery.lock().unwrap() = Some(delivery.clone());
        let readers: Vec<SchedulerQueueReader> = (0..self.config.threads)
            .map(|_| Arc::new(SchedulerQueue::new()))
            .collect();
        *self.scheduler_queues.lock().unwrap() = readers.clone();
        readers
    }

    fn start(&self) {
        let mut workers = self.workers.lock().unwrap();
        for worker_id in 0..self.config.threads {
            workers.push(self.spawn_worker(worker_id));
        }
        self.status.store(PoolStatus::Running as usize, Ordering::SeqCst);
        info!(
            pool = self.pool_id,
            threads = self.config.threads,
            shared = self.has_shared_thread(),
            "basic executor pool started"
        );
    }

    fn prepare_stop(&self) {
        self.queue.stop_accepting();
        self.status.store(PoolStatus::Draining as usize, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        self.queue.close();
        self.status.store(PoolStatus::ShuttingDown as usize, Ordering::SeqCst);
    }

    fn cleanup(&self) -> bool {
        let mut workers = self.workers.lock().unwrap();
        let mut remaining = Vec::with_capacity(workers.len());
        for handle in workers.drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                remaining.push(handle);
            }
        }
        *workers = remaining;
        if workers.is_empty() {
            self.status.store(PoolStatus::Stopped as usize, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn current_stats(&self) -> (ExecutorPoolStats, Vec<ExecutorThreadStats>) {
        let mut current = self.config.threads as f64;
        if self.has_shared_thread() {
            current += 0.5;
        }
        let threads: Vec<ExecutorThreadStats> =
            self.thread_stats.iter().map(|cell| cell.snapshot()).collect();
        let stats = ExecutorPoolStats {
            current_thread_count: current,
            default_thread_count: self.config.threads,
            max_thread_count: self.config.max_threads.unwrap_or(self.config.threads),
            queue_depth: self.queue.len(),
            executed_tasks: threads.iter().map(|t| t.executed_tasks).sum(),
        };
        (stats, threads)
    }
}
