use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use magpie_api::delivery::EventDelivery;
use magpie_api::errors::SystemError;
use magpie_api::pool::{ExecutorPool, PoolId, PoolKind};
use magpie_api::schedule::{SchedulerQueue, SchedulerQueueReader};
use magpie_api::stats::{ExecutorPoolStats, ExecutorThreadStats};

use crate::cpu::config::IoPoolConfig;
use crate::cpu::pool::{run_task, PoolStatus, Task, ThreadStatsCell};

/// How long an idle IO worker blocks on the channel before re-checking
/// the stop flag.
const IO_IDLE_TICK: Duration = Duration::from_millis(10);

/// Fixed-size executor pool for blocking operations.
///
/// Workers pull from a bounded channel; submission fails fast when the
/// queue is full rather than blocking the caller. IO pools are never
/// rebalanced and hold no harmonizer binding.
pub struct IoExecutorPool {
    pool_id: PoolId,
    config: IoPoolConfig,

    /// Bounded work feed
    tx: flume::Sender<Task>,
    rx: flume::Receiver<Task>,

    workers: Mutex<Vec<JoinHandle<()>>>,
    thread_stats: Vec<Arc<ThreadStatsCell>>,
    scheduler_queues: Mutex<Vec<SchedulerQueueReader>>,
    #[allow(dead_code)]
    delivery: Mutex<Option<Arc<dyn EventDelivery>>>,
    status: AtomicUsize,
    accepting: AtomicBool,
    stopping: Arc<AtomicBool>,
}

impl fmt::Debug for IoExecutorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoExecutorPool")
            .field("pool_id", &self.pool_id)
            .field("threads", &self.config.threads)
            .field("pending", &self.rx.len())
            .finish()
    }
}

impl IoExecutorPool {
    pub fn new(config: IoPoolConfig) -> Arc<Self> {
        let (tx, rx) = flume::bounded(config.queue_capacity);
        let thread_stats = (0..config.threads)
            .map(|_| Arc::new(ThreadStatsCell::default()))
            .collect();
        Arc::new(Self {
            pool_id: config.pool_id,
            tx,
            rx,
            workers: Mutex::new(Vec::with_capacity(config.threads)),
            thread_stats,
            scheduler_queues: Mutex::new(Vec::new()),
            delivery: Mutex::new(None),
            status: AtomicUsize::new(PoolStatus::Initializing as usize),
            accepting: AtomicBool::new(true),
            stopping: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Submit a blocking work item.
    pub fn submit(&self, task: Task) -> Result<(), SystemError> {
        if !self.accepting.load(Ordering::Relaxed) {
            return Err(SystemError::ShuttingDown);
        }
        self.tx.try_send(task).map_err(|err| match err {
            flume::TrySendError::Full(_) => SystemError::QueueFull {
                capacity: self.config.queue_capacity,
            },
            flume::TrySendError::Disconnected(_) => SystemError::ShuttingDown,
        })
    }

    /// Work items waiting in the channel.
    pub fn queue_depth(&self) -> usize {
        self.rx.len()
    }

    /// The delayed-execution queues created at prepare time.
    pub fn schedule_readers(&self) -> Vec<SchedulerQueueReader> {
        self.scheduler_queues.lock().unwrap().clone()
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus::from_usize(self.status.load(Ordering::Relaxed))
    }

    fn spawn_worker(&self, worker_id: usize) -> JoinHandle<()> {
        let rx = self.rx.clone();
        let stats = self.thread_stats[worker_id].clone();
        let stopping = self.stopping.clone();
        let pool_id = self.pool_id;

        thread::Builder::new()
            .name(format!("magpie-io-{}-{}", pool_id, worker_id))
            .spawn(move || {
                debug!(pool = pool_id, worker = worker_id, "io worker started");
                while !stopping.load(Ordering::Relaxed) {
                    match rx.recv_timeout(IO_IDLE_TICK) {
                        Ok(task) => run_task(task, &stats, pool_id),
                        Err(flume::RecvTimeoutError::Timeout) => continue,
                        Err(flume::RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(pool = pool_id, worker = worker_id, "io worker stopped");
            })
            .expect("Failed to spawn worker thread")
    }
}

impl ExecutorPool for IoExecutorPool {
    fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    fn kind(&self) -> PoolKind {
        PoolKind::Io
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
            capacity = self.config.queue_capacity,
            "io executor pool started"
        );
    }

    fn prepare_stop(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.status.store(PoolStatus::Draining as usize, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        self.accepting.store(false, Ordering::SeqCst);
        self.stopping.store(true, Ordering::SeqCst);
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
        let threads: Vec<ExecutorThreadStats> =
            self.thread_stats.iter().map(|cell| cell.snapshot()).collect();
        let stats = ExecutorPoolStats {
            current_thread_count: self.config.threads as f64,
            default_thread_count: self.config.threads,
            max_thread_count: self.config.threads,
            queue_depth: self.rx.len(),
            executed_tasks: threads.iter().map(|t| t.executed_tasks).sum(),
        };
        (stats, threads)
    }
}
