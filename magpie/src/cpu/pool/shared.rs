use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use magpie_api::delivery::EventDelivery;
use magpie_api::errors::LendError;
use magpie_api::pool::{ExecutorPool, PoolId, PoolKind};
use magpie_api::schedule::{SchedulerQueue, SchedulerQueueReader};
use magpie_api::stats::{ExecutorPoolStats, ExecutorThreadStats};

use crate::cpu::config::SharedPoolConfig;
use crate::cpu::pool::{run_task, Pop, PoolStatus, TaskQueue, ThreadStatsCell};

/// How long a lent thread waits on an empty or closed queue before
/// re-checking its assignment.
const SHARED_POP_TICK: Duration = Duration::from_millis(5);

/// What a shared thread slot is currently doing.
enum SlotAssignment {
    /// Parked, waiting to be attributed to a pool
    Idle,

    /// Serving the given pool's work feed
    Serving { pool_id: PoolId, queue: Arc<TaskQueue> },

    /// Told to exit
    Stopping,
}

/// One physical lendable thread.
///
/// The assignment mutex is the handoff point between the lending ledger
/// and the thread itself: re-binding takes the lock, and the worker
/// re-reads the assignment at task boundaries, so a reclaimed thread
/// always finishes its in-flight task before serving anyone else.
pub(crate) struct SharedThreadSlot {
    index: usize,
    assignment: Mutex<SlotAssignment>,
    cond: Condvar,
}

impl SharedThreadSlot {
    fn new(index: usize) -> Self {
        Self {
            index,
            assignment: Mutex::new(SlotAssignment::Idle),
            cond: Condvar::new(),
        }
    }

    fn assign(&self, pool_id: PoolId, queue: Arc<TaskQueue>) {
        let mut assignment = self.assignment.lock().unwrap();
        if !matches!(*assignment, SlotAssignment::Stopping) {
            *assignment = SlotAssignment::Serving { pool_id, queue };
            self.cond.notify_all();
        }
    }

    fn release(&self) {
        let mut assignment = self.assignment.lock().unwrap();
        if !matches!(*assignment, SlotAssignment::Stopping) {
            *assignment = SlotAssignment::Idle;
        }
    }

    fn stop(&self) {
        *self.assignment.lock().unwrap() = SlotAssignment::Stopping;
        self.cond.notify_all();
    }
}

/// Handle to a shared thread leased to a basic pool at creation time.
pub struct SharedThread {
    slot: Arc<SharedThreadSlot>,
}

impl fmt::Debug for SharedThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedThread").field("index", &self.slot.index).finish()
    }
}

impl SharedThread {
    /// Slot index of this thread within the shared pool.
    pub fn index(&self) -> usize {
        self.slot.index
    }

    pub(crate) fn serve(&self, pool_id: PoolId, queue: Arc<TaskQueue>) {
        self.slot.assign(pool_id, queue);
    }
}

/// Read-only snapshot of the lending ledger.
///
/// `thread_by_pool[p]` is the home thread leased to pool `p` at creation;
/// `pool_by_borrowed_thread[t]` is the pool thread `t` is currently
/// attributed to (initially its home pool, None while idle);
/// `borrowed_thread_by_pool[p]` is the inverse view used by stats.
#[derive(Debug, Clone, Default)]
pub struct SharedPoolState {
    pub thread_by_pool: Vec<Option<usize>>,
    pub pool_by_borrowed_thread: Vec<Option<PoolId>>,
    pub borrowed_thread_by_pool: Vec<Option<usize>>,
}

struct LendLedger {
    state: SharedPoolState,
    next_home: usize,
    accepting: bool,
}

/// Bookkeeping and physical thread storage for threads that migrate
/// between pools.
///
/// The ledger behind a single mutex is the only record of who holds which
/// thread; `borrow_thread` / `return_thread` update it and re-bind the
/// physical slot in the same critical section, so two rebalance decisions
/// can never both claim one thread. Readers get consistent snapshots via
/// `get_state`.
pub struct SharedExecutorPool {
    config: SharedPoolConfig,
    pool_count: usize,

    /// Pools allowed to borrow, derived from the basic pool configs
    eligible: Vec<PoolId>,

    slots: Vec<Arc<SharedThreadSlot>>,
    ledger: Mutex<LendLedger>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    thread_stats: Vec<Arc<ThreadStatsCell>>,
    scheduler_queues: Mutex<Vec<SchedulerQueueReader>>,
    #[allow(dead_code)]
    delivery: Mutex<Option<Arc<dyn EventDelivery>>>,
    status: AtomicUsize,
}

impl fmt::Debug for SharedExecutorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedExecutorPool")
            .field("threads", &self.slots.len())
            .field("eligible", &self.eligible)
            .field("status", &PoolStatus::from_usize(self.status.load(Ordering::Relaxed)))
            .finish()
    }
}

impl SharedExecutorPool {
    /// Create the shared pool with `config.threads` lendable slots.
    pub fn new(config: SharedPoolConfig, pool_count: usize, eligible: Vec<PoolId>) -> Arc<Self> {
        let slots: Vec<Arc<SharedThreadSlot>> =
            (0..config.threads).map(|i| Arc::new(SharedThreadSlot::new(i))).collect();
        let thread_stats =
            (0..config.threads).map(|_| Arc::new(ThreadStatsCell::default())).collect();
        Arc::new(Self {
            pool_count,
            eligible,
            ledger: Mutex::new(LendLedger {
                state: SharedPoolState {
                    thread_by_pool: vec![None; pool_count],
                    pool_by_borrowed_thread: vec![None; config.threads],
                    borrowed_thread_by_pool: vec![None; pool_count],
                },
                next_home: 0,
                accepting: true,
            }),
            slots,
            workers: Mutex::new(Vec::with_capacity(config.threads)),
            thread_stats,
            scheduler_queues: Mutex::new(Vec::new()),
            delivery: Mutex::new(None),
            status: AtomicUsize::new(PoolStatus::Initializing as usize),
            config,
        })
    }

    /// Lease one thread to `pool_id` for the pool's lifetime.
    ///
    /// Called once per shared-thread pool during setup; the thread is
    /// recorded as the pool's home and attributed to it. Exhausting the
    /// supply here means the pool table and shared config disagree, which
    /// is a fatal configuration error.
    pub fn get_shared_thread(&self, pool_id: PoolId) -> SharedThread {
        let mut ledger = self.ledger.lock().unwrap();
        let index = ledger.next_home;
        if index >= self.slots.len() {
            panic!("shared thread supply exhausted leasing to pool {}", pool_id);
        }
        ledger.next_home += 1;
        ledger.state.thread_by_pool[pool_id] = Some(index);
        ledger.state.pool_by_borrowed_thread[index] = Some(pool_id);
        ledger.state.borrowed_thread_by_pool[pool_id] = Some(index);
        debug!(pool = pool_id, thread = index, "leased home shared thread");
        SharedThread { slot: self.slots[index].clone() }
    }

    /// Attribute the lowest-indexed idle thread to `pool_id` and bind it
    /// to the pool's work feed.
    ///
    /// This is the harmonizer's mutation path; the ledger update and the
    /// physical re-bind share one critical section.
    pub fn borrow_thread(
        &self,
        pool_id: PoolId,
        queue: &Arc<TaskQueue>,
    ) -> Result<usize, LendError> {
        if !self.eligible.contains(&pool_id) {
            return Err(LendError::NotEligible(pool_id));
        }
        let mut ledger = self.ledger.lock().unwrap();
        if !ledger.accepting {
            return Err(LendError::ShuttingDown);
        }
        if ledger.state.borrowed_thread_by_pool[pool_id].is_some() {
            return Err(LendError::AlreadyBorrowing(pool_id));
        }
        let index = (0..self.slots.len())
            .find(|&t| ledger.state.pool_by_borrowed_thread[t].is_none())
            .ok_or(LendError::Exhausted)?;
        ledger.state.pool_by_borrowed_thread[index] = Some(pool_id);
        ledger.state.borrowed_thread_by_pool[pool_id] = Some(index);
        self.slots[index].assign(pool_id, queue.clone());
        debug!(pool = pool_id, thread = index, "borrowed shared thread");
        Ok(index)
    }

    /// Reclaim the thread currently attributed to `pool_id`.
    ///
    /// The thread finishes its in-flight task, then parks until it is
    /// lent again.
    pub fn return_thread(&self, pool_id: PoolId) -> Result<usize, LendError> {
        let mut ledger = self.ledger.lock().unwrap();
        let index = ledger.state.borrowed_thread_by_pool[pool_id]
            .take()
            .ok_or(LendError::NotBorrowing(pool_id))?;
        ledger.state.pool_by_borrowed_thread[index] = None;
        self.slots[index].release();
        debug!(pool = pool_id, thread = index, "returned shared thread");
        Ok(index)
    }

    /// Consistent snapshot of the lending ledger.
    pub fn get_state(&self) -> SharedPoolState {
        self.ledger.lock().unwrap().state.clone()
    }

    /// Stats of the shared threads currently attributed to `pool_id`.
    pub fn get_shared_stats(&self, pool_id: PoolId) -> Vec<ExecutorThreadStats> {
        let ledger = self.ledger.lock().unwrap();
        (0..self.slots.len())
            .filter(|&t| ledger.state.pool_by_borrowed_thread[t] == Some(pool_id))
            .map(|t| self.thread_stats[t].snapshot())
            .collect()
    }

    /// Total lendable thread supply.
    pub fn thread_count(&self) -> usize {
        self.slots.len()
    }

    /// The delayed-execution queues created at prepare time.
    pub fn schedule_readers(&self) -> Vec<SchedulerQueueReader> {
        self.scheduler_queues.lock().unwrap().clone()
    }

    /// Number of pools in the manager's table this pool was sized for.
    pub fn pool_count(&self) -> usize {
        self.pool_count
    }

    fn spawn_worker(&self, index: usize) -> JoinHandle<()> {
        let slot = self.slots[index].clone();
        let stats = self.thread_stats[index].clone();

        thread::Builder::new()
            .name(format!("magpie-shared-{}", index))
            .spawn(move || {
                debug!(thread = index, "shared worker started");
                loop {
                    let serving = {
                        let mut assignment = slot.assignment.lock().unwrap();
                        loop {
                            match &*assignment {
                                SlotAssignment::Stopping => break None,
                                SlotAssignment::Serving { pool_id, queue } => {
                                    break Some((*pool_id, queue.clone()))
                                }
                                SlotAssignment::Idle => {
                                    assignment = slot.cond.wait(assignment).unwrap();
                                }
                            }
                        }
                    };
                    let Some((pool_id, queue)) = serving else { break };
                    match queue.pop_timeout(SHARED_POP_TICK) {
                        Pop::Task(task) => run_task(task, &stats, pool_id),
                        Pop::Empty => {}
                        // Served pool has closed its queue; hold the
                        // assignment and wait for a re-bind or stop.
                        Pop::Closed => thread::sleep(SHARED_POP_TICK),
                    }
                }
                debug!(thread = index, "shared worker stopped");
            })
            .expect("Failed to spawn worker thread")
    }
}

impl ExecutorPool for SharedExecutorPool {
    /// The shared pool sits outside the numbered pool table.
    fn pool_id(&self) -> PoolId {
        PoolId::MAX
    }

    fn kind(&self) -> PoolKind {
        PoolKind::Shared
    }

    fn prepare(&self, delivery: &Arc<dyn EventDelivery>) -> Vec<SchedulerQueueReader> {
        *self.delivery.lock().unwrap() = Some(delivery.clone());
        let readers: Vec<SchedulerQueueReader> = (0..self.slots.len())
            .map(|_| Arc::new(SchedulerQueue::new()))
            .collect();
        *self.scheduler_queues.lock().unwrap() = readers.clone();
        readers
    }

    fn start(&self) {
        let mut workers = self.workers.lock().unwrap();
        for index in 0..self.slots.len() {
            workers.push(self.spawn_worker(index));
        }
        self.status.store(PoolStatus::Running as usize, Ordering::SeqCst);
        info!(threads = self.slots.len(), "shared executor pool started");
    }

    fn prepare_stop(&self) {
        self.ledger.lock().unwrap().accepting = false;
        self.status.store(PoolStatus::Draining as usize, Ordering::SeqCst);
    }

    fn shutdown(&self) {
        for slot in &self.slots {
            slot.stop();
        }
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
            current_thread_count: self.slots.len() as f64,
            default_thread_count: self.config.threads,
            max_thread_count: self.config.threads,
            queue_depth: 0,
            executed_tasks: threads.iter().map(|t| t.executed_tasks).sum(),
        };
        (stats, threads)
    }
}
