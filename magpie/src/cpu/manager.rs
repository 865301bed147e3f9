use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use magpie_api::delivery::EventDelivery;
use magpie_api::pool::{ExecutorPool, PoolId, PoolKind};
use magpie_api::schedule::SchedulerQueueReader;
use magpie_api::stats::{ExecutorPoolStats, ExecutorThreadStats};

use crate::cpu::clock;
use crate::cpu::config::{ActorSystemSetup, CpuManagerConfig};
use crate::cpu::harmonizer::Harmonizer;
use crate::cpu::pool::basic::BasicExecutorPool;
use crate::cpu::pool::io::IoExecutorPool;
use crate::cpu::pool::shared::{SharedExecutorPool, SharedPoolState};

/// Pause between cleanup polling rounds, giving worker threads time to
/// reach a terminal state.
const CLEANUP_ROUND_TICK: Duration = Duration::from_millis(50);

/// Best-effort cleanup rounds during shutdown; stragglers are left for
/// the mandatory cleanup call.
const SHUTDOWN_CLEANUP_ROUNDS: usize = 3;

/// Hard cap on cleanup polling rounds; exceeding it is fatal.
const CLEANUP_MAX_ROUNDS: usize = 10;

/// Stats snapshot returned by [`CpuManager::get_pool_stats`].
#[derive(Debug, Default)]
pub struct PoolStatsSnapshot {
    /// Pool-level stats, thread count adjusted for lending.
    pub pool: ExecutorPoolStats,

    /// Per-thread stats of the pool's owned workers.
    pub threads: Vec<ExecutorThreadStats>,

    /// Stats of shared threads currently attributed to the pool.
    pub shared_threads: Vec<ExecutorThreadStats>,
}

enum CreatedPool {
    Basic(Arc<BasicExecutorPool>),
    Io(Arc<IoExecutorPool>),
}

impl CreatedPool {
    fn into_dyn(self) -> Arc<dyn ExecutorPool> {
        match self {
            CreatedPool::Basic(pool) => pool,
            CreatedPool::Io(pool) => pool,
        }
    }
}

/// Top-level owner of the process's execution pools.
///
/// Built from an [`ActorSystemSetup`]: either adopts an externally
/// supplied pool array (explicit mode, no shared pool and no harmonizer)
/// or constructs the pool set from configuration, wiring every pool into
/// the harmonizer.
///
/// Lifecycle ordering: the shared pool is prepared and started before the
/// numbered pools and stopped and cleaned up after them, so lent threads
/// stay valid for the full lifetime of the pools using them.
pub struct CpuManager {
    pool_count: usize,
    config: CpuManagerConfig,
    executors: Vec<Arc<dyn ExecutorPool>>,
    shared: Option<Arc<SharedExecutorPool>>,
    harmonizer: Option<Arc<Harmonizer>>,
}

impl fmt::Debug for CpuManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CpuManager")
            .field("pool_count", &self.pool_count)
            .field("shared", &self.shared.is_some())
            .finish()
    }
}

impl CpuManager {
    pub fn new(setup: ActorSystemSetup) -> Self {
        let mut manager = Self {
            pool_count: setup.pool_count,
            config: setup.cpu_manager,
            executors: Vec::new(),
            shared: None,
            harmonizer: None,
        };
        match setup.executors {
            // Explicit mode: the caller keeps full control and bypasses
            // the shared pool and harmonizer machinery.
            Some(executors) => manager.executors = executors,
            None => manager.setup(),
        }
        manager
    }

    fn setup(&mut self) {
        let available = num_cpus::get();
        debug!(cpus = available, pools = self.pool_count, "setting up cpu manager");

        let eligible: Vec<PoolId> = self
            .config
            .basic
            .iter()
            .filter(|cfg| cfg.has_shared_thread)
            .map(|cfg| cfg.pool_id)
            .collect();
        let shared = SharedExecutorPool::new(self.config.shared.clone(), self.pool_count, eligible);
        let harmonizer = Arc::new(Harmonizer::new(clock::now_us(), Some(shared.clone())));

        for pool_id in 0..self.pool_count {
            let created = self.create_executor_pool(pool_id, &shared, &harmonizer);
            let ping = self.config.ping_info_by_pool.get(pool_id).copied();
            match &created {
                CreatedPool::Basic(pool) => harmonizer.add_pool(pool_id, Some(pool), ping),
                CreatedPool::Io(_) => harmonizer.add_pool(pool_id, None, ping),
            }
            self.executors.push(created.into_dyn());
        }
        self.shared = Some(shared);
        self.harmonizer = Some(harmonizer);
    }

    fn create_executor_pool(
        &mut self,
        pool_id: PoolId,
        shared: &Arc<SharedExecutorPool>,
        harmonizer: &Arc<Harmonizer>,
    ) -> CreatedPool {
        for cfg in self.config.basic.iter_mut() {
            if cfg.pool_id == pool_id {
                if cfg.has_shared_thread {
                    // Net out the leased thread before construction so it
                    // is not counted both as owned and as shared.
                    cfg.threads -= 1;
                    if let Some(max) = cfg.max_threads.as_mut() {
                        *max -= 1;
                    }
                    let pool = BasicExecutorPool::new(cfg.clone(), Some(harmonizer.clone()));
                    pool.attach_shared_thread(shared.get_shared_thread(pool_id));
                    return CreatedPool::Basic(pool);
                }
                return CreatedPool::Basic(BasicExecutorPool::new(
                    cfg.clone(),
                    Some(harmonizer.clone()),
                ));
            }
        }
        for cfg in &self.config.io {
            if cfg.pool_id == pool_id {
                return CreatedPool::Io(IoExecutorPool::new(cfg.clone()));
            }
        }
        panic!("missing PoolId: {}", pool_id);
    }

    /// Collect every pool's scheduler-queue readers into `schedule_readers`
    /// for the global timer facility.
    ///
    /// Shared pool readers precede per-pool readers; consumers must not
    /// assume any further ordering.
    pub fn prepare_start(
        &self,
        schedule_readers: &mut Vec<SchedulerQueueReader>,
        delivery: &Arc<dyn EventDelivery>,
    ) {
        if let Some(shared) = &self.shared {
            schedule_readers.extend(shared.prepare(delivery));
        }
        for pool in &self.executors {
            schedule_readers.extend(pool.prepare(delivery));
        }
    }

    /// Start every pool, shared pool first.
    pub fn start(&self) {
        if let Some(shared) = &self.shared {
            shared.start();
        }
        for pool in &self.executors {
            pool.start();
        }
        info!(pools = self.executors.len(), "cpu manager started");
    }

    /// Stop accepting new work on every pool, shared pool last.
    pub fn prepare_stop(&self) {
        for pool in &self.executors {
            pool.prepare_stop();
        }
        if let Some(shared) = &self.shared {
            shared.prepare_stop();
        }
    }

    /// Signal every pool to stop, then make a bounded best-effort pass at
    /// cleaning them up. Pools that fail to reach a terminal state here
    /// are left for the mandatory `cleanup` call. Shared pool last.
    pub fn shutdown(&self) {
        for pool in &self.executors {
            pool.shutdown();
        }
        let total = self.executors.len();
        let mut done = 0;
        let mut round = 0;
        while done < total && round < SHUTDOWN_CLEANUP_ROUNDS {
            done = self.executors.iter().filter(|pool| pool.cleanup()).count();
            round += 1;
            if done < total && round < SHUTDOWN_CLEANUP_ROUNDS {
                thread::sleep(CLEANUP_ROUND_TICK);
            }
        }
        if let Some(shared) = &self.shared {
            shared.shutdown();
            shared.cleanup();
        }
        debug!(done, total, rounds = round, "cpu manager shutdown pass finished");
    }

    /// Poll every pool to a terminal state and release pool storage.
    ///
    /// Fatal if any pool fails to terminate within the round cap: the
    /// runtime cannot safely finish tearing down around live threads.
    pub fn cleanup(&mut self) {
        let total = self.executors.len();
        let mut round = 0;
        loop {
            assert!(
                round < CLEANUP_MAX_ROUNDS,
                "actor system cleanup could not be completed in {} rounds",
                CLEANUP_MAX_ROUNDS
            );
            let done = self.executors.iter().filter(|pool| pool.cleanup()).count();
            if done == total {
                break;
            }
            round += 1;
            thread::sleep(CLEANUP_ROUND_TICK);
        }
        if let Some(shared) = &self.shared {
            let mut round = 0;
            while !shared.cleanup() {
                round += 1;
                assert!(
                    round < CLEANUP_MAX_ROUNDS,
                    "shared pool cleanup could not be completed in {} rounds",
                    CLEANUP_MAX_ROUNDS
                );
                thread::sleep(CLEANUP_ROUND_TICK);
            }
        }
        self.executors.clear();
        self.shared = None;
        self.harmonizer = None;
        info!("cpu manager cleaned up");
    }

    /// Number of numbered executor pools. Fixed at construction.
    pub fn pool_count(&self) -> usize {
        self.pool_count
    }

    /// The pool array, indexed by PoolId.
    pub fn executor_pools(&self) -> &[Arc<dyn ExecutorPool>] {
        &self.executors
    }

    /// Only the basic-variant pools, selected by kind tag.
    pub fn get_basic_executor_pools(&self) -> Vec<Arc<dyn ExecutorPool>> {
        self.executors
            .iter()
            .filter(|pool| pool.kind() == PoolKind::Basic)
            .cloned()
            .collect()
    }

    /// The shared pool, when the manager was built from configuration.
    pub fn shared_pool(&self) -> Option<Arc<SharedExecutorPool>> {
        self.shared.clone()
    }

    /// The rebalancing engine, when the manager was built from
    /// configuration.
    pub fn harmonizer(&self) -> Option<Arc<Harmonizer>> {
        self.harmonizer.clone()
    }

    /// Read-only snapshot of the lending ledger.
    pub fn lending_state(&self) -> Option<SharedPoolState> {
        self.shared.as_ref().map(|shared| shared.get_state())
    }

    /// Stats snapshot for one pool, with `current_thread_count` adjusted
    /// for lending: +0.5 when a shared thread is attributed to the pool,
    /// -0.5 when the pool's home thread is attributed to a different
    /// pool. Out-of-range ids yield a default snapshot.
    pub fn get_pool_stats(&self, pool_id: PoolId) -> PoolStatsSnapshot {
        let mut snapshot = PoolStatsSnapshot::default();
        if pool_id < self.pool_count {
            if let Some(pool) = self.executors.get(pool_id) {
                let (pool_stats, thread_stats) = pool.current_stats();
                snapshot.pool = pool_stats;
                snapshot.threads = thread_stats;
            }
        }
        if let Some(shared) = &self.shared {
            snapshot.shared_threads = shared.get_shared_stats(pool_id);
            let state = shared.get_state();
            if state.borrowed_thread_by_pool.get(pool_id).copied().flatten().is_some() {
                snapshot.pool.current_thread_count += 0.5;
            }
            if let Some(home) = state.thread_by_pool.get(pool_id).copied().flatten() {
                if state.pool_by_borrowed_thread[home].is_some_and(|holder| holder != pool_id) {
                    snapshot.pool.current_thread_count -= 0.5;
                }
            }
        }
        snapshot
    }
}
