// Integration tests for CpuManager construction, lifecycle and stats.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use magpie::cpu::config::{
    ActorSystemSetup, BasicPoolConfig, CpuManagerConfig, IoPoolConfig, SharedPoolConfig,
};
use magpie::{CpuManager, TaskQueue};
use magpie_api::delivery::{ActorAddr, BoxedEvent, EventDelivery};
use magpie_api::pool::{ExecutorPool, PoolId, PoolKind};
use magpie_api::schedule::{SchedulerQueue, SchedulerQueueReader};
use magpie_api::stats::{ExecutorPoolStats, ExecutorThreadStats};

#[derive(Debug)]
struct NullDelivery;

impl EventDelivery for NullDelivery {
    fn send(&self, _target: ActorAddr, _event: BoxedEvent, _cookie: u64, _channel: u32) {}
}

fn two_pool_setup() -> ActorSystemSetup {
    ActorSystemSetup {
        pool_count: 2,
        cpu_manager: CpuManagerConfig {
            basic: vec![
                BasicPoolConfig { pool_id: 0, threads: 4, ..Default::default() },
                BasicPoolConfig {
                    pool_id: 1,
                    threads: 3,
                    has_shared_thread: true,
                    ..Default::default()
                },
            ],
            io: Vec::new(),
            shared: SharedPoolConfig { threads: 1 },
            ping_info_by_pool: Vec::new(),
        },
        executors: None,
    }
}

#[test]
fn end_to_end_two_pool_scenario() {
    magpie::logging::init_test();
    let mut manager = CpuManager::new(two_pool_setup());
    assert_eq!(manager.pool_count(), 2);

    // Pool 0: four owned threads, no lending adjustment.
    let stats0 = manager.get_pool_stats(0);
    assert_eq!(stats0.pool.current_thread_count, 4.0);
    assert_eq!(stats0.pool.default_thread_count, 4);
    assert!(stats0.shared_threads.is_empty());

    // Pool 1: netted to two owned threads, leased thread restores the
    // advertised capacity of three.
    let stats1 = manager.get_pool_stats(1);
    assert_eq!(stats1.pool.default_thread_count, 2);
    assert_eq!(stats1.pool.current_thread_count, 3.0);
    assert_eq!(stats1.shared_threads.len(), 1);

    let state = manager.lending_state().unwrap();
    assert_eq!(state.thread_by_pool[0], None);
    assert_eq!(state.thread_by_pool[1], Some(0));
    assert_eq!(state.pool_by_borrowed_thread[0], Some(1));
    assert_eq!(state.borrowed_thread_by_pool[1], Some(0));

    // One reader per shared slot, then one per owned pool thread.
    let delivery: Arc<dyn EventDelivery> = Arc::new(NullDelivery);
    let mut readers = Vec::new();
    manager.prepare_start(&mut readers, &delivery);
    assert_eq!(readers.len(), 1 + 4 + 2);

    manager.start();
    manager.prepare_stop();
    manager.shutdown();
    manager.cleanup();

    assert!(manager.executor_pools().is_empty());
    assert!(manager.lending_state().is_none());
}

#[test]
fn io_pools_are_built_and_excluded_from_the_basic_view() {
    let setup = ActorSystemSetup {
        pool_count: 2,
        cpu_manager: CpuManagerConfig {
            basic: vec![BasicPoolConfig { pool_id: 0, threads: 2, ..Default::default() }],
            io: vec![IoPoolConfig { pool_id: 1, threads: 3, ..Default::default() }],
            shared: SharedPoolConfig { threads: 0 },
            ping_info_by_pool: Vec::new(),
        },
        executors: None,
    };
    let mut manager = CpuManager::new(setup);

    assert_eq!(manager.executor_pools().len(), 2);
    assert_eq!(manager.executor_pools()[1].kind(), PoolKind::Io);

    let basic = manager.get_basic_executor_pools();
    assert_eq!(basic.len(), 1);
    assert_eq!(basic[0].pool_id(), 0);

    let io_stats = manager.get_pool_stats(1);
    assert_eq!(io_stats.pool.current_thread_count, 3.0);

    manager.shutdown();
    manager.cleanup();
}

#[test]
fn stats_for_out_of_range_pool_are_default() {
    let manager = CpuManager::new(two_pool_setup());
    let snapshot = manager.get_pool_stats(7);
    assert_eq!(snapshot.pool.current_thread_count, 0.0);
    assert!(snapshot.threads.is_empty());
    assert!(snapshot.shared_threads.is_empty());
}

#[test]
fn fractional_stats_follow_the_lending_ledger() {
    let setup = ActorSystemSetup {
        pool_count: 2,
        cpu_manager: CpuManagerConfig {
            basic: vec![
                BasicPoolConfig {
                    pool_id: 0,
                    threads: 2,
                    has_shared_thread: true,
                    ..Default::default()
                },
                BasicPoolConfig {
                    pool_id: 1,
                    threads: 2,
                    has_shared_thread: true,
                    ..Default::default()
                },
            ],
            io: Vec::new(),
            shared: SharedPoolConfig { threads: 2 },
            ping_info_by_pool: Vec::new(),
        },
        executors: None,
    };
    let manager = CpuManager::new(setup);
    let shared = manager.shared_pool().unwrap();

    // At rest each pool's home thread is attributed to itself.
    assert_eq!(manager.get_pool_stats(0).pool.current_thread_count, 2.0);
    assert_eq!(manager.get_pool_stats(1).pool.current_thread_count, 2.0);

    shared.return_thread(0).unwrap();
    shared.return_thread(1).unwrap();

    // Nothing attributed: raw count only, the attached slot half-counted.
    assert_eq!(manager.get_pool_stats(0).pool.current_thread_count, 1.5);
    assert_eq!(manager.get_pool_stats(1).pool.current_thread_count, 1.5);

    // Pool 1 borrows the lowest idle slot, which is pool 0's home thread.
    let queue = Arc::new(TaskQueue::new());
    let taken = shared.borrow_thread(1, &queue).unwrap();
    assert_eq!(taken, 0);
    assert_eq!(manager.get_pool_stats(1).pool.current_thread_count, 2.0);
    assert_eq!(manager.get_pool_stats(0).pool.current_thread_count, 1.0);
}

#[test]
#[should_panic(expected = "missing PoolId: 2")]
fn missing_pool_config_is_fatal() {
    let setup = ActorSystemSetup {
        pool_count: 3,
        cpu_manager: CpuManagerConfig {
            basic: vec![BasicPoolConfig { pool_id: 0, threads: 1, ..Default::default() }],
            io: vec![IoPoolConfig { pool_id: 1, ..Default::default() }],
            shared: SharedPoolConfig { threads: 0 },
            ping_info_by_pool: Vec::new(),
        },
        executors: None,
    };
    let _ = CpuManager::new(setup);
}

// --- Explicit mode -----------------------------------------------------

#[derive(Debug)]
struct RecordingPool {
    id: PoolId,
    events: Arc<Mutex<Vec<String>>>,
    /// Number of cleanup polls answered with "not done" before reporting
    /// terminal state. usize::MAX never completes.
    cleanup_budget: AtomicUsize,
}

impl RecordingPool {
    fn new(id: PoolId, events: Arc<Mutex<Vec<String>>>, cleanup_budget: usize) -> Self {
        Self { id, events, cleanup_budget: AtomicUsize::new(cleanup_budget) }
    }

    fn record(&self, op: &str) {
        self.events.lock().unwrap().push(format!("{}:{}", op, self.id));
    }
}

impl ExecutorPool for RecordingPool {
    fn pool_id(&self) -> PoolId {
        self.id
    }

    fn kind(&self) -> PoolKind {
        PoolKind::Basic
    }

    fn prepare(&self, _delivery: &Arc<dyn EventDelivery>) -> Vec<SchedulerQueueReader> {
        self.record("prepare");
        vec![Arc::new(SchedulerQueue::new())]
    }

    fn start(&self) {
        self.record("start");
    }

    fn prepare_stop(&self) {
        self.record("prepare_stop");
    }

    fn shutdown(&self) {
        self.record("shutdown");
    }

    fn cleanup(&self) -> bool {
        let budget = self.cleanup_budget.load(Ordering::SeqCst);
        if budget == usize::MAX {
            return false;
        }
        if budget == 0 {
            return true;
        }
        self.cleanup_budget.store(budget - 1, Ordering::SeqCst);
        false
    }

    fn current_stats(&self) -> (ExecutorPoolStats, Vec<ExecutorThreadStats>) {
        (ExecutorPoolStats { current_thread_count: 1.0, ..Default::default() }, Vec::new())
    }
}

fn explicit_setup(pools: Vec<Arc<dyn ExecutorPool>>) -> ActorSystemSetup {
    ActorSystemSetup {
        pool_count: pools.len(),
        cpu_manager: CpuManagerConfig::default(),
        executors: Some(pools),
    }
}

#[test]
fn explicit_mode_adopts_pools_and_orders_lifecycle() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let pools: Vec<Arc<dyn ExecutorPool>> = (0..3)
        .map(|id| Arc::new(RecordingPool::new(id, events.clone(), 0)) as Arc<dyn ExecutorPool>)
        .collect();
    let mut manager = CpuManager::new(explicit_setup(pools));

    // No shared pool and no harmonizer in explicit mode.
    assert!(manager.lending_state().is_none());
    assert!(manager.harmonizer().is_none());

    let delivery: Arc<dyn EventDelivery> = Arc::new(NullDelivery);
    let mut readers = Vec::new();
    manager.prepare_start(&mut readers, &delivery);
    assert_eq!(readers.len(), 3);

    manager.start();
    manager.prepare_stop();
    manager.shutdown();
    manager.cleanup();

    let log = events.lock().unwrap().clone();
    let expected = [
        "prepare:0", "prepare:1", "prepare:2",
        "start:0", "start:1", "start:2",
        "prepare_stop:0", "prepare_stop:1", "prepare_stop:2",
        "shutdown:0", "shutdown:1", "shutdown:2",
    ];
    assert_eq!(log, expected);
}

#[test]
fn cleanup_tolerates_slow_pools_within_the_round_cap() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let slow: Arc<dyn ExecutorPool> = Arc::new(RecordingPool::new(0, events, 4));
    let mut manager = CpuManager::new(explicit_setup(vec![slow]));
    manager.cleanup();
    assert!(manager.executor_pools().is_empty());
}

#[test]
fn shutdown_cleanup_pass_is_best_effort() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let stuck: Arc<dyn ExecutorPool> =
        Arc::new(RecordingPool::new(0, events.clone(), usize::MAX));
    let manager = CpuManager::new(explicit_setup(vec![stuck]));
    // Three silent rounds, no panic, pool left as-is.
    manager.shutdown();
    assert_eq!(*events.lock().unwrap(), vec!["shutdown:0".to_string()]);
}

#[test]
#[should_panic(expected = "could not be completed in 10 rounds")]
fn cleanup_timeout_is_fatal() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let stuck: Arc<dyn ExecutorPool> = Arc::new(RecordingPool::new(0, events, usize::MAX));
    let mut manager = CpuManager::new(explicit_setup(vec![stuck]));
    manager.cleanup();
}
