// Integration tests for the basic and IO executor pools.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use magpie::cpu::config::{BasicPoolConfig, IoPoolConfig};
use magpie::{BasicExecutorPool, IoExecutorPool};
use magpie_api::delivery::{ActorAddr, BoxedEvent, EventDelivery};
use magpie_api::errors::SystemError;
use magpie_api::pool::{ExecutorPool, PoolKind};

#[derive(Debug)]
struct NullDelivery;

impl EventDelivery for NullDelivery {
    fn send(&self, _target: ActorAddr, _event: BoxedEvent, _cookie: u64, _channel: u32) {}
}

fn wait_until(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn basic_pool_executes_submitted_work() {
    magpie::logging::init_test();
    let config = BasicPoolConfig { pool_id: 0, threads: 2, ..Default::default() };
    let pool = BasicExecutorPool::new(config, None);
    assert_eq!(pool.kind(), PoolKind::Basic);
    pool.start();

    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..16 {
        let hits = hits.clone();
        pool.submit(Box::new(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || hits.load(Ordering::SeqCst) == 16));

    let (stats, threads) = pool.current_stats();
    assert_eq!(stats.executed_tasks, 16);
    assert_eq!(stats.current_thread_count, 2.0);
    assert_eq!(threads.len(), 2);

    pool.prepare_stop();
    assert!(matches!(pool.submit(Box::new(|| {})), Err(SystemError::ShuttingDown)));
    pool.shutdown();
    assert!(wait_until(Duration::from_secs(5), || pool.cleanup()));
}

#[test]
fn basic_pool_isolates_panicking_tasks() {
    let config = BasicPoolConfig { pool_id: 0, threads: 1, ..Default::default() };
    let pool = BasicExecutorPool::new(config, None);
    pool.start();

    let hits = Arc::new(AtomicUsize::new(0));
    pool.submit(Box::new(|| panic!("actor failure"))).unwrap();
    let counter = hits.clone();
    pool.submit(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }))
    .unwrap();

    // The worker survives the panic and keeps processing.
    assert!(wait_until(Duration::from_secs(5), || hits.load(Ordering::SeqCst) == 1));
    let (stats, _) = pool.current_stats();
    assert_eq!(stats.executed_tasks, 2);

    pool.shutdown();
    assert!(wait_until(Duration::from_secs(5), || pool.cleanup()));
}

#[test]
fn basic_pool_prepare_yields_one_reader_per_thread() {
    let config = BasicPoolConfig { pool_id: 3, threads: 4, ..Default::default() };
    let pool = BasicExecutorPool::new(config, None);
    let delivery: Arc<dyn EventDelivery> = Arc::new(NullDelivery);
    assert_eq!(pool.prepare(&delivery).len(), 4);
    assert_eq!(pool.pool_id(), 3);
}

#[test]
fn io_pool_executes_blocking_work() {
    let config = IoPoolConfig { pool_id: 1, threads: 2, queue_capacity: 64 };
    let pool = IoExecutorPool::new(config);
    assert_eq!(pool.kind(), PoolKind::Io);
    pool.start();

    let hits = Arc::new(AtomicUsize::new(0));
    for _ in 0..8 {
        let hits = hits.clone();
        pool.submit(Box::new(move || {
            hits.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || hits.load(Ordering::SeqCst) == 8));

    pool.shutdown();
    assert!(wait_until(Duration::from_secs(5), || pool.cleanup()));
    assert!(matches!(pool.submit(Box::new(|| {})), Err(SystemError::ShuttingDown)));
}

#[test]
fn io_pool_reports_queue_full() {
    let config = IoPoolConfig { pool_id: 0, threads: 1, queue_capacity: 1 };
    let pool = IoExecutorPool::new(config);
    pool.start();

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    pool.submit(Box::new(move || {
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
    }))
    .unwrap();
    // The single worker is now pinned on the gate.
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    pool.submit(Box::new(|| {})).unwrap();
    match pool.submit(Box::new(|| {})) {
        Err(SystemError::QueueFull { capacity }) => assert_eq!(capacity, 1),
        other => panic!("expected QueueFull, got {:?}", other),
    }

    release_tx.send(()).unwrap();
    pool.shutdown();
    assert!(wait_until(Duration::from_secs(5), || pool.cleanup()));
}
