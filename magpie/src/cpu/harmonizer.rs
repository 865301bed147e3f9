use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, warn};

use magpie_api::pool::PoolId;

use crate::cpu::config::PingConfig;
use crate::cpu::pool::basic::BasicExecutorPool;
use crate::cpu::pool::shared::SharedExecutorPool;

/// Default spacing between rebalance passes, microseconds.
pub const DEFAULT_HARMONIZE_INTERVAL_US: u64 = 100_000;

/// Load signal the policy sees for one pool at one observation.
#[derive(Debug, Clone, Copy)]
pub struct PoolLoadSnapshot {
    pub pool_id: PoolId,

    /// Tasks waiting in the pool's queue.
    pub queue_depth: usize,

    /// Owned threads plus the currently attributed shared thread, if any.
    pub running_threads: usize,

    /// Whether a shared thread is currently attributed to the pool.
    pub has_attributed_thread: bool,

    /// Observation timestamp on the runtime clock.
    pub now_us: u64,

    /// The pool's configured latency thresholds.
    pub ping: PingConfig,
}

/// What the policy wants done for one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LendDecision {
    Hold,
    Borrow,
    Release,
}

/// Per-pool observation history the policy threads between passes.
#[derive(Debug, Clone, Default)]
pub struct PolicyState {
    pub pressured_since_us: Option<u64>,
    pub idle_since_us: Option<u64>,
}

/// The threshold function driving borrow/reclaim decisions.
///
/// Implementations only express desire; the harmonizer enforces the
/// lending contracts (supply conservation, non-starvation, thread-count
/// bounds) regardless of what a policy returns.
pub trait HarmonizerPolicy: fmt::Debug + Send + Sync {
    fn decide(&self, load: &PoolLoadSnapshot, state: &mut PolicyState) -> LendDecision;
}

/// Default policy: sustained queue pressure borrows, sustained idleness
/// releases.
///
/// A pool is pressured when at least one task is waiting per running
/// thread. Pressure sustained beyond the pool's `max_avg_ping_us` makes
/// it a borrow candidate; emptiness sustained beyond `release_factor`
/// times that threshold releases the attributed thread.
#[derive(Debug, Clone)]
pub struct QueuePressurePolicy {
    pub release_factor: u64,
}

impl Default for QueuePressurePolicy {
    fn default() -> Self {
        Self { release_factor: 2 }
    }
}

impl HarmonizerPolicy for QueuePressurePolicy {
    fn decide(&self, load: &PoolLoadSnapshot, state: &mut PolicyState) -> LendDecision {
        if load.queue_depth >= load.running_threads.max(1) {
            state.idle_since_us = None;
            let since = *state.pressured_since_us.get_or_insert(load.now_us);
            if !load.has_attributed_thread
                && load.now_us.saturating_sub(since) >= load.ping.max_avg_ping_us
            {
                return LendDecision::Borrow;
            }
        } else if load.queue_depth == 0 {
            state.pressured_since_us = None;
            let since = *state.idle_since_us.get_or_insert(load.now_us);
            if load.has_attributed_thread
                && load.now_us.saturating_sub(since)
                    >= self.release_factor * load.ping.max_avg_ping_us
            {
                return LendDecision::Release;
            }
        } else {
            state.pressured_since_us = None;
            state.idle_since_us = None;
        }
        LendDecision::Hold
    }
}

struct HarmonizedPool {
    pool_id: PoolId,

    /// Lending-capable pools carry a handle; IO pools are observed only.
    lending: Option<Weak<BasicExecutorPool>>,

    ping: PingConfig,
    policy_state: PolicyState,
}

/// The rebalancing engine.
///
/// Observes registered pools and moves shared threads toward pressured
/// ones, mutating the lending ledger only through the shared pool.
/// Runs as periodic piggyback work on pool worker threads: `harmonize`
/// is cheap to call often and only one caller wins each interval.
pub struct Harmonizer {
    interval_us: u64,
    next_due_us: AtomicU64,
    policy: Box<dyn HarmonizerPolicy>,
    shared: Option<Arc<SharedExecutorPool>>,
    pools: Mutex<Vec<HarmonizedPool>>,
}

impl fmt::Debug for Harmonizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harmonizer")
            .field("interval_us", &self.interval_us)
            .field("pools", &self.pools.lock().unwrap().len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Harmonizer {
    /// Create a harmonizer seeded with a clock timestamp, bound to the
    /// shared pool it rebalances against.
    pub fn new(seed_ts_us: u64, shared: Option<Arc<SharedExecutorPool>>) -> Self {
        Self::with_policy(seed_ts_us, shared, Box::new(QueuePressurePolicy::default()))
    }

    pub fn with_policy(
        seed_ts_us: u64,
        shared: Option<Arc<SharedExecutorPool>>,
        policy: Box<dyn HarmonizerPolicy>,
    ) -> Self {
        Self {
            interval_us: DEFAULT_HARMONIZE_INTERVAL_US,
            next_due_us: AtomicU64::new(seed_ts_us + DEFAULT_HARMONIZE_INTERVAL_US),
            policy,
            shared,
            pools: Mutex::new(Vec::new()),
        }
    }

    /// Register a pool for observation. Lending-capable basic pools pass
    /// their handle; fixed pools pass None and are never rebalanced.
    pub fn add_pool(
        &self,
        pool_id: PoolId,
        lending: Option<&Arc<BasicExecutorPool>>,
        ping: Option<PingConfig>,
    ) {
        self.pools.lock().unwrap().push(HarmonizedPool {
            pool_id,
            lending: lending.map(Arc::downgrade),
            ping: ping.unwrap_or_default(),
            policy_state: PolicyState::default(),
        });
        debug!(pool = pool_id, lending = lending.is_some(), "pool registered with harmonizer");
    }

    /// Periodic entry point, called from pool worker threads.
    ///
    /// Returns immediately unless the interval elapsed; the timestamp CAS
    /// guarantees a single rebalance per interval no matter how many
    /// threads call in.
    pub fn harmonize(&self, now_us: u64) {
        let next = self.next_due_us.load(Ordering::Relaxed);
        if now_us < next {
            return;
        }
        if self
            .next_due_us
            .compare_exchange(next, now_us + self.interval_us, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        self.rebalance(now_us);
    }

    /// One full rebalance pass at the given timestamp.
    ///
    /// Releases run before borrows so a thread reclaimed from an idle pool
    /// is available to a pressured one within the same pass.
    pub fn rebalance(&self, now_us: u64) {
        let Some(shared) = &self.shared else { return };
        let mut pools = self.pools.lock().unwrap();
        let state = shared.get_state();

        let mut actions: Vec<(PoolId, Arc<BasicExecutorPool>, LendDecision)> = Vec::new();
        for entry in pools.iter_mut() {
            let Some(lending) = &entry.lending else { continue };
            let Some(pool) = lending.upgrade() else { continue };
            let attributed = state
                .borrowed_thread_by_pool
                .get(entry.pool_id)
                .copied()
                .flatten()
                .is_some();
            let load = PoolLoadSnapshot {
                pool_id: entry.pool_id,
                queue_depth: pool.queue_depth(),
                running_threads: pool.owned_threads() + usize::from(attributed),
                has_attributed_thread: attributed,
                now_us,
                ping: entry.ping,
            };
            let decision = self.policy.decide(&load, &mut entry.policy_state);
            if decision != LendDecision::Hold {
                actions.push((entry.pool_id, pool, decision));
            }
        }

        for (pool_id, pool, decision) in &actions {
            if *decision != LendDecision::Release {
                continue;
            }
            // Non-starvation: never shrink a pool below its floor.
            if pool.owned_threads() < pool.min_threads() {
                continue;
            }
            match shared.return_thread(*pool_id) {
                Ok(thread) => debug!(pool = pool_id, thread, "harmonizer reclaimed thread"),
                Err(err) => warn!(pool = pool_id, error = %err, "thread reclaim failed"),
            }
        }

        for (pool_id, pool, decision) in &actions {
            if *decision != LendDecision::Borrow {
                continue;
            }
            if let Some(max) = pool.max_total_threads() {
                if pool.owned_threads() + 1 > max {
                    continue;
                }
            }
            match shared.borrow_thread(*pool_id, &pool.task_queue()) {
                Ok(thread) => debug!(pool = pool_id, thread, "harmonizer lent thread"),
                Err(err) => warn!(pool = pool_id, error = %err, "thread borrow failed"),
            }
        }
    }
}
