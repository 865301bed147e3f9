// Magpie CPU-resource manager
//
// This crate implements the CPU-resource layer of the magpie actor runtime:
// a fixed set of executor pools driven through a uniform lifecycle, with
// hardware threads rebalanced across pools in response to load.

pub mod cpu;
pub mod logging;

// Re-export commonly used types
pub use cpu::config::{
    ActorSystemSetup, BasicPoolConfig, CpuManagerConfig, IoPoolConfig, PingConfig,
    SharedPoolConfig,
};
pub use cpu::harmonizer::{Harmonizer, HarmonizerPolicy, LendDecision, QueuePressurePolicy};
pub use cpu::manager::{CpuManager, PoolStatsSnapshot};
pub use cpu::pool::basic::BasicExecutorPool;
pub use cpu::pool::io::IoExecutorPool;
pub use cpu::pool::shared::{SharedExecutorPool, SharedPoolState, SharedThread};
pub use cpu::pool::{Task, TaskQueue};
