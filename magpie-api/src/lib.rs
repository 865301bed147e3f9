//! # Magpie Executor-Pool API
//!
//! Magpie is the CPU-resource layer of a thread-based actor runtime. This
//! crate is the interface layer: it defines the contracts the runtime's
//! CPU manager composes, without committing to a pool implementation.
//!
//! ## Design Principles
//!
//! - **Uniform lifecycle**: every pool variant moves through the same
//!   prepare / start / prepare-stop / shutdown / cleanup sequence, so the
//!   manager can drive a heterogeneous pool set with one loop.
//! - **No downcasting**: pool variants are distinguished by a kind tag,
//!   never by runtime type inspection.
//! - **Synchronous by construction**: every operation either completes or
//!   polls until a bounded condition is met; nothing suspends.
//!
//! ## Module Organization
//!
//! - [`pool`]: the `ExecutorPool` lifecycle contract and pool identity
//! - [`schedule`]: per-thread delayed-execution queues and their readers
//! - [`delivery`]: the actor event-delivery boundary
//! - [`stats`]: point-in-time pool and thread statistics snapshots
//! - [`errors`]: error types shared across implementations

pub mod delivery;
pub mod errors;
pub mod pool;
pub mod schedule;
pub mod stats;

pub use delivery::{ActorAddr, BoxedEvent, EventDelivery};
pub use errors::{ConfigError, LendError, SystemError};
pub use pool::{ExecutorPool, PoolId, PoolKind};
pub use schedule::{DelayedEvent, SchedulerQueue, SchedulerQueueReader};
pub use stats::{ExecutorPoolStats, ExecutorThreadStats};
