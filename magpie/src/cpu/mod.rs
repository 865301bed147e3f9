//! # CPU Management Module
//!
//! This module owns the process's execution capacity: a fixed set of
//! executor pools built from configuration and driven through a uniform
//! lifecycle, plus the machinery that rebalances hardware threads across
//! pools while the system runs.
//!
//! ## Key Concepts
//! - Executor pools: basic (CPU-bound, lending-capable), IO (fixed size)
//!   and shared (lendable thread supply)
//! - Harmonization: periodic observation of pool load, moving shared
//!   threads toward pressured pools
//! - Lifecycle: shared pool prepared and started first, stopped and
//!   cleaned up last, so lent threads outlive their borrowers
//!
//! ## Design Principles
//! - One owner per resource: the manager owns the pools, the shared pool
//!   owns the lending ledger, the harmonizer is the only ledger mutator
//! - Bounded polling over cooperative signaling for shutdown

pub mod clock;
pub mod config;
pub mod harmonizer;
pub mod manager;
pub mod pool;
