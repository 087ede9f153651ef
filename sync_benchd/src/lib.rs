//! # Sync Bench Host
//!
//! This crate runs the synchronization server against simulated benchmark
//! clients and reports what happened.
//!
//! ## Philosophy
//!
//! - **Host owns I/O**: the server never prints; the host logs and reports
//! - **Deterministic by default**: clients are played by a driver on the
//!   simulated kernel, so the same configuration yields the same run. The
//!   threaded mode trades that for real preemption
//! - **Configuration is data**: a JSON file, overridable from the command line
//!
//! ## Responsibilities
//!
//! The host:
//! - Loads and validates a [`BenchConfig`]
//! - Builds the simulated kernel with a [`WorkloadDriver`], or spawns one
//!   client thread per client in [`ExecutionMode::Threaded`]
//! - Runs the server to completion and returns its `RunSummary`

pub mod runtime;
pub mod workload;

pub use runtime::{BenchConfig, BenchError, BenchRuntime, ExecutionMode};
pub use workload::{Workload, WorkloadDriver};
