// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! # deployflow - Deployment Pipeline Orchestrator
//!
//! `deployflow` runs long-lived, cancellable deployment tasks on a bounded
//! worker pool: sub-jobs, operator inputs, source checkouts, mail, sleeps and
//! named parallel branches.
//!
//! ## Features
//!
//! - **Execution root** - One scheduled root unit per run, outcome reported exactly once
//! - **Cascading stop** - Running tasks are stopped most recent first
//! - **Parallel branches** - AND-join with every branch failure aggregated
//! - **Operator input** - Blocking rendezvous resolved by id from outside
//!
//! ## Quick Start
//!
//! ```bash
//! # Check a plan
//! deployflow validate
//!
//! # Run it, answering inputs on stdin as "<taskId> <choice>"
//! deployflow run
//! ```

pub mod capabilities;
pub mod cli;
pub mod config;
pub mod errors;
pub mod execution;
pub mod plan;
pub mod tasks;
pub mod utils;

// Re-export commonly used types
pub use errors::{FlowError, FlowResult, InputError, ParallelFailure, TaskError};
pub use execution::{Execution, Scope, WorkerPool};
pub use plan::Plan;
pub use tasks::{Task, TaskKind, TaskSpec};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
