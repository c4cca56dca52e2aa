// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for deployflow.

pub mod run;
pub mod validate;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::plan::DEFAULT_PLAN_FILE;

/// Deployment pipeline orchestrator
///
/// Runs deployment plans: checkouts, sub-jobs, operator inputs and parallel branches.
#[derive(Parser, Debug)]
#[clap(
    name = "deployflow",
    version,
    about = "Deployment pipeline orchestrator with cancellable, parallel tasks",
    long_about = None,
    after_help = "Examples:\n\
        deployflow validate                 Check .deployflow.yaml\n\
        deployflow run                      Run the plan in the current directory\n\
        deployflow run -p release.yaml      Run another plan\n\n\
        While a plan runs, answer inputs on stdin as '<taskId> <choice>'.\n\
        Press Ctrl-C to stop the run."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a deployment plan
    Run(RunArgs),

    /// Validate a deployment plan
    Validate {
        /// Plan file to validate
        #[clap(default_value = DEFAULT_PLAN_FILE)]
        plan: PathBuf,
    },
}

/// Arguments of `deployflow run`
#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Plan file
    #[clap(short, long, default_value = DEFAULT_PLAN_FILE)]
    pub plan: PathBuf,

    /// Maximum concurrently running units of work
    #[clap(long, value_name = "N")]
    pub max_workers: Option<usize>,

    /// Seconds an idle worker thread is kept
    #[clap(long, value_name = "SECS")]
    pub idle_timeout: Option<u64>,

    /// Directory mail is queued in
    #[clap(long, value_name = "DIR")]
    pub outbox: Option<PathBuf>,

    /// Settings file (default: deployflow.toml in the user config directory)
    #[clap(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}
