// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! deployflow - Deployment pipeline orchestrator
//!
//! Runs deployment plans of cancellable, nested and parallel tasks.

use std::time::Duration;

use clap::Parser;
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deployflow::cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "deployflow=debug"
    } else {
        "deployflow=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    // Change to specified directory if provided
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            miette::miette!("Failed to change to directory '{}': {}", dir.display(), e)
        })?;
    }

    match cli.command {
        Commands::Validate { plan } => deployflow::cli::validate::run(plan, cli.verbose),
        Commands::Run(args) => {
            let settings = deployflow::cli::run::settings(&args)?;
            let runtime = settings
                .pool
                .build_runtime()
                .map_err(|e| miette::miette!("Failed to start worker pool: {}", e))?;

            let result = runtime.block_on(deployflow::cli::run::run(args, settings, cli.verbose));
            // stdin is read on a blocking thread that may never return
            runtime.shutdown_timeout(Duration::from_millis(500));
            result
        }
    }
}
