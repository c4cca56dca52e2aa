// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Bounded worker pool
//!
//! One pool is built at application start and shared by every execution and
//! every parallel branch. Submission waits for a free slot instead of queueing
//! without bound, so bursts beyond `max_workers` surface as backpressure.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument, Span};

use crate::errors::TaskError;

/// Default maximum number of concurrently running units of work
pub const DEFAULT_MAX_WORKERS: usize = 512;

/// Default idle timeout for worker threads, in seconds
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum concurrently running units of work
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Seconds an idle worker thread is kept before it is reaped
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Worker thread name
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}

fn default_thread_name() -> String {
    "deploy-execution".to_string()
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            idle_timeout_secs: default_idle_timeout(),
            thread_name: default_thread_name(),
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Build the process runtime matching this configuration.
    ///
    /// Blocking threads are created on demand (none kept idle up front), capped
    /// at `max_workers` and reaped after `idle_timeout`.
    pub fn build_runtime(&self) -> std::io::Result<tokio::runtime::Runtime> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name(self.thread_name.clone())
            .max_blocking_threads(self.max_workers.max(1))
            .thread_keep_alive(self.idle_timeout())
            .build()
    }
}

/// Shared, bounded pool of units of work
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    max_workers: usize,
}

impl WorkerPool {
    /// # Panics
    ///
    /// Panics if `config.max_workers` is 0.
    pub fn new(config: &PoolConfig) -> Self {
        assert!(config.max_workers > 0, "max_workers must be > 0");

        Self {
            permits: Arc::new(Semaphore::new(config.max_workers)),
            max_workers: config.max_workers,
        }
    }

    pub fn with_max_workers(max_workers: usize) -> Self {
        Self::new(&PoolConfig {
            max_workers,
            ..PoolConfig::default()
        })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Number of units that could start right now without waiting
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.max_workers - self.available()
    }

    /// Run `fut` on the pool inside `span`.
    ///
    /// Waits until a slot is free. The slot is held until `fut` completes or
    /// is aborted.
    pub async fn submit<F>(&self, fut: F, span: Span) -> Result<JoinHandle<F::Output>, TaskError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TaskError::illegal_state("worker pool is shut down"))?;

        debug!(in_flight = self.in_flight(), "Submitting unit of work");

        Ok(tokio::spawn(
            async move {
                let _permit = permit;
                fut.await
            }
            .instrument(span),
        ))
    }

    /// Refuse further submissions. Running units are not affected.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.permits.is_closed()
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(&PoolConfig::default())
    }
}
