// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Parallel task
//!
//! Fans named branches out onto the worker pool, each under its own child
//! scope, and joins all of them. A failing branch never cuts its siblings
//! short; every failure is collected into one aggregate error.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::{Task, TaskKind};
use crate::errors::{ParallelFailure, TaskError};
use crate::execution::{work, Execution, Scope, Work};

type Inflight = Mutex<Option<Vec<(String, AbortHandle)>>>;

pub struct ParallelTask {
    execution: Arc<Execution>,
    branches: Mutex<Option<Vec<(String, Work)>>>,
    inflight: Inflight,
    stopped: AtomicBool,
}

impl ParallelTask {
    /// Branch names must be unique
    pub fn new(execution: Arc<Execution>, branches: Vec<(String, Work)>) -> Result<Self, TaskError> {
        let mut seen = HashSet::new();
        for (name, _) in &branches {
            if !seen.insert(name.as_str()) {
                return Err(TaskError::illegal_state(format!(
                    "duplicate parallel branch name '{}'",
                    name
                )));
            }
        }

        Ok(Self {
            execution,
            branches: Mutex::new(Some(branches)),
            inflight: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    fn track(&self, name: &str, handle: AbortHandle) {
        if let Some(inflight) = self.inflight.lock().as_mut() {
            inflight.push((name.to_string(), handle.clone()));
        }
        // stop() may have swept the list before this branch was added
        if self.stopped.load(Ordering::SeqCst) {
            handle.abort();
        }
    }

    /// Wrap a branch body so its failure is logged under the branch scope
    fn logged(&self, name: &str, body: Work) -> Work {
        let execution = Arc::clone(&self.execution);
        let name = name.to_string();
        work(move |scope: Scope| async move {
            let result = body(scope.clone()).await;
            if let Err(e) = &result {
                warn!(
                    branch = %name,
                    error = %e,
                    "execute parallel task {} of job {} failed",
                    name,
                    execution.job_name()
                );
                execution.print_error(&scope, &format!("execute parallel task {} failed: {}", name, e));
            }
            result
        })
    }
}

/// Clears the in-flight map on the way out of `start()`, aborting whatever
/// is still running if `start()` itself was cancelled
struct Sweep<'a>(&'a Inflight);

impl Drop for Sweep<'_> {
    fn drop(&mut self) {
        if let Some(inflight) = self.0.lock().take() {
            for (_, handle) in inflight {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl Task for ParallelTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Parallel
    }

    async fn start(&self, scope: &Scope) -> Result<Value, TaskError> {
        let branches = self
            .branches
            .lock()
            .take()
            .ok_or_else(|| TaskError::illegal_state("parallel task is already started"))?;

        *self.inflight.lock() = Some(Vec::with_capacity(branches.len()));
        let _sweep = Sweep(&self.inflight);

        let mut failures = BTreeMap::new();
        let mut handles = Vec::with_capacity(branches.len());

        for (name, body) in branches {
            if self.stopped.load(Ordering::SeqCst) {
                debug!(branch = %name, "Parallel task stopped, branch not scheduled");
                continue;
            }

            let body = self.logged(&name, body);
            match self.execution.schedule(body, scope.branch(&name)).await {
                Ok(handle) => {
                    self.track(&name, handle.abort_handle());
                    handles.push((name, handle));
                }
                Err(e) => {
                    failures.insert(name, e);
                }
            }
        }

        let mut results = Map::new();
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(value)) => {
                    results.insert(name, value);
                }
                Ok(Err(e)) => {
                    failures.insert(name, e);
                }
                Err(e) if e.is_cancelled() => {
                    debug!(branch = %name, "Parallel branch cancelled");
                }
                Err(e) => {
                    failures.insert(
                        name.clone(),
                        TaskError::execution(name, format!("branch panicked: {}", e)),
                    );
                }
            }
        }

        // a requested stop wins over branch failures it may have caused
        if self.stopped.load(Ordering::SeqCst) {
            if !failures.is_empty() {
                let failed: Vec<&str> = failures.keys().map(String::as_str).collect();
                debug!(?failed, "Parallel task stopped with failed branches");
            }
            return Err(TaskError::aborted("parallel branches cancelled"));
        }
        if !failures.is_empty() {
            return Err(TaskError::Parallel(ParallelFailure::new(failures)));
        }
        Ok(Value::Object(results))
    }

    async fn stop(&self) -> Result<(), TaskError> {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(inflight) = self.inflight.lock().as_ref() {
            for (name, handle) in inflight {
                if !handle.is_finished() {
                    debug!(branch = %name, "Cancelling parallel branch");
                    handle.abort();
                }
            }
        }
        Ok(())
    }
}
