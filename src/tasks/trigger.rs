// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Trigger-external-job task
//!
//! Schedules another job with a cause pointing back at this run and,
//! optionally, waits for it and propagates its failure.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Task, TaskKind};
use crate::capabilities::{ExternalRun, JobResult, QueuedJob, UpstreamCause};
use crate::errors::TaskError;
use crate::execution::{Execution, Scope};

/// Trigger parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerSpec {
    /// Name of the job to schedule
    pub job: String,

    /// Parameters passed to the job
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    /// Wait for the job to finish
    #[serde(default = "default_true")]
    pub wait: bool,

    /// Fail when the job does not succeed (only when waiting)
    #[serde(default = "default_true")]
    pub propagate: bool,
}

fn default_true() -> bool {
    true
}

impl TriggerSpec {
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            parameters: BTreeMap::new(),
            wait: true,
            propagate: true,
        }
    }
}

pub struct TriggerTask {
    execution: Arc<Execution>,
    spec: TriggerSpec,
    queued: Mutex<Option<Arc<dyn QueuedJob>>>,
    cancel: CancellationToken,
}

impl TriggerTask {
    pub fn new(execution: Arc<Execution>, spec: TriggerSpec) -> Self {
        Self {
            execution,
            spec,
            queued: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    async fn wait_for(
        &self,
        scope: &Scope,
        queued: &Arc<dyn QueuedJob>,
    ) -> Result<(ExternalRun, JobResult), TaskError> {
        let run = queued.wait_for_start().await?;
        self.execution
            .println(scope, &format!("Starting building: {}", run));

        let result = queued.get().await?;
        if self.spec.propagate && result.is_worse_than(JobResult::Success) {
            return Err(TaskError::execution(
                TaskKind::Trigger.as_str(),
                format!("Failed to execute build of {} ({})", run, result),
            ));
        }
        Ok((run, result))
    }
}

#[async_trait]
impl Task for TriggerTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Trigger
    }

    async fn start(&self, scope: &Scope) -> Result<Value, TaskError> {
        let jobs = Arc::clone(&self.execution.capabilities().jobs);
        let job = jobs.find(&self.spec.job).ok_or_else(|| {
            TaskError::execution(
                TaskKind::Trigger.as_str(),
                format!("No parameterized job named {} found", self.spec.job),
            )
        })?;
        if self.cancel.is_cancelled() {
            return Err(cancelled(&job.name));
        }
        self.execution
            .println(scope, &format!("Scheduling project: {}", job.name));

        let cause = UpstreamCause::from(self.execution.run().as_ref());
        let queued = jobs
            .schedule(&job, &cause, &self.spec.parameters)
            .await?
            .ok_or_else(|| {
                TaskError::execution(
                    TaskKind::Trigger.as_str(),
                    format!("Failed to trigger build of {}", job.name),
                )
            })?;
        *self.queued.lock() = Some(Arc::clone(&queued));

        // stop() ran while the job was being scheduled and found no handle
        if self.cancel.is_cancelled() {
            self.queued.lock().take();
            queued.cancel();
            return Err(cancelled(&job.name));
        }

        if !self.spec.wait {
            self.queued.lock().take();
            return Ok(Value::Null);
        }

        let outcome = tokio::select! {
            biased;
            outcome = self.wait_for(scope, &queued) => outcome,
            _ = self.cancel.cancelled() => {
                self.queued.lock().take();
                queued.cancel();
                return Err(cancelled(&job.name));
            }
        };
        self.queued.lock().take();

        match outcome {
            Ok(_) if self.cancel.is_cancelled() => Err(cancelled(&job.name)),
            Ok((run, result)) => {
                if self.spec.propagate {
                    self.execution.println(scope, &format!("{} finished.", run));
                }
                info!(run = %run, result = %result, "Triggered job finished");
                Ok(json!({ "run": run.to_string(), "result": result }))
            }
            Err(e) if self.spec.propagate => Err(e),
            Err(_) if self.cancel.is_cancelled() => Err(cancelled(&job.name)),
            Err(e) => {
                warn!(job = %self.spec.job, error = %e, "Ignoring failure of triggered job");
                Ok(Value::Null)
            }
        }
    }

    async fn stop(&self) -> Result<(), TaskError> {
        self.cancel.cancel();
        let queued = self.queued.lock().take();
        if let Some(queued) = queued {
            let cancelled = queued.cancel();
            debug!(job = %self.spec.job, cancelled, "Cancelling triggered job");
        }
        Ok(())
    }
}

fn cancelled(job: &str) -> TaskError {
    TaskError::aborted(format!("build of {} was cancelled", job))
}
