// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Shell job scheduler
//!
//! Runs jobs from a local catalog as shell commands. Parameters are passed as
//! environment variables, together with the upstream cause.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ExternalRun, JobRef, JobResult, JobScheduler, QueuedJob, UpstreamCause};

/// A job in the local catalog
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobDefinition {
    /// Shell command to run
    pub command: String,

    /// Shell to use (bash, sh, etc.)
    #[serde(default = "default_shell")]
    pub shell: String,
}

fn default_shell() -> String {
    "bash".to_string()
}

impl JobDefinition {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            shell: default_shell(),
        }
    }
}

/// Shell job scheduler
pub struct ShellJobScheduler {
    catalog: BTreeMap<String, JobDefinition>,
    working_dir: PathBuf,
    next_number: AtomicU64,
}

impl ShellJobScheduler {
    /// Create a scheduler over `catalog`, running jobs in `working_dir`
    pub fn new(catalog: BTreeMap<String, JobDefinition>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            catalog,
            working_dir: working_dir.into(),
            next_number: AtomicU64::new(1),
        }
    }

    pub fn job_names(&self) -> Vec<&str> {
        self.catalog.keys().map(String::as_str).collect()
    }
}

#[async_trait]
impl JobScheduler for ShellJobScheduler {
    fn find(&self, name: &str) -> Option<JobRef> {
        self.catalog.get(name).map(|_| JobRef {
            name: name.to_string(),
        })
    }

    async fn schedule(
        &self,
        job: &JobRef,
        cause: &UpstreamCause,
        parameters: &BTreeMap<String, String>,
    ) -> anyhow::Result<Option<Arc<dyn QueuedJob>>> {
        let Some(definition) = self.catalog.get(&job.name) else {
            return Ok(None);
        };

        let number = self.next_number.fetch_add(1, Ordering::Relaxed);
        let run = ExternalRun {
            job: job.name.clone(),
            number,
            url: format!("job/{}/{}/", job.name, number),
        };

        let mut cmd = Command::new(&definition.shell);
        cmd.arg("-c").arg(&definition.command);
        cmd.current_dir(&self.working_dir);
        cmd.envs(parameters);
        cmd.env("UPSTREAM_JOB", &cause.job_name);
        cmd.env("UPSTREAM_BUILD", cause.number.to_string());
        cmd.kill_on_drop(true);

        let queued = ShellQueuedJob::spawn(cmd, run);
        Ok(Some(queued))
    }
}

struct ShellQueuedJob {
    started: watch::Receiver<Option<ExternalRun>>,
    finished: watch::Receiver<Option<JobResult>>,
    cancel: CancellationToken,
}

impl ShellQueuedJob {
    fn spawn(mut cmd: Command, run: ExternalRun) -> Arc<dyn QueuedJob> {
        let (started_tx, started) = watch::channel(None);
        let (finished_tx, finished) = watch::channel(None);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    warn!(job = %run.job, error = %e, "Failed to start job");
                    let _ = finished_tx.send(Some(JobResult::NotBuilt));
                    return;
                }
            };
            debug!(run = %run, "Job started");
            let _ = started_tx.send(Some(run.clone()));

            let result = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) if status.success() => JobResult::Success,
                    Ok(_) => JobResult::Failure,
                    Err(e) => {
                        warn!(run = %run, error = %e, "Failed to wait for job");
                        JobResult::Failure
                    }
                },
                _ = token.cancelled() => {
                    let _ = child.kill().await;
                    JobResult::Aborted
                }
            };
            debug!(run = %run, result = %result, "Job finished");
            let _ = finished_tx.send(Some(result));
        });

        Arc::new(Self {
            started,
            finished,
            cancel,
        })
    }
}

#[async_trait]
impl QueuedJob for ShellQueuedJob {
    async fn wait_for_start(&self) -> anyhow::Result<ExternalRun> {
        let mut started = self.started.clone();
        let mut finished = self.finished.clone();
        loop {
            if let Some(run) = started.borrow_and_update().clone() {
                return Ok(run);
            }
            if let Some(result) = *finished.borrow_and_update() {
                anyhow::bail!("job never started ({})", result);
            }
            tokio::select! {
                changed = started.changed() => changed?,
                changed = finished.changed() => changed?,
            }
        }
    }

    async fn get(&self) -> anyhow::Result<JobResult> {
        let mut finished = self.finished.clone();
        let result = finished.wait_for(Option::is_some).await?;
        Ok(result.unwrap_or(JobResult::NotBuilt))
    }

    fn cancel(&self) -> bool {
        if self.finished.borrow().is_some() {
            return false;
        }
        self.cancel.cancel();
        true
    }
}
