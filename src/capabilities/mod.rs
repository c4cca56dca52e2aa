// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! External capabilities
//!
//! Tasks delegate the actual work to capabilities supplied by the host: a job
//! scheduler, a source checkout and a mail transport. This module defines
//! their traits plus local implementations used by the CLI.

mod git;
mod jobs;
mod outbox;

pub use git::GitCheckout;
pub use jobs::{JobDefinition, ShellJobScheduler};
pub use outbox::OutboxMailer;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::execution::{Run, RunId};

/// Progress callback handed to long-running capabilities
pub type LogFn<'l> = dyn for<'a> Fn(&'a str) + Send + Sync + 'l;

/// Capabilities available to the tasks of an execution
#[derive(Clone)]
pub struct Capabilities {
    pub jobs: Arc<dyn JobScheduler>,
    pub scm: Arc<dyn ScmCheckout>,
    pub mailer: Arc<dyn Mailer>,
}

impl Default for Capabilities {
    fn default() -> Self {
        let unavailable = Arc::new(Unavailable);
        Self {
            jobs: unavailable.clone(),
            scm: unavailable.clone(),
            mailer: unavailable,
        }
    }
}

impl Capabilities {
    pub fn with_jobs(mut self, jobs: Arc<dyn JobScheduler>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_scm(mut self, scm: Arc<dyn ScmCheckout>) -> Self {
        self.scm = scm;
        self
    }

    pub fn with_mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = mailer;
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Job scheduling
// ─────────────────────────────────────────────────────────────────────────────

/// A job known to the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef {
    pub name: String,
}

/// Reference to the run that triggered a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamCause {
    pub run_id: RunId,
    pub job_name: String,
    pub number: u64,
}

impl From<&Run> for UpstreamCause {
    fn from(run: &Run) -> Self {
        Self {
            run_id: run.id().clone(),
            job_name: run.job_name().to_string(),
            number: run.number(),
        }
    }
}

impl fmt::Display for UpstreamCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Started by upstream project \"{}\" build number {}", self.job_name, self.number)
    }
}

/// A run of an external job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRun {
    pub job: String,
    pub number: u64,
    pub url: String,
}

impl fmt::Display for ExternalRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.job, self.number)
    }
}

/// Result of an external run, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobResult {
    Success,
    Unstable,
    Failure,
    NotBuilt,
    Aborted,
}

impl JobResult {
    pub fn is_worse_than(&self, other: JobResult) -> bool {
        *self > other
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Unstable => "UNSTABLE",
            Self::Failure => "FAILURE",
            Self::NotBuilt => "NOT_BUILT",
            Self::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}

/// Cancellable handle on a scheduled job
#[async_trait]
pub trait QueuedJob: Send + Sync {
    /// Wait until the job leaves the queue and starts running
    async fn wait_for_start(&self) -> anyhow::Result<ExternalRun>;

    /// Wait until the job finishes
    async fn get(&self) -> anyhow::Result<JobResult>;

    /// Cancel the job; returns false if it had already finished
    fn cancel(&self) -> bool;
}

#[async_trait]
pub trait JobScheduler: Send + Sync {
    /// Look up a job by name
    fn find(&self, name: &str) -> Option<JobRef>;

    /// Schedule `job`. `Ok(None)` means the scheduler refused it.
    async fn schedule(
        &self,
        job: &JobRef,
        cause: &UpstreamCause,
        parameters: &BTreeMap<String, String>,
    ) -> anyhow::Result<Option<Arc<dyn QueuedJob>>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Source checkout
// ─────────────────────────────────────────────────────────────────────────────

/// What to check out, on behalf of which run
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub url: String,
    pub branch: Option<String>,
    pub poll: bool,
    pub changelog: bool,
    pub run: Arc<Run>,
}

#[async_trait]
pub trait ScmCheckout: Send + Sync {
    /// Check out into `pwd`, reporting progress through `log`.
    ///
    /// Dropping the returned future must interrupt the checkout.
    async fn checkout(
        &self,
        request: &CheckoutRequest,
        pwd: &Path,
        log: &LogFn<'_>,
    ) -> anyhow::Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Mail
// ─────────────────────────────────────────────────────────────────────────────

/// A fully built mail message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub from: Option<String>,
    pub reply_to: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub body: String,
    pub charset: String,
    pub mime_type: String,
}

impl MailMessage {
    pub fn recipient_count(&self) -> usize {
        self.to.len() + self.cc.len() + self.bcc.len()
    }

    /// Render as an RFC 822 style message. Bcc recipients are not rendered.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(from) = &self.from {
            out.push_str(&format!("From: {}\r\n", from));
        }
        if let Some(reply_to) = &self.reply_to {
            out.push_str(&format!("Reply-To: {}\r\n", reply_to));
        }
        if !self.to.is_empty() {
            out.push_str(&format!("To: {}\r\n", self.to.join(", ")));
        }
        if !self.cc.is_empty() {
            out.push_str(&format!("Cc: {}\r\n", self.cc.join(", ")));
        }
        out.push_str(&format!("Subject: {}\r\n", self.subject));
        out.push_str("MIME-Version: 1.0\r\n");
        out.push_str(&format!(
            "Content-Type: {}; charset={}\r\n",
            self.mime_type, self.charset
        ));
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &MailMessage) -> anyhow::Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────────────────────────────────────

/// Stands in for every capability the host did not configure
#[derive(Debug, Default)]
pub struct Unavailable;

#[async_trait]
impl JobScheduler for Unavailable {
    fn find(&self, _name: &str) -> Option<JobRef> {
        None
    }

    async fn schedule(
        &self,
        job: &JobRef,
        _cause: &UpstreamCause,
        _parameters: &BTreeMap<String, String>,
    ) -> anyhow::Result<Option<Arc<dyn QueuedJob>>> {
        anyhow::bail!("no job scheduler configured to run '{}'", job.name)
    }
}

#[async_trait]
impl ScmCheckout for Unavailable {
    async fn checkout(
        &self,
        request: &CheckoutRequest,
        _pwd: &Path,
        _log: &LogFn<'_>,
    ) -> anyhow::Result<()> {
        anyhow::bail!("no source checkout configured for '{}'", request.url)
    }
}

#[async_trait]
impl Mailer for Unavailable {
    async fn send(&self, _message: &MailMessage) -> anyhow::Result<()> {
        anyhow::bail!("no mail transport configured")
    }
}
