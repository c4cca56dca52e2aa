// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Host boundary
//!
//! What an execution needs from the system invoking it: a workspace, an
//! environment, an output sink, the invoking identity and the run it belongs to.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::TaskError;
use crate::tasks::PendingInputs;

tokio::task_local! {
    static CURRENT_PRINCIPAL: Option<Principal>;
}

/// An authenticated identity on whose behalf work runs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal(String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity installed on the currently running unit of work, if any
pub fn current_principal() -> Option<Principal> {
    CURRENT_PRINCIPAL.try_with(|p| p.clone()).ok().flatten()
}

/// Run `fut` with `principal` installed as the current identity
pub(crate) async fn with_principal<F>(principal: Option<Principal>, fut: F) -> F::Output
where
    F: std::future::Future,
{
    CURRENT_PRINCIPAL.scope(principal, fut).await
}

/// Line-oriented build log
pub trait OutputSink: Send + Sync {
    fn write_line(&self, line: &str);
}

/// Writes the build log to stdout
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn write_line(&self, line: &str) {
        println!("{}", line);
    }
}

/// Keeps the build log in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }
}

impl OutputSink for MemorySink {
    fn write_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Identifier of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A pipeline run.
///
/// Pending inputs belong to the run, not to an execution, so that an
/// execution re-entering the same run sees the same registry.
#[derive(Debug)]
pub struct Run {
    id: RunId,
    job_name: String,
    number: u64,
    url: String,
    inputs: Arc<PendingInputs>,
}

impl Run {
    pub fn new(id: RunId, job_name: impl Into<String>, number: u64) -> Self {
        let job_name = job_name.into();
        let url = format!("job/{}/{}/", job_name, number);
        Self {
            id,
            job_name,
            number,
            url,
            inputs: Arc::new(PendingInputs::new()),
        }
    }

    pub fn id(&self) -> &RunId {
        &self.id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    /// Relative URL of the run, ending in `/`
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn inputs(&self) -> &Arc<PendingInputs> {
        &self.inputs
    }
}

impl fmt::Display for Run {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.job_name, self.number)
    }
}

/// Everything the host hands to an execution
#[derive(Clone)]
pub struct StepContext {
    pub workspace: PathBuf,
    pub env: HashMap<String, String>,
    pub sink: Arc<dyn OutputSink>,
    pub principal: Option<Principal>,
    pub run: Arc<Run>,
}

impl StepContext {
    pub fn new(workspace: impl Into<PathBuf>, run: Arc<Run>, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            workspace: workspace.into(),
            env: HashMap::new(),
            sink,
            principal: None,
            run,
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }
}

/// Two-outcome completion callback, invoked exactly once per execution
pub trait Completion: Send + Sync {
    fn on_success(&self, result: Value);
    fn on_failure(&self, cause: TaskError);
}
