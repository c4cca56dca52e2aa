// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Source checkout task

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{Task, TaskKind};
use crate::capabilities::CheckoutRequest;
use crate::errors::TaskError;
use crate::execution::{Execution, Scope};

/// Checkout parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckoutSpec {
    /// Repository URL
    pub url: String,

    /// Branch to check out (default: remote HEAD)
    #[serde(default)]
    pub branch: Option<String>,

    /// Register the repository for change polling
    #[serde(default = "default_true")]
    pub poll: bool,

    /// Record the changelog of this checkout
    #[serde(default = "default_true")]
    pub changelog: bool,
}

fn default_true() -> bool {
    true
}

impl CheckoutSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: None,
            poll: true,
            changelog: true,
        }
    }
}

/// Checks out into the current working directory of its scope
pub struct CheckoutTask {
    execution: Arc<Execution>,
    spec: CheckoutSpec,
    cancel: CancellationToken,
}

impl CheckoutTask {
    pub fn new(execution: Arc<Execution>, spec: CheckoutSpec) -> Self {
        Self {
            execution,
            spec,
            cancel: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Task for CheckoutTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Checkout
    }

    async fn start(&self, scope: &Scope) -> Result<Value, TaskError> {
        let request = CheckoutRequest {
            url: self.spec.url.clone(),
            branch: self.spec.branch.clone(),
            poll: self.spec.poll,
            changelog: self.spec.changelog,
            run: Arc::clone(self.execution.run()),
        };
        let execution = &self.execution;
        let log = |line: &str| execution.println(scope, line);
        let scm = Arc::clone(&self.execution.capabilities().scm);

        tokio::select! {
            result = scm.checkout(&request, scope.pwd(), &log) => {
                result?;
                Ok(Value::Null)
            }
            _ = self.cancel.cancelled() => Err(TaskError::aborted("checkout interrupted")),
        }
    }

    async fn stop(&self) -> Result<(), TaskError> {
        self.cancel.cancel();
        Ok(())
    }
}
