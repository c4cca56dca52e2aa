// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Error types
//!
//! Task failures are tagged so callers can tell cancellation, aggregate
//! branch failure and broken invariants apart without inspecting messages.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::execution::Principal;

/// Result type for deployflow application operations
pub type FlowResult<T> = Result<T, FlowError>;

/// Failure of a task or of a unit of work
#[derive(Error, Debug, Diagnostic)]
pub enum TaskError {
    #[error("Task '{task}' failed: {message}")]
    #[diagnostic(code(deployflow::task_execution_failed))]
    Execution { task: String, message: String },

    #[error(transparent)]
    #[diagnostic(code(deployflow::parallel_failed))]
    Parallel(ParallelFailure),

    #[error("{}", abort_message(.reason, .by.as_ref()))]
    #[diagnostic(code(deployflow::aborted))]
    Aborted {
        reason: String,
        by: Option<Principal>,
    },

    #[error("Illegal state: {0}")]
    #[diagnostic(
        code(deployflow::illegal_state),
        help("This is a bug in the caller, not a task failure")
    )]
    IllegalState(String),

    #[error(transparent)]
    #[diagnostic(code(deployflow::capability_failed))]
    Capability(#[from] anyhow::Error),
}

fn abort_message(reason: &str, by: Option<&Principal>) -> String {
    match by {
        Some(principal) => format!("Aborted by {}: {}", principal, reason),
        None => format!("Aborted: {}", reason),
    }
}

impl TaskError {
    /// Create a task execution failure
    pub fn execution(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Create an abort without a known initiator
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
            by: None,
        }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    /// Whether this error is a cancellation or user abort
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Wrap untagged failures into an execution failure of `task`.
    ///
    /// Tagged errors pass through unchanged.
    pub fn into_execution_failure(self, task: &str) -> Self {
        match self {
            Self::Capability(e) => Self::Execution {
                task: task.to_string(),
                message: format!("{:#}", e),
            },
            other => other,
        }
    }
}

/// Failures of every branch of a parallel task, keyed by branch name
#[derive(Debug, Default)]
pub struct ParallelFailure {
    failures: BTreeMap<String, TaskError>,
}

impl ParallelFailure {
    pub fn new(failures: BTreeMap<String, TaskError>) -> Self {
        Self { failures }
    }

    /// Names of the failed branches, sorted
    pub fn failed_branches(&self) -> Vec<&str> {
        self.failures.keys().map(String::as_str).collect()
    }

    pub fn get(&self, branch: &str) -> Option<&TaskError> {
        self.failures.get(branch)
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, TaskError> {
        self.failures
    }
}

impl fmt::Display for ParallelFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parallel execution failed in {} branch", self.failures.len())?;
        if self.failures.len() != 1 {
            write!(f, "es")?;
        }
        for (name, cause) in &self.failures {
            write!(f, "\n  {}: {}", name, cause)?;
        }
        Ok(())
    }
}

impl std::error::Error for ParallelFailure {}

/// Client-visible errors of the input resolution endpoint
#[derive(Error, Debug, Diagnostic, PartialEq, Eq)]
pub enum InputError {
    #[error("Unknown run: {0}")]
    #[diagnostic(code(deployflow::input::unknown_run))]
    UnknownRun(String),

    #[error("parameter taskId is missing")]
    #[diagnostic(code(deployflow::input::missing_task_id))]
    MissingTaskId,

    #[error("invalid taskId {0}")]
    #[diagnostic(
        code(deployflow::input::invalid_task_id),
        help("The input may have been answered or cancelled already")
    )]
    InvalidTaskId(String),

    #[error("parameter choice is missing")]
    #[diagnostic(code(deployflow::input::missing_choice))]
    MissingChoice,

    #[error("invalid choice '{choice}', expected one of: {}", .allowed.join(", "))]
    #[diagnostic(code(deployflow::input::invalid_choice))]
    InvalidChoice {
        choice: String,
        allowed: Vec<String>,
    },

    #[error("input {0} is already resolved")]
    #[diagnostic(code(deployflow::input::already_resolved))]
    AlreadyResolved(u64),
}

/// Main error type for the deployflow application layer
#[derive(Error, Debug, Diagnostic)]
pub enum FlowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Plan Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Plan file not found: {path}")]
    #[diagnostic(
        code(deployflow::plan_not_found),
        help("Create a .deployflow.yaml or pass one with --plan")
    )]
    PlanNotFound { path: PathBuf },

    #[error("Invalid plan: {reason}")]
    #[diagnostic(code(deployflow::invalid_plan))]
    InvalidPlan {
        reason: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Settings Errors
    // ─────────────────────────────────────────────────────────────────────────
    /// `origin` names where the bad value came from: a file, a variable or a flag
    #[error("Invalid settings from {origin}: {message}")]
    #[diagnostic(code(deployflow::invalid_settings))]
    InvalidSettings { origin: String, message: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Execution Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Input(#[from] InputError),

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(deployflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("IO error: {message}")]
    #[diagnostic(code(deployflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(deployflow::yaml_error))]
    Yaml { message: String },

    #[error("TOML parsing error: {message}")]
    #[diagnostic(code(deployflow::toml_error))]
    Toml { message: String },
}

impl From<std::io::Error> for FlowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for FlowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<toml::de::Error> for FlowError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml { message: e.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_error_is_wrapped() {
        let err = TaskError::from(anyhow::anyhow!("connection refused"));
        match err.into_execution_failure("mail") {
            TaskError::Execution { task, message } => {
                assert_eq!(task, "mail");
                assert!(message.contains("connection refused"));
            }
            other => panic!("Expected Execution, got: {other:?}"),
        }
    }

    #[test]
    fn test_tagged_errors_pass_through() {
        let err = TaskError::aborted("stop requested").into_execution_failure("sleep");
        assert!(err.is_abort());

        let err = TaskError::illegal_state("twice").into_execution_failure("input");
        assert!(matches!(err, TaskError::IllegalState(_)));
    }

    #[test]
    fn test_parallel_failure_names_every_branch() {
        let mut failures = BTreeMap::new();
        failures.insert("web".to_string(), TaskError::execution("sleep", "x"));
        failures.insert("api".to_string(), TaskError::aborted("cancelled"));

        let failure = ParallelFailure::new(failures);
        assert_eq!(failure.failed_branches(), vec!["api", "web"]);

        let message = TaskError::Parallel(failure).to_string();
        assert!(message.contains("2 branches"));
        assert!(message.contains("api: Aborted: cancelled"));
        assert!(message.contains("web: Task 'sleep' failed: x"));
    }

    #[test]
    fn test_abort_message_names_identity() {
        let err = TaskError::Aborted {
            reason: "Abort is selected".into(),
            by: Some(Principal::new("alice")),
        };
        assert_eq!(err.to_string(), "Aborted by alice: Abort is selected");
    }
}
