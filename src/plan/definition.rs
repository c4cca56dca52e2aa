// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Plan definition structures
//!
//! Defines the schema for .deployflow.yaml files.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capabilities::JobDefinition;
use crate::errors::{FlowError, FlowResult};
use crate::tasks::{CheckoutSpec, MailSpec, TriggerSpec};

/// Default plan file name
pub const DEFAULT_PLAN_FILE: &str = ".deployflow.yaml";

/// Deployment plan from .deployflow.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Plan name, used as the job name of the run
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Environment variables for the execution
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Local job catalog available to trigger steps
    #[serde(default)]
    pub jobs: BTreeMap<String, JobEntry>,

    /// Steps, run in order
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Plan {
    /// Load plan from a YAML file
    pub fn from_file(path: &Path) -> FlowResult<Self> {
        if !path.exists() {
            return Err(FlowError::PlanNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| FlowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_yaml(&content)
    }

    /// Parse plan from YAML string
    pub fn from_yaml(yaml: &str) -> FlowResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Job catalog with shorthand entries expanded
    pub fn catalog(&self) -> BTreeMap<String, JobDefinition> {
        self.jobs
            .iter()
            .map(|(name, entry)| (name.clone(), entry.to_definition()))
            .collect()
    }

    /// Total number of steps, nested ones included
    pub fn step_count(&self) -> usize {
        count_steps(&self.steps)
    }
}

fn count_steps(steps: &[Step]) -> usize {
    steps
        .iter()
        .map(|step| {
            1 + match step {
                Step::Parallel { branches } => {
                    branches.iter().map(|b| count_steps(&b.steps)).sum()
                }
                Step::Dir { steps, .. } => count_steps(steps),
                _ => 0,
            }
        })
        .sum()
}

/// A job catalog entry: either a bare command or a full definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum JobEntry {
    Command(String),
    Definition(JobDefinition),
}

impl JobEntry {
    pub fn to_definition(&self) -> JobDefinition {
        match self {
            Self::Command(command) => JobDefinition::new(command.clone()),
            Self::Definition(definition) => definition.clone(),
        }
    }

    pub fn command(&self) -> &str {
        match self {
            Self::Command(command) => command,
            Self::Definition(definition) => &definition.command,
        }
    }
}

/// A single plan step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Step {
    /// Print a line to the build log
    Echo { message: String },

    /// Wait for a number of seconds
    Sleep { seconds: f64 },

    /// Check out a repository into the current directory
    Checkout(CheckoutSpec),

    /// Send a mail
    Mail(MailSpec),

    /// Trigger a job from the catalog
    Trigger(TriggerSpec),

    /// Wait for an operator to pick a choice
    Input {
        message: String,

        #[serde(default)]
        choices: Vec<String>,

        /// Variable receiving the selected choice
        #[serde(default)]
        set: Option<String>,
    },

    /// Run named branches concurrently
    Parallel { branches: Vec<Branch> },

    /// Run nested steps in a sub-directory
    Dir { path: PathBuf, steps: Vec<Step> },
}

impl Step {
    /// Step type as written in the plan
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Echo { .. } => "echo",
            Self::Sleep { .. } => "sleep",
            Self::Checkout(_) => "checkout",
            Self::Mail(_) => "mail",
            Self::Trigger(_) => "trigger",
            Self::Input { .. } => "input",
            Self::Parallel { .. } => "parallel",
            Self::Dir { .. } => "dir",
        }
    }

    /// Sleep duration, if this is a sleep step with a usable duration
    pub fn sleep_duration(&self) -> Option<Duration> {
        match self {
            Self::Sleep { seconds } => Duration::try_from_secs_f64(*seconds).ok(),
            _ => None,
        }
    }
}

/// A named branch of a parallel step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub steps: Vec<Step>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &str = r#"
name: release
description: Ship it
env:
  CHANNEL: stable
jobs:
  smoke: ./smoke.sh
  migrate:
    command: ./migrate.sh
    shell: sh
steps:
  - type: checkout
    url: https://git.example.com/app.git
    branch: main
  - type: parallel
    branches:
      - name: web
        steps:
          - type: dir
            path: web
            steps:
              - type: echo
                message: building web
      - name: api
        steps:
          - type: trigger
            job: smoke
            parameters:
              TARGET: api
  - type: input
    message: Promote to production?
    choices: [Yes, No]
    set: promote
  - type: sleep
    seconds: 0.5
  - type: mail
    subject: Released
    body: done
    to: ops@example.com
"#;

    #[test]
    fn test_parse_plan() {
        let plan = Plan::from_yaml(PLAN).unwrap();
        assert_eq!(plan.name, "release");
        assert_eq!(plan.env.get("CHANNEL").map(String::as_str), Some("stable"));
        assert_eq!(plan.steps.len(), 5);
        assert_eq!(plan.step_count(), 8);

        match &plan.steps[1] {
            Step::Parallel { branches } => {
                let names: Vec<_> = branches.iter().map(|b| b.name.as_str()).collect();
                assert_eq!(names, vec!["web", "api"]);
            }
            other => panic!("Expected parallel step, got: {other:?}"),
        }

        match &plan.steps[2] {
            Step::Input { choices, set, .. } => {
                assert_eq!(choices, &vec!["Yes".to_string(), "No".to_string()]);
                assert_eq!(set.as_deref(), Some("promote"));
            }
            other => panic!("Expected input step, got: {other:?}"),
        }

        assert_eq!(
            plan.steps[3].sleep_duration(),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_job_catalog_shorthand() {
        let plan = Plan::from_yaml(PLAN).unwrap();
        let catalog = plan.catalog();
        assert_eq!(catalog["smoke"], JobDefinition::new("./smoke.sh"));
        assert_eq!(catalog["migrate"].shell, "sh");
    }

    #[test]
    fn test_trigger_defaults() {
        let plan = Plan::from_yaml(PLAN).unwrap();
        let Step::Parallel { branches } = &plan.steps[1] else {
            panic!("Expected parallel step");
        };
        match &branches[1].steps[0] {
            Step::Trigger(trigger) => {
                assert!(trigger.wait);
                assert!(trigger.propagate);
                assert_eq!(trigger.parameters["TARGET"], "api");
            }
            other => panic!("Expected trigger step, got: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_step_type_rejected() {
        let yaml = "name: x\nsteps:\n  - type: teleport\n";
        assert!(matches!(Plan::from_yaml(yaml), Err(FlowError::Yaml { .. })));
    }

    #[test]
    fn test_missing_file() {
        let err = Plan::from_file(Path::new("/nonexistent/.deployflow.yaml")).unwrap_err();
        assert!(matches!(err, FlowError::PlanNotFound { .. }));
    }

    #[test]
    fn test_negative_sleep_has_no_duration() {
        let step = Step::Sleep { seconds: -1.0 };
        assert_eq!(step.sleep_duration(), None);
    }
}
