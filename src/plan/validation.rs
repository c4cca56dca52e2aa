// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Plan validation
//!
//! Validates a plan before anything is scheduled, so that broken plans fail
//! up front instead of halfway through a deployment.

use std::collections::HashSet;

use crate::plan::{Branch, Plan, Step};
use crate::tasks::{InputSpec, ABORT_CHOICE};

/// Plan validator
pub struct PlanValidator;

impl PlanValidator {
    /// Validate a plan
    pub fn validate(plan: &Plan) -> ValidationResult {
        let mut result = ValidationResult::new();

        if plan.name.trim().is_empty() {
            result.add_error("Plan name is empty");
        }

        if plan.steps.is_empty() {
            result.add_error("Plan has no steps defined");
        }

        for (name, entry) in &plan.jobs {
            if entry.command().trim().is_empty() {
                result.add_error(&format!("Job '{}': command is empty", name));
            }
        }

        Self::validate_steps(&plan.steps, "steps", plan, &mut result);
        result
    }

    fn validate_steps(steps: &[Step], path: &str, plan: &Plan, result: &mut ValidationResult) {
        for (i, step) in steps.iter().enumerate() {
            let at = format!("{}[{}]", path, i);
            Self::validate_step(step, &at, plan, result);
        }
    }

    /// Validate a single step
    fn validate_step(step: &Step, at: &str, plan: &Plan, result: &mut ValidationResult) {
        match step {
            Step::Echo { message } => {
                if message.is_empty() {
                    result.add_warning(&format!("{} (echo): message is empty", at));
                }
            }
            Step::Sleep { .. } => {
                if step.sleep_duration().is_none() {
                    result.add_error(&format!(
                        "{} (sleep): seconds must be a finite, non-negative number",
                        at
                    ));
                }
            }
            Step::Checkout(checkout) => {
                if checkout.url.trim().is_empty() {
                    result.add_error(&format!("{} (checkout): url is empty", at));
                }
            }
            Step::Mail(mail) => {
                if let Err(e) = mail.build() {
                    result.add_error(&format!("{} (mail): {}", at, e));
                }
            }
            Step::Trigger(trigger) => {
                if !plan.jobs.contains_key(&trigger.job) {
                    result.add_error(&format!(
                        "{} (trigger): unknown job '{}'",
                        at, trigger.job
                    ));
                }
            }
            Step::Input {
                message,
                choices,
                set,
            } => {
                if message.trim().is_empty() {
                    result.add_error(&format!("{} (input): message is empty", at));
                }
                if choices.is_empty() {
                    result.add_warning(&format!(
                        "{} (input): no choices, only '{}' will be offered",
                        at, ABORT_CHOICE
                    ));
                }
                let mut seen = HashSet::new();
                for choice in InputSpec::new(message.clone(), choices.clone()).effective_choices() {
                    if !seen.insert(choice.to_lowercase()) {
                        result.add_error(&format!(
                            "{} (input): duplicate choice '{}'",
                            at, choice
                        ));
                    }
                }
                if matches!(set, Some(name) if name.trim().is_empty()) {
                    result.add_error(&format!("{} (input): 'set' names no variable", at));
                }
            }
            Step::Parallel { branches } => Self::validate_branches(branches, at, plan, result),
            Step::Dir { path, steps } => {
                if path.is_absolute() {
                    result.add_warning(&format!(
                        "{} (dir): absolute path '{}' leaves the workspace",
                        at,
                        path.display()
                    ));
                }
                if steps.is_empty() {
                    result.add_warning(&format!("{} (dir): no steps", at));
                }
                Self::validate_steps(steps, &format!("{}.steps", at), plan, result);
            }
        }
    }

    fn validate_branches(branches: &[Branch], at: &str, plan: &Plan, result: &mut ValidationResult) {
        if branches.is_empty() {
            result.add_error(&format!("{} (parallel): no branches defined", at));
        }

        let mut seen = HashSet::new();
        for branch in branches {
            if branch.name.trim().is_empty() {
                result.add_error(&format!("{} (parallel): branch name is empty", at));
            } else if !seen.insert(branch.name.as_str()) {
                result.add_error(&format!(
                    "{} (parallel): duplicate branch name '{}'",
                    at, branch.name
                ));
            }

            if branch.steps.is_empty() {
                result.add_warning(&format!(
                    "{} (parallel): branch '{}' has no steps",
                    at, branch.name
                ));
            }
            Self::validate_steps(
                &branch.steps,
                &format!("{}.branches[{}].steps", at, branch.name),
                plan,
                result,
            );
        }
    }
}

/// Result of plan validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(yaml: &str) -> ValidationResult {
        PlanValidator::validate(&Plan::from_yaml(yaml).unwrap())
    }

    #[test]
    fn test_validate_empty_plan() {
        let result = validate("name: empty\n");
        assert!(!result.is_valid());
        assert!(result.errors[0].contains("no steps"));
    }

    #[test]
    fn test_validate_duplicate_branches() {
        let result = validate(
            r#"
name: dup
steps:
  - type: parallel
    branches:
      - name: web
        steps: [{type: echo, message: a}]
      - name: web
        steps: [{type: echo, message: b}]
"#,
        );
        assert!(!result.is_valid());
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("duplicate branch name 'web'")));
    }

    #[test]
    fn test_validate_unknown_trigger_job() {
        let result = validate(
            r#"
name: t
jobs:
  smoke: ./smoke.sh
steps:
  - type: dir
    path: api
    steps:
      - type: trigger
        job: deploy
"#,
        );
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("steps[0].steps[0] (trigger)"));
        assert!(result.errors[0].contains("unknown job 'deploy'"));
    }

    #[test]
    fn test_validate_mail_fields() {
        let result = validate(
            r#"
name: m
steps:
  - type: mail
    subject: hi
    body: there
"#,
        );
        assert!(result.errors[0].contains("No recipients"));
    }

    #[test]
    fn test_input_without_choices_is_a_warning() {
        let result = validate(
            r#"
name: i
steps:
  - type: input
    message: Continue?
"#,
        );
        assert!(result.is_valid());
        assert!(result.warnings[0].contains("only 'Abort' will be offered"));
    }

    #[test]
    fn test_negative_sleep_rejected() {
        let result = validate("name: s\nsteps:\n  - type: sleep\n    seconds: -2\n");
        assert!(!result.is_valid());
    }

    #[test]
    fn test_valid_plan() {
        let result = validate(
            r#"
name: ok
jobs:
  smoke: ./smoke.sh
steps:
  - type: parallel
    branches:
      - name: a
        steps: [{type: sleep, seconds: 1}]
      - name: b
        steps: [{type: trigger, job: smoke}]
"#,
        );
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(!result.has_warnings());
    }
}
