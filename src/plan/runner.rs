// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Plan runner
//!
//! Turns plan steps into tasks of an [`Execution`]. Steps run in order and
//! the first failure ends the sequence; parallel steps become parallel tasks
//! whose branches run their own step lists.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::debug;

use crate::errors::TaskError;
use crate::execution::{work, BoxFuture, Execution, Scope, Work};
use crate::plan::{Plan, Step};
use crate::tasks::{InputSpec, TaskSpec};

/// Root unit of work running every step of `plan` under `execution`
pub fn plan_body(execution: &Arc<Execution>, plan: &Plan) -> Work {
    let execution = Arc::clone(execution);
    let steps = plan.steps.clone();
    work(move |scope| run_steps(execution, steps, scope))
}

/// Run `steps` in order under `scope`, returning the value of the last one
pub fn run_steps(
    execution: Arc<Execution>,
    steps: Vec<Step>,
    scope: Scope,
) -> BoxFuture<Result<Value, TaskError>> {
    Box::pin(async move {
        let mut last = Value::Null;
        for step in steps {
            last = run_step(&execution, step, &scope).await?;
        }
        Ok(last)
    })
}

async fn run_step(execution: &Arc<Execution>, step: Step, scope: &Scope) -> Result<Value, TaskError> {
    debug!(step = step.type_name(), prefix = ?scope.logging_prefix(), "Running step");

    match step {
        Step::Echo { message } => {
            execution.println(scope, &expand(execution, &message));
            Ok(Value::Null)
        }
        Step::Sleep { seconds } => {
            let duration = Duration::try_from_secs_f64(seconds).map_err(|e| {
                TaskError::execution("sleep", format!("invalid duration {}: {}", seconds, e))
            })?;
            execution.run_task(TaskSpec::Sleep(duration), scope).await
        }
        Step::Checkout(checkout) => execution.run_task(TaskSpec::Checkout(checkout), scope).await,
        Step::Mail(mail) => execution.run_task(TaskSpec::Mail(mail), scope).await,
        Step::Trigger(trigger) => execution.run_task(TaskSpec::Trigger(trigger), scope).await,
        Step::Input {
            message,
            choices,
            set,
        } => {
            let spec = InputSpec::new(expand(execution, &message), choices);
            let value = execution.run_task(TaskSpec::Input(spec), scope).await?;
            if let Some(name) = set {
                execution.set_variable(name, value.clone());
            }
            Ok(value)
        }
        Step::Parallel { branches } => {
            let branches = branches
                .into_iter()
                .map(|branch| {
                    let execution = Arc::clone(execution);
                    let steps = branch.steps;
                    (
                        branch.name,
                        work(move |scope| run_steps(execution, steps, scope)),
                    )
                })
                .collect();
            execution.run_task(TaskSpec::Parallel(branches), scope).await
        }
        Step::Dir { path, steps } => {
            run_steps(Arc::clone(execution), steps, scope.with_pwd(path)).await
        }
    }
}

/// Replace `${NAME}` with the execution variable or environment entry `NAME`.
///
/// Unknown names are left as written.
pub fn expand(execution: &Execution, text: &str) -> String {
    static VARIABLE: OnceLock<Regex> = OnceLock::new();
    let variable =
        VARIABLE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"));

    variable
        .replace_all(text, |caps: &Captures<'_>| {
            let name = &caps[1];
            match execution.variable(name) {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => execution
                    .env()
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string()),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::test_support::fixture;

    async fn resolve_next(execution: &Execution, choice: &str) {
        let inputs = execution.run().inputs();
        for _ in 0..200 {
            if let Some(input) = inputs.list().first() {
                inputs.resolve(input.id, choice, None).unwrap();
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no input became pending");
    }

    #[tokio::test]
    async fn test_parallel_branches_log_with_prefix() {
        let f = fixture();
        let plan = Plan::from_yaml(
            r#"
name: fanout
steps:
  - type: parallel
    branches:
      - name: web
        steps:
          - type: dir
            path: web
            steps: [{type: echo, message: building}]
      - name: api
        steps: [{type: echo, message: building}]
  - type: echo
    message: joined
"#,
        )
        .unwrap();

        let scope = f.execution.root_scope();
        run_steps(Arc::clone(&f.execution), plan.steps, scope)
            .await
            .unwrap();

        let lines = f.sink.lines();
        assert!(lines.contains(&"[web] building".to_string()));
        assert!(lines.contains(&"[api] building".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("joined"));
    }

    #[tokio::test]
    async fn test_input_sets_variable() {
        let f = fixture();
        let plan = Plan::from_yaml(
            r#"
name: gate
steps:
  - type: input
    message: Promote?
    choices: [Yes, No]
    set: promote
  - type: echo
    message: "promote=${promote} job=${JOB} ${missing}"
"#,
        )
        .unwrap();

        let exec = Arc::clone(&f.execution);
        let steps = plan.steps.clone();
        let handle = tokio::spawn(async move {
            let scope = exec.root_scope();
            run_steps(exec, steps, scope).await
        });

        resolve_next(&f.execution, "Yes").await;
        handle.await.unwrap().unwrap();

        assert_eq!(f.execution.variable("promote"), Some(Value::from("Yes")));
        assert!(f.sink.contains("promote=Yes job=${JOB} ${missing}"));
    }

    #[tokio::test]
    async fn test_failure_stops_sequence() {
        let f = fixture();
        let plan = Plan::from_yaml(
            r#"
name: broken
steps:
  - type: mail
    subject: hi
  - type: echo
    message: unreachable
"#,
        )
        .unwrap();

        let scope = f.execution.root_scope();
        let err = run_steps(Arc::clone(&f.execution), plan.steps, scope)
            .await
            .unwrap_err();

        assert!(matches!(err, TaskError::Execution { .. }));
        assert!(!f.sink.contains("unreachable"));
    }

    #[tokio::test]
    async fn test_plan_body_reports_completion() {
        let f = fixture();
        let plan = Plan::from_yaml("name: one\nsteps:\n  - type: echo\n    message: hi\n").unwrap();

        f.execution
            .start(plan_body(&f.execution, &plan))
            .await
            .unwrap();
        f.completion.wait().await;

        assert_eq!(f.completion.first(), Some(Ok(Value::Null)));
        assert!(f.sink.contains("hi"));
    }

    #[test]
    fn test_expand_prefers_variables() {
        let f = fixture();
        f.execution.set_variable("TERM", Value::from("dumb"));
        f.execution.set_variable("count", Value::from(3));
        assert_eq!(expand(&f.execution, "${TERM}/${count}"), "dumb/3");
    }
}
