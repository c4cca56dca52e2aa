// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! End-to-end behaviour of executions, driven through the public API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;

use deployflow::capabilities::Capabilities;
use deployflow::execution::{
    work, Completion, Execution, MemorySink, Principal, Run, RunId, Scope, StepContext, WorkerPool,
};
use deployflow::plan::{plan_body, Plan};
use deployflow::tasks::{InputBroker, InputSpec, Task, TaskKind, TaskSpec};
use deployflow::TaskError;

#[derive(Default)]
struct Outcomes {
    seen: Mutex<Vec<Result<Value, String>>>,
    notify: Notify,
}

impl Outcomes {
    async fn wait(&self) -> Result<Value, String> {
        loop {
            let notified = self.notify.notified();
            if let Some(first) = self.seen.lock().first().cloned() {
                return first;
            }
            tokio::time::timeout(Duration::from_secs(5), notified)
                .await
                .expect("execution never completed");
        }
    }

    fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

impl Completion for Outcomes {
    fn on_success(&self, result: Value) {
        self.seen.lock().push(Ok(result));
        self.notify.notify_waiters();
    }

    fn on_failure(&self, cause: TaskError) {
        self.seen.lock().push(Err(cause.to_string()));
        self.notify.notify_waiters();
    }
}

struct Harness {
    execution: Arc<Execution>,
    sink: Arc<MemorySink>,
    outcomes: Arc<Outcomes>,
}

fn harness() -> Harness {
    let sink = Arc::new(MemorySink::new());
    let outcomes = Arc::new(Outcomes::default());
    let run = Arc::new(Run::new(RunId::new("it-1"), "deploy", 3));
    let context = StepContext::new("/srv/deploy", run, sink.clone())
        .with_principal(Principal::new("release-bot"));
    let execution = Execution::new(
        context,
        WorkerPool::with_max_workers(32),
        Capabilities::default(),
        outcomes.clone(),
    );
    Harness {
        execution,
        sink,
        outcomes,
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn parallel_failure_names_only_failed_branches() {
    let h = harness();
    let side_effect = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&side_effect);

    let branches = vec![
        (
            "a".to_string(),
            work(move |_| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(Value::Null)
            }),
        ),
        (
            "b".to_string(),
            work(|_| async { Err(TaskError::execution("b", "x")) }),
        ),
    ];

    let scope = h.execution.root_scope();
    let err = h
        .execution
        .run_task(TaskSpec::Parallel(branches), &scope)
        .await
        .unwrap_err();

    let TaskError::Parallel(failure) = err else {
        panic!("expected aggregate failure");
    };
    assert_eq!(failure.failed_branches(), vec!["b"]);
    assert!(failure.get("b").unwrap().to_string().ends_with("x"));
    assert!(side_effect.load(Ordering::SeqCst));
}

#[tokio::test]
async fn input_resolved_through_broker() {
    let h = harness();
    let broker = InputBroker::new();
    broker.attach(h.execution.run());

    let exec = Arc::clone(&h.execution);
    let waiting = tokio::spawn(async move {
        let scope = exec.root_scope();
        exec.run_task(TaskSpec::Input(InputSpec::new("Ship it?", ["Yes", "No"])), &scope)
            .await
    });

    let run_id = h.execution.run().id().clone();
    eventually("input to be pending", || !broker.pending(&run_id).is_empty()).await;
    let id = broker.pending(&run_id)[0].id;

    broker
        .resolve(&run_id, Some(&id.to_string()), Some("No"), None)
        .unwrap();

    assert_eq!(waiting.await.unwrap().unwrap(), Value::from("No"));
    assert!(h.execution.run().inputs().is_empty());
    assert!(h
        .sink
        .contains("/job/deploy/3/input/select?taskId=1&choice=No"));
}

#[tokio::test]
async fn input_without_choices_aborts_on_abort() {
    let h = harness();
    let exec = Arc::clone(&h.execution);
    let waiting = tokio::spawn(async move {
        let scope = exec.root_scope();
        exec.run_task(TaskSpec::Input(InputSpec::new("Proceed?", Vec::<String>::new())), &scope)
            .await
    });

    let inputs = Arc::clone(h.execution.run().inputs());
    eventually("input to be pending", || !inputs.is_empty()).await;
    let pending = inputs.list();
    assert_eq!(pending[0].choices, vec!["Abort".to_string()]);

    inputs
        .resolve(pending[0].id, "Abort", Some(Principal::new("oncall")))
        .unwrap();

    match waiting.await.unwrap().unwrap_err() {
        TaskError::Aborted { by, .. } => assert_eq!(by, Some(Principal::new("oncall"))),
        other => panic!("expected abort, got {other:?}"),
    }
}

/// Blocks until stopped; records the order stops arrive in
struct Gate {
    name: &'static str,
    stops: Arc<Mutex<Vec<&'static str>>>,
    released: Notify,
    fail_stop: bool,
}

#[async_trait]
impl Task for Gate {
    fn kind(&self) -> TaskKind {
        TaskKind::Sleep
    }

    async fn start(&self, _scope: &Scope) -> Result<Value, TaskError> {
        self.released.notified().await;
        Err(TaskError::aborted(format!("{} released", self.name)))
    }

    async fn stop(&self) -> Result<(), TaskError> {
        self.stops.lock().push(self.name);
        self.released.notify_one();
        if self.fail_stop {
            return Err(TaskError::execution(self.name, "could not release"));
        }
        Ok(())
    }
}

#[tokio::test]
async fn failing_stop_does_not_replace_cause() {
    let h = harness();
    let stops = Arc::new(Mutex::new(Vec::new()));
    let gate = |name, fail_stop| {
        Arc::new(Gate {
            name,
            stops: Arc::clone(&stops),
            released: Notify::new(),
            fail_stop,
        })
    };
    let (t1, t2) = (gate("T1", false), gate("T2", true));

    let exec = Arc::clone(&h.execution);
    h.execution
        .start(work(move |scope: Scope| async move {
            let first = {
                let exec = Arc::clone(&exec);
                let scope = scope.clone();
                tokio::spawn(async move { exec.execute_task(t1, &scope).await })
            };
            while exec.running_tasks() < 1 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            let second = exec.execute_task(t2, &scope).await;
            let _ = first.await;
            second
        }))
        .await
        .unwrap();

    let exec = Arc::clone(&h.execution);
    eventually("both tasks to run", || exec.running_tasks() == 2).await;
    h.execution
        .stop(TaskError::aborted("operator cancelled"))
        .await;

    let cause = h.outcomes.wait().await.unwrap_err();
    assert!(cause.contains("operator cancelled"));
    assert_eq!(*stops.lock(), vec!["T2", "T1"]);
    assert!(h.sink.contains("could not release"));
    assert_eq!(h.outcomes.count(), 1);
}

#[tokio::test]
async fn stop_twice_after_finish_reports_once() {
    let h = harness();
    h.execution
        .start(work(|_| async { Ok(Value::from(42)) }))
        .await
        .unwrap();
    assert_eq!(h.outcomes.wait().await, Ok(Value::from(42)));

    h.execution.stop(TaskError::aborted("late")).await;
    h.execution.stop(TaskError::aborted("later")).await;
    assert_eq!(h.outcomes.count(), 1);
}

#[tokio::test]
async fn stop_unwinds_a_running_plan() {
    let h = harness();
    let plan = Plan::from_yaml(
        r#"
name: long
steps:
  - type: parallel
    branches:
      - name: web
        steps: [{type: sleep, seconds: 30}]
      - name: api
        steps:
          - type: input
            message: Wait here
            choices: [Go]
  - type: echo
    message: never printed
"#,
    )
    .unwrap();

    h.execution
        .start(plan_body(&h.execution, &plan))
        .await
        .unwrap();

    let exec = Arc::clone(&h.execution);
    eventually("branches to start", || exec.running_tasks() >= 3).await;

    h.execution
        .stop(TaskError::aborted("deployment cancelled"))
        .await;

    let cause = h.outcomes.wait().await.unwrap_err();
    assert!(cause.contains("deployment cancelled"));
    assert!(!h.sink.contains("never printed"));

    let exec = Arc::clone(&h.execution);
    eventually("registry to drain", || exec.running_tasks() == 0).await;
    assert!(h.execution.run().inputs().is_empty());
}

#[tokio::test]
async fn branches_run_with_their_identity() {
    let h = harness();
    let branches = ["x", "y"]
        .into_iter()
        .map(|name| {
            (
                name.to_string(),
                work(|_| async {
                    Ok(Value::from(
                        deployflow::execution::current_principal().map(|p| p.name().to_string()),
                    ))
                }),
            )
        })
        .collect();

    let scope = h.execution.root_scope();
    let value = h
        .execution
        .run_task(TaskSpec::Parallel(branches), &scope)
        .await
        .unwrap();
    assert_eq!(value["x"], "release-bot");
    assert_eq!(value["y"], "release-bot");
}
