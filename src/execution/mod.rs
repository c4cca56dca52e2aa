// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Execution root
//!
//! An [`Execution`] binds one pipeline invocation to the shared worker pool
//! and to a registry of running tasks. It schedules its body as a single root
//! unit of work, runs tasks with registry bookkeeping, unwinds them in LIFO
//! order on stop and reports the outcome exactly once.

mod host;
mod pool;
mod registry;
mod scope;

pub use host::{
    current_principal, Completion, ConsoleSink, MemorySink, OutputSink, Principal, Run, RunId,
    StepContext,
};
pub use pool::{PoolConfig, WorkerPool, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_MAX_WORKERS};
pub use registry::{Registration, TaskRegistry};
pub use scope::{compose_prefix, Scope, PREFIX_SEPARATOR};

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::capabilities::Capabilities;
use crate::errors::TaskError;
use crate::tasks::{
    CheckoutTask, InputTask, MailTask, ParallelTask, SleepTask, Task, TaskSpec, TriggerTask,
};
use crate::utils::colors;

/// Boxed, sendable future
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// A unit of work: runs once, under the scope it is handed
pub type Work = Box<dyn FnOnce(Scope) -> BoxFuture<Result<Value, TaskError>> + Send + 'static>;

/// Box a closure into a [`Work`]
pub fn work<F, Fut>(f: F) -> Work
where
    F: FnOnce(Scope) -> Fut + Send + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    Box::new(move |scope| Box::pin(f(scope)))
}

/// Delivers the outcome of an execution exactly once.
///
/// Once a stop has been requested its cause wins over any result the root
/// body produces afterwards.
struct Reporter {
    completion: Arc<dyn Completion>,
    state: Mutex<ReportState>,
}

#[derive(Default)]
struct ReportState {
    delivered: bool,
    abort: Option<TaskError>,
}

enum Delivery {
    Success(Value),
    Failure(TaskError),
}

impl Reporter {
    fn new(completion: Arc<dyn Completion>) -> Self {
        Self {
            completion,
            state: Mutex::new(ReportState::default()),
        }
    }

    fn finish(&self, result: Result<Value, TaskError>) {
        let delivery = {
            let mut state = self.state.lock();
            if state.delivered {
                return;
            }
            state.delivered = true;
            match (state.abort.take(), result) {
                (Some(cause), _) => Delivery::Failure(cause),
                (None, Ok(value)) => Delivery::Success(value),
                (None, Err(e)) => Delivery::Failure(e),
            }
        };
        self.deliver(delivery);
    }

    fn request_abort(&self, cause: TaskError) {
        let mut state = self.state.lock();
        if !state.delivered && state.abort.is_none() {
            state.abort = Some(cause);
        }
    }

    fn flush_abort(&self) {
        let cause = {
            let mut state = self.state.lock();
            if state.delivered {
                return;
            }
            match state.abort.take() {
                Some(cause) => {
                    state.delivered = true;
                    cause
                }
                None => return,
            }
        };
        self.deliver(Delivery::Failure(cause));
    }

    fn is_delivered(&self) -> bool {
        self.state.lock().delivered
    }

    fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Success(value) => self.completion.on_success(value),
            Delivery::Failure(cause) => self.completion.on_failure(cause),
        }
    }
}

/// One in-flight invocation of the orchestration engine
pub struct Execution {
    context: StepContext,
    principal: Option<Principal>,
    job_name: String,
    pool: WorkerPool,
    capabilities: Capabilities,
    registry: TaskRegistry,
    started: AtomicBool,
    stopping: AtomicBool,
    root: Mutex<Option<AbortHandle>>,
    reporter: Reporter,
    variables: Mutex<HashMap<String, Value>>,
}

impl Execution {
    /// Bind a new execution to `pool`.
    ///
    /// The identity is taken from the context, falling back to the identity
    /// of the calling unit of work.
    pub fn new(
        mut context: StepContext,
        pool: WorkerPool,
        capabilities: Capabilities,
        completion: Arc<dyn Completion>,
    ) -> Arc<Self> {
        context
            .env
            .entry("TERM".to_string())
            .or_insert_with(|| colors::COLOR_MAP_NAME.to_string());
        let principal = context.principal.clone().or_else(current_principal);
        let job_name = context
            .env
            .get("JOB_NAME")
            .cloned()
            .unwrap_or_else(|| context.run.job_name().to_string());

        Arc::new(Self {
            context,
            principal,
            job_name,
            pool,
            capabilities,
            registry: TaskRegistry::new(),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            root: Mutex::new(None),
            reporter: Reporter::new(completion),
            variables: Mutex::new(HashMap::new()),
        })
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn workspace(&self) -> &Path {
        &self.context.workspace
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.context.env
    }

    pub fn run(&self) -> &Arc<Run> {
        &self.context.run
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Scope of the root unit of work
    pub fn root_scope(&self) -> Scope {
        Scope::root(self.context.workspace.clone())
    }

    /// Number of tasks whose `start()` is in flight
    pub fn running_tasks(&self) -> usize {
        self.registry.len()
    }

    /// Whether the completion callback has fired
    pub fn is_finished(&self) -> bool {
        self.reporter.is_delivered()
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.variables.lock().get(name).cloned()
    }

    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.variables.lock().insert(name.into(), value);
    }

    /// Schedule `body` as the root unit of work.
    ///
    /// Returns once the body is submitted; its outcome goes to the completion
    /// callback.
    pub async fn start(self: &Arc<Self>, body: Work) -> Result<(), TaskError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(TaskError::illegal_state("root task is already scheduled"));
        }

        info!(job = %self.job_name, run = %self.context.run, "Starting execution");

        let this = Arc::clone(self);
        let root = work(move |scope| async move {
            let result = body(scope).await;
            match &result {
                Ok(_) => info!(job = %this.job_name, "Execution finished"),
                Err(e) => warn!(job = %this.job_name, error = %e, "execute job {} failed", this.job_name),
            }
            this.reporter.finish(result);
            Ok(Value::Null)
        });

        let handle = self.schedule(root, self.root_scope()).await?;
        let abort = handle.abort_handle();
        *self.root.lock() = Some(abort.clone());

        // a stop that raced the submission found no root to cancel
        if self.stopping.load(Ordering::SeqCst) {
            abort.abort();
            self.reporter.flush_abort();
        }

        Ok(())
    }

    /// Submit `work` to the shared pool under `scope`.
    ///
    /// The unit runs with this execution's identity installed, inside a span
    /// naming the job and a fresh correlation id.
    pub async fn schedule(
        &self,
        work: Work,
        scope: Scope,
    ) -> Result<JoinHandle<Result<Value, TaskError>>, TaskError> {
        let correlation = Uuid::new_v4();
        let span = info_span!("unit", job = %self.job_name, id = %correlation);
        let principal = self.principal.clone();

        self.pool
            .submit(host::with_principal(principal, work(scope)), span)
            .await
    }

    /// Ask every running task to stop, most recently started first, then
    /// cancel the root unit and report `cause`.
    ///
    /// Failures of individual stops are printed as diagnostics and never
    /// replace `cause`.
    pub async fn stop(&self, cause: TaskError) {
        info!(job = %self.job_name, cause = %cause, "Stopping execution");
        self.reporter.request_abort(cause);
        self.stopping.store(true, Ordering::SeqCst);

        let mut errors = Vec::new();
        for task in self.registry.snapshot_lifo() {
            if let Err(e) = task.stop().await {
                warn!(task = %task.kind(), error = %e, "Task failed to stop");
                errors.push(e);
            }
        }

        if !errors.is_empty() {
            let scope = self.root_scope();
            self.println(&scope, "error occurred while stopping: ");
            for e in &errors {
                self.println(&scope, &e.to_string());
            }
        }

        let root = self.root.lock().clone();
        if let Some(root) = root {
            if !root.is_finished() {
                debug!(job = %self.job_name, "Cancelling root unit of work");
                root.abort();
            }
        }

        self.reporter.flush_abort();
    }

    /// Create a task bound to this execution
    pub fn create_task(self: &Arc<Self>, spec: TaskSpec) -> Result<Arc<dyn Task>, TaskError> {
        let task: Arc<dyn Task> = match spec {
            TaskSpec::Sleep(duration) => Arc::new(SleepTask::new(duration)),
            TaskSpec::Mail(mail) => Arc::new(MailTask::new(
                Arc::clone(&self.capabilities.mailer),
                mail,
            )),
            TaskSpec::Checkout(checkout) => Arc::new(CheckoutTask::new(Arc::clone(self), checkout)),
            TaskSpec::Trigger(trigger) => Arc::new(TriggerTask::new(Arc::clone(self), trigger)),
            TaskSpec::Input(input) => Arc::new(InputTask::new(Arc::clone(self), input)),
            TaskSpec::Parallel(branches) => Arc::new(ParallelTask::new(Arc::clone(self), branches)?),
        };
        Ok(task)
    }

    /// Run `task` to completion, keeping it registered while `start()` is in flight.
    ///
    /// Untagged failures are wrapped into an execution failure naming the task.
    pub async fn execute_task(&self, task: Arc<dyn Task>, scope: &Scope) -> Result<Value, TaskError> {
        let kind = task.kind();
        let _registration = self.registry.register(Arc::clone(&task));
        debug!(task = %kind, prefix = ?scope.logging_prefix(), "Task started");

        let result = task.start(scope).await;

        debug!(task = %kind, ok = result.is_ok(), "Task finished");
        result.map_err(|e| e.into_execution_failure(kind.as_str()))
    }

    /// `create_task` followed by `execute_task`
    pub async fn run_task(self: &Arc<Self>, spec: TaskSpec, scope: &Scope) -> Result<Value, TaskError> {
        let task = self.create_task(spec)?;
        self.execute_task(task, scope).await
    }

    /// Write `text` to the build log under `scope`'s prefix
    pub fn println(&self, scope: &Scope, text: &str) {
        if text.is_empty() {
            self.context.sink.write_line(&scope.decorate(""));
            return;
        }
        for line in text.lines() {
            self.context.sink.write_line(&scope.decorate(line));
        }
    }

    /// Write `text` to the build log in the error colour
    pub fn print_error(&self, scope: &Scope, text: &str) {
        for line in text.lines() {
            self.context
                .sink
                .write_line(&scope.decorate(&colors::error_line(line)));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::tasks::TaskKind;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Task that blocks until stopped and records stop order
    struct Blocking {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail_stop: bool,
        stopped: tokio::sync::Notify,
    }

    impl Blocking {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<&'static str>>>, fail_stop: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                fail_stop,
                stopped: tokio::sync::Notify::new(),
            })
        }
    }

    #[async_trait]
    impl Task for Blocking {
        fn kind(&self) -> TaskKind {
            TaskKind::Sleep
        }

        async fn start(&self, _scope: &Scope) -> Result<Value, TaskError> {
            self.stopped.notified().await;
            Err(TaskError::aborted(format!("{} stopped", self.name)))
        }

        async fn stop(&self) -> Result<(), TaskError> {
            self.log.lock().push(self.name);
            self.stopped.notify_one();
            if self.fail_stop {
                return Err(TaskError::execution(self.name, "stop exploded"));
            }
            Ok(())
        }
    }

    async fn wait_for_running(execution: &Execution, n: usize) {
        for _ in 0..200 {
            if execution.running_tasks() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("tasks never started");
    }

    #[tokio::test]
    async fn test_success_reported_once() {
        let f = fixture();
        f.execution
            .start(work(|_| async { Ok(Value::from("done")) }))
            .await
            .unwrap();
        f.completion.wait().await;

        assert_eq!(f.completion.first(), Some(Ok(Value::from("done"))));
        assert!(f.execution.is_finished());

        f.execution.stop(TaskError::aborted("late")).await;
        f.execution.stop(TaskError::aborted("later")).await;
        assert_eq!(f.completion.count(), 1);
    }

    #[tokio::test]
    async fn test_start_twice_is_illegal() {
        let f = fixture();
        f.execution.start(work(|_| async { Ok(Value::Null) })).await.unwrap();
        let second = f.execution.start(work(|_| async { Ok(Value::Null) })).await;
        assert!(matches!(second, Err(TaskError::IllegalState(_))));
    }

    #[tokio::test]
    async fn test_failure_reported() {
        let f = fixture();
        f.execution
            .start(work(|_| async { Err(TaskError::execution("mail", "smtp down")) }))
            .await
            .unwrap();
        f.completion.wait().await;

        let outcome = f.completion.first().unwrap();
        assert!(outcome.unwrap_err().contains("smtp down"));
    }

    #[tokio::test]
    async fn test_stop_visits_tasks_lifo() {
        let f = fixture();
        let log = Arc::new(Mutex::new(Vec::new()));
        let t1 = Blocking::new("t1", &log, false);
        let t2 = Blocking::new("t2", &log, false);

        let exec = Arc::clone(&f.execution);
        let (a, b) = (t1.clone(), t2.clone());
        f.execution
            .start(work(move |scope| async move {
                let first = {
                    let exec = Arc::clone(&exec);
                    let scope = scope.clone();
                    tokio::spawn(async move { exec.execute_task(a, &scope).await })
                };
                wait_for_running(&exec, 1).await;
                let second = exec.execute_task(b, &scope).await;
                let _ = first.await;
                second
            }))
            .await
            .unwrap();

        wait_for_running(&f.execution, 2).await;
        f.execution.stop(TaskError::aborted("user pressed stop")).await;
        f.completion.wait().await;

        assert_eq!(*log.lock(), vec!["t2", "t1"]);
        let outcome = f.completion.first().unwrap();
        assert!(outcome.unwrap_err().contains("user pressed stop"));
        assert_eq!(f.completion.count(), 1);
    }

    #[tokio::test]
    async fn test_failing_stop_is_only_a_diagnostic() {
        let f = fixture();
        let log = Arc::new(Mutex::new(Vec::new()));
        let t1 = Blocking::new("t1", &log, false);
        let t2 = Blocking::new("t2", &log, true);

        let exec = Arc::clone(&f.execution);
        let (a, b) = (t1.clone(), t2.clone());
        f.execution
            .start(work(move |scope| async move {
                let first = {
                    let exec = Arc::clone(&exec);
                    let scope = scope.clone();
                    tokio::spawn(async move { exec.execute_task(a, &scope).await })
                };
                wait_for_running(&exec, 1).await;
                let second = exec.execute_task(b, &scope).await;
                let _ = first.await;
                second
            }))
            .await
            .unwrap();

        wait_for_running(&f.execution, 2).await;
        f.execution.stop(TaskError::aborted("cancelled by host")).await;
        f.completion.wait().await;

        assert_eq!(*log.lock(), vec!["t2", "t1"]);
        assert!(f.sink.contains("error occurred while stopping"));
        assert!(f.sink.contains("stop exploded"));

        let cause = f.completion.first().unwrap().unwrap_err();
        assert!(cause.contains("cancelled by host"));
        assert!(!cause.contains("stop exploded"));
    }

    #[tokio::test]
    async fn test_execute_task_deregisters_on_failure() {
        let f = fixture();
        let scope = f.execution.root_scope();
        let task = f
            .execution
            .create_task(TaskSpec::Mail(Default::default()))
            .unwrap();

        let result = f.execution.execute_task(task, &scope).await;
        assert!(matches!(result, Err(TaskError::Execution { .. })));
        assert_eq!(f.execution.running_tasks(), 0);
    }

    #[tokio::test]
    async fn test_schedule_installs_identity() {
        let f = fixture();
        let handle = f
            .execution
            .schedule(
                work(|_| async {
                    Ok(Value::from(
                        current_principal().map(|p| p.name().to_string()),
                    ))
                }),
                f.execution.root_scope(),
            )
            .await
            .unwrap();

        assert_eq!(handle.await.unwrap().unwrap(), Value::from("deployer"));
        assert_eq!(current_principal(), None);
    }

    #[test]
    fn test_println_prefixes_lines() {
        let f = fixture();
        let scope = f.execution.root_scope().branch("web");
        f.execution.println(&scope, "one\ntwo");
        assert_eq!(f.sink.lines(), vec!["[web] one", "[web] two"]);
    }

    #[test]
    fn test_variables_and_env() {
        let f = fixture();
        f.execution.set_variable("approved", Value::from("Yes"));
        assert_eq!(f.execution.variable("approved"), Some(Value::from("Yes")));
        assert_eq!(f.execution.env().get("TERM").map(String::as_str), Some("xterm"));
        assert_eq!(f.execution.job_name(), "release");
    }
}
