// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Run command - execute a deployment plan

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use miette::Result;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

use super::RunArgs;
use crate::capabilities::{Capabilities, GitCheckout, OutboxMailer, ShellJobScheduler};
use crate::config::Settings;
use crate::errors::TaskError;
use crate::execution::{
    Completion, ConsoleSink, Execution, Principal, Run, RunId, StepContext, WorkerPool,
};
use crate::plan::{plan_body, Plan, PlanValidator};
use crate::tasks::InputBroker;
use crate::utils::colors;

/// Load settings and fold in the command-line overrides
pub fn settings(args: &RunArgs) -> Result<Settings> {
    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(max_workers) = args.max_workers {
        settings.set_max_workers(max_workers, "--max-workers");
    }
    if let Some(idle_timeout) = args.idle_timeout {
        settings.pool.idle_timeout_secs = idle_timeout;
    }
    if let Some(ref outbox) = args.outbox {
        settings.outbox_dir = outbox.clone();
    }
    settings.validate()?;
    Ok(settings)
}

/// Hands the single outcome of an execution to the command loop
struct ChannelCompletion {
    tx: Mutex<Option<oneshot::Sender<Result<Value, TaskError>>>>,
}

impl ChannelCompletion {
    fn new() -> (Arc<Self>, oneshot::Receiver<Result<Value, TaskError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    fn deliver(&self, outcome: Result<Value, TaskError>) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(outcome);
        }
    }
}

impl Completion for ChannelCompletion {
    fn on_success(&self, result: Value) {
        self.deliver(Ok(result));
    }

    fn on_failure(&self, cause: TaskError) {
        self.deliver(Err(cause));
    }
}

/// Split an operator line into task id and choice
pub fn parse_answer(line: &str) -> Option<(&str, &str)> {
    let (task_id, choice) = line.trim().split_once(char::is_whitespace)?;
    let choice = choice.trim();
    if choice.is_empty() {
        return None;
    }
    Some((task_id, choice))
}

fn capabilities(plan: &Plan, settings: &Settings, workspace: &Path) -> Capabilities {
    let jobs = ShellJobScheduler::new(plan.catalog(), workspace);
    let mailer = OutboxMailer::new(workspace.join(&settings.outbox_dir));
    let mut capabilities = Capabilities::default()
        .with_jobs(Arc::new(jobs))
        .with_mailer(Arc::new(mailer));

    let git = match settings.git {
        Some(ref git) => Ok(GitCheckout::with_binary(git)),
        None => GitCheckout::locate(),
    };
    match git {
        Ok(git) => capabilities = capabilities.with_scm(Arc::new(git)),
        Err(e) => warn!(error = %e, "Source checkout unavailable"),
    }
    capabilities
}

/// Run the plan
pub async fn run(args: RunArgs, settings: Settings, verbose: bool) -> Result<()> {
    let plan = Plan::from_file(&args.plan)?;

    let validation = PlanValidator::validate(&plan);
    if !validation.is_valid() {
        eprintln!("{}", "Plan validation failed:".red().bold());
        for error in &validation.errors {
            eprintln!("  {} {}", "✗".red(), error);
        }
        return Err(miette::miette!("Plan configuration is invalid"));
    }

    if validation.has_warnings() && verbose {
        eprintln!("{}", "Plan warnings:".yellow().bold());
        for warning in &validation.warnings {
            eprintln!("  {} {}", "⚠".yellow(), warning);
        }
        eprintln!();
    }

    let workspace = std::env::current_dir()
        .map_err(|e| miette::miette!("Failed to get current directory: {}", e))?;

    let run = Arc::new(Run::new(RunId::new(Uuid::new_v4().to_string()), &plan.name, 1));
    let broker = InputBroker::new();
    broker.attach(&run);

    let operator = std::env::var("USER").ok().map(Principal::new);
    let mut env: HashMap<String, String> = plan.env.clone();
    env.entry("WORKSPACE".to_string())
        .or_insert_with(|| workspace.display().to_string());

    let mut context = StepContext::new(&workspace, Arc::clone(&run), Arc::new(ConsoleSink))
        .with_env(env);
    if let Some(ref operator) = operator {
        context = context.with_principal(operator.clone());
    }

    let (completion, mut outcome) = ChannelCompletion::new();
    let execution = Execution::new(
        context,
        WorkerPool::new(&settings.pool),
        capabilities(&plan, &settings, &workspace),
        completion,
    );

    colors::print_header(&format!("Deploying {}", plan.name));
    if let Some(ref description) = plan.description {
        println!("{}", colors::dimmed(description));
    }
    println!();

    execution.start(plan_body(&execution, &plan)).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut interrupted = false;

    let result = loop {
        tokio::select! {
            result = &mut outcome => {
                break result.map_err(|_| miette::miette!("Execution ended without reporting an outcome"))?;
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                eprintln!();
                colors::print_warning("Interrupted, stopping running tasks...");
                execution
                    .stop(TaskError::Aborted {
                        reason: "interrupted".to_string(),
                        by: operator.clone(),
                    })
                    .await;
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => answer(&broker, &run, &line, operator.clone()),
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    stdin_open = false;
                }
            },
        }
    };

    broker.detach(run.id());
    println!();

    match result {
        Ok(value) => {
            println!("{}", colors::success(&format!("Deployment '{}' succeeded", plan.name)).bold());
            if verbose && !value.is_null() {
                println!("{}", colors::dimmed(&value.to_string()));
            }
            Ok(())
        }
        Err(cause) => {
            eprintln!("{}", colors::error(&format!("Deployment '{}' failed", plan.name)).bold());
            Err(cause.into())
        }
    }
}

/// Resolve one operator line against the pending inputs of `run`
fn answer(broker: &InputBroker, run: &Run, line: &str, operator: Option<Principal>) {
    let line = line.trim();
    if line.is_empty() || line == "list" {
        let pending = broker.pending(run.id());
        if pending.is_empty() {
            colors::print_info("No inputs are waiting");
        }
        for input in pending {
            colors::print_info(&format!(
                "{} {} [{}]",
                colors::code(&input.id.to_string()),
                input.message,
                input.choices.join(", ")
            ));
        }
        return;
    }

    let (task_id, choice) = match parse_answer(line) {
        Some(answer) => (Some(answer.0), Some(answer.1)),
        None => (Some(line), None),
    };
    match broker.resolve(run.id(), task_id, choice, operator) {
        Ok(()) => {}
        Err(e) => colors::print_error(&e.to_string()),
    }
}
