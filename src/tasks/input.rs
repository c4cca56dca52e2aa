// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Input task
//!
//! Blocks until an external actor picks one of a fixed set of choices.
//! Waiting inputs are listed in their run's [`PendingInputs`] registry and
//! resolved by id through the [`InputBroker`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::{Task, TaskKind};
use crate::errors::{InputError, TaskError};
use crate::execution::{Execution, Principal, Run, RunId, Scope};

/// Choice offered when an input declares none
pub const ABORT_CHOICE: &str = "Abort";

const CANCEL_REASON: &str = "cancel is requested";

/// Terminal state of an input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Selected {
        choice: String,
        operator: Option<Principal>,
    },
    Cancelled(String),
}

/// Set-once slot one party waits on and another resolves.
///
/// The first resolution wins; later ones are rejected without blocking.
#[derive(Debug)]
pub struct Rendezvous {
    tx: Mutex<Option<oneshot::Sender<Outcome>>>,
    rx: Mutex<Option<oneshot::Receiver<Outcome>>>,
}

impl Rendezvous {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Move into the terminal state `outcome`
    pub fn resolve(&self, outcome: Outcome) -> Result<(), TaskError> {
        let tx = self
            .tx
            .lock()
            .take()
            .ok_or_else(|| TaskError::illegal_state("input is already resolved"))?;
        // the waiter may be gone; the outcome is still final
        let _ = tx.send(outcome);
        Ok(())
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Wait for the outcome. Only one wait is allowed.
    pub async fn wait(&self) -> Result<Outcome, TaskError> {
        let rx = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| TaskError::illegal_state("input is already being waited on"))?;
        rx.await
            .map_err(|_| TaskError::aborted("input abandoned before resolution"))
    }
}

impl Default for Rendezvous {
    fn default() -> Self {
        Self::new()
    }
}

/// A waiting input as seen from outside
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingInput {
    pub id: u64,
    pub message: String,
    pub choices: Vec<String>,
}

impl PendingInput {
    /// Resolution reference for `choice`, relative to the server root
    pub fn reference(&self, run: &Run, choice: &str) -> String {
        format!(
            "/{}input/select?taskId={}&choice={}",
            run.url(),
            self.id,
            urlencoding::encode(choice)
        )
    }
}

#[derive(Debug)]
struct Entry {
    input: PendingInput,
    slot: Arc<Rendezvous>,
}

#[derive(Debug)]
struct PendingState {
    next_id: u64,
    entries: BTreeMap<u64, Entry>,
}

/// Registry of the inputs a run is waiting on. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct PendingInputs {
    state: Mutex<PendingState>,
}

impl PendingInputs {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PendingState {
                next_id: 1,
                entries: BTreeMap::new(),
            }),
        }
    }

    /// Add a waiting input and return its id
    pub fn register(&self, message: &str, choices: &[String], slot: Arc<Rendezvous>) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.entries.insert(
            id,
            Entry {
                input: PendingInput {
                    id,
                    message: message.to_string(),
                    choices: choices.to_vec(),
                },
                slot,
            },
        );
        id
    }

    pub fn remove(&self, id: u64) -> bool {
        self.state.lock().entries.remove(&id).is_some()
    }

    pub fn get(&self, id: u64) -> Option<PendingInput> {
        self.state.lock().entries.get(&id).map(|e| e.input.clone())
    }

    pub fn list(&self) -> Vec<PendingInput> {
        self.state
            .lock()
            .entries
            .values()
            .map(|e| e.input.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Select `choice` for input `id` on behalf of `operator`.
    ///
    /// Choices match case-insensitively; the declared spelling is delivered.
    pub fn resolve(
        &self,
        id: u64,
        choice: &str,
        operator: Option<Principal>,
    ) -> Result<(), InputError> {
        let (choices, slot) = {
            let state = self.state.lock();
            let entry = state
                .entries
                .get(&id)
                .ok_or_else(|| InputError::InvalidTaskId(id.to_string()))?;
            (entry.input.choices.clone(), Arc::clone(&entry.slot))
        };

        let choice = choices
            .iter()
            .find(|c| c.eq_ignore_ascii_case(choice))
            .cloned()
            .ok_or_else(|| InputError::InvalidChoice {
                choice: choice.to_string(),
                allowed: choices.clone(),
            })?;

        slot.resolve(Outcome::Selected { choice, operator })
            .map_err(|_| InputError::AlreadyResolved(id))?;
        self.remove(id);
        Ok(())
    }
}

impl Default for PendingInputs {
    fn default() -> Self {
        Self::new()
    }
}

/// Input parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputSpec {
    pub message: String,

    #[serde(default)]
    pub choices: Vec<String>,
}

impl InputSpec {
    pub fn new<I, S>(message: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            message: message.into(),
            choices: choices.into_iter().map(Into::into).collect(),
        }
    }

    /// Declared choices, or just [`ABORT_CHOICE`] when none are declared
    pub fn effective_choices(&self) -> Vec<String> {
        if self.choices.is_empty() {
            vec![ABORT_CHOICE.to_string()]
        } else {
            self.choices.clone()
        }
    }
}

/// Removes an input from its registry when dropped
struct Listed<'a> {
    inputs: &'a PendingInputs,
    id: u64,
}

impl Drop for Listed<'_> {
    fn drop(&mut self) {
        self.inputs.remove(self.id);
    }
}

pub struct InputTask {
    execution: Arc<Execution>,
    spec: InputSpec,
    slot: Arc<Rendezvous>,
    id: Mutex<Option<u64>>,
}

impl InputTask {
    pub fn new(execution: Arc<Execution>, spec: InputSpec) -> Self {
        Self {
            execution,
            spec,
            slot: Arc::new(Rendezvous::new()),
            id: Mutex::new(None),
        }
    }

    /// Registry id, once `start()` has registered the input
    pub fn id(&self) -> Option<u64> {
        *self.id.lock()
    }
}

#[async_trait]
impl Task for InputTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Input
    }

    async fn start(&self, scope: &Scope) -> Result<Value, TaskError> {
        let run = Arc::clone(self.execution.run());
        let choices = self.spec.effective_choices();

        let id = run
            .inputs()
            .register(&self.spec.message, &choices, Arc::clone(&self.slot));
        *self.id.lock() = Some(id);
        let _listed = Listed {
            inputs: run.inputs(),
            id,
        };

        let pending = PendingInput {
            id,
            message: self.spec.message.clone(),
            choices: choices.clone(),
        };
        self.execution
            .println(scope, &format!("{}: ", self.spec.message));
        for choice in &choices {
            self.execution.println(
                scope,
                &format!("  {}: {}", choice, pending.reference(&run, choice)),
            );
        }
        info!(run = %run.id(), id, "Waiting for input");

        match self.slot.wait().await? {
            Outcome::Cancelled(reason) => Err(TaskError::aborted(reason)),
            Outcome::Selected { choice, operator } => {
                let line = match &operator {
                    Some(operator) => format!("{} is selected by {}", choice, operator),
                    None => format!("{} is selected", choice),
                };
                self.execution.println(scope, &line);

                if choice.eq_ignore_ascii_case(ABORT_CHOICE) {
                    return Err(TaskError::Aborted {
                        reason: format!("{} is selected", choice),
                        by: operator,
                    });
                }
                Ok(Value::String(choice))
            }
        }
    }

    async fn stop(&self) -> Result<(), TaskError> {
        match self.slot.resolve(Outcome::Cancelled(CANCEL_REASON.to_string())) {
            Ok(()) => debug!(id = ?self.id(), "Input cancelled"),
            Err(_) => debug!(id = ?self.id(), "Input already resolved"),
        }
        if let Some(id) = self.id() {
            self.execution.run().inputs().remove(id);
        }
        Ok(())
    }
}

/// External resolution endpoint. Maps run ids to their pending inputs.
#[derive(Debug, Default)]
pub struct InputBroker {
    runs: Mutex<HashMap<RunId, Arc<PendingInputs>>>,
}

impl InputBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `run`'s inputs resolvable
    pub fn attach(&self, run: &Run) {
        self.runs
            .lock()
            .insert(run.id().clone(), Arc::clone(run.inputs()));
    }

    pub fn detach(&self, run_id: &RunId) {
        self.runs.lock().remove(run_id);
    }

    /// Inputs currently waiting in `run_id`
    pub fn pending(&self, run_id: &RunId) -> Vec<PendingInput> {
        self.runs
            .lock()
            .get(run_id)
            .map(|inputs| inputs.list())
            .unwrap_or_default()
    }

    /// Resolve an input from raw request parameters
    pub fn resolve(
        &self,
        run_id: &RunId,
        task_id: Option<&str>,
        choice: Option<&str>,
        operator: Option<Principal>,
    ) -> Result<(), InputError> {
        let inputs = self
            .runs
            .lock()
            .get(run_id)
            .cloned()
            .ok_or_else(|| InputError::UnknownRun(run_id.to_string()))?;

        let task_id = task_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(InputError::MissingTaskId)?;
        let id: u64 = task_id
            .parse()
            .map_err(|_| InputError::InvalidTaskId(task_id.to_string()))?;
        if inputs.get(id).is_none() {
            return Err(InputError::InvalidTaskId(task_id.to_string()));
        }

        let choice = choice
            .filter(|s| !s.is_empty())
            .ok_or(InputError::MissingChoice)?;

        inputs.resolve(id, choice, operator)
    }
}
