// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Tasks
//!
//! A task is a cancellable unit of work. `start()` runs it to completion;
//! `stop()` may be called concurrently from elsewhere and asks a running
//! `start()` to give up. Cancellation is cooperative: `start()` observes the
//! request and returns.

mod checkout;
mod input;
mod mail;
mod parallel;
mod sleep;
mod trigger;

pub use checkout::{CheckoutSpec, CheckoutTask};
pub use input::{InputBroker, InputSpec, InputTask, Outcome, PendingInput, PendingInputs, Rendezvous, ABORT_CHOICE};
pub use mail::{parse_addresses, MailSpec, MailTask};
pub use parallel::ParallelTask;
pub use sleep::SleepTask;
pub use trigger::{TriggerSpec, TriggerTask};

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::TaskError;
use crate::execution::{Scope, Work};

/// The task contract
#[async_trait]
pub trait Task: Send + Sync {
    /// Which variant this is
    fn kind(&self) -> TaskKind;

    /// Run the task under `scope` until it completes, fails or is stopped
    async fn start(&self, scope: &Scope) -> Result<Value, TaskError>;

    /// Ask a running `start()` to stop.
    ///
    /// Must be safe to call at any time, including after `start()` returned.
    async fn stop(&self) -> Result<(), TaskError>;
}

/// Task variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Sleep,
    Mail,
    Checkout,
    Trigger,
    Input,
    Parallel,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sleep => "sleep",
            Self::Mail => "mail",
            Self::Checkout => "checkout",
            Self::Trigger => "trigger",
            Self::Input => "input",
            Self::Parallel => "parallel",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to create, with its parameters
pub enum TaskSpec {
    Sleep(Duration),
    Mail(MailSpec),
    Checkout(CheckoutSpec),
    Trigger(TriggerSpec),
    Input(InputSpec),
    /// Named branches, in declaration order. Names must be unique.
    Parallel(Vec<(String, Work)>),
}

impl TaskSpec {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Sleep(_) => TaskKind::Sleep,
            Self::Mail(_) => TaskKind::Mail,
            Self::Checkout(_) => TaskKind::Checkout,
            Self::Trigger(_) => TaskKind::Trigger,
            Self::Input(_) => TaskKind::Input,
            Self::Parallel(_) => TaskKind::Parallel,
        }
    }
}
