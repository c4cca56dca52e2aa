// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Sleep task

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::{Task, TaskKind};
use crate::errors::TaskError;
use crate::execution::Scope;

/// Blocks for a fixed duration; `stop()` interrupts the wait
pub struct SleepTask {
    duration: Duration,
    cancel: CancellationToken,
}

impl SleepTask {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            cancel: CancellationToken::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }
}

#[async_trait]
impl Task for SleepTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Sleep
    }

    async fn start(&self, _scope: &Scope) -> Result<Value, TaskError> {
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => Ok(Value::Null),
            _ = self.cancel.cancelled() => Err(TaskError::aborted("sleep interrupted")),
        }
    }

    async fn stop(&self) -> Result<(), TaskError> {
        self.cancel.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes() {
        let task = SleepTask::new(Duration::from_secs(30));
        let result = task.start(&Scope::root("/ws")).await;
        assert_eq!(result.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_stop_interrupts_sleep() {
        let task = Arc::new(SleepTask::new(Duration::from_secs(3600)));

        let running = Arc::clone(&task);
        let handle = tokio::spawn(async move { running.start(&Scope::root("/ws")).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        task.stop().await.unwrap();

        let result = handle.await.unwrap();
        assert!(result.unwrap_err().is_abort());
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let task = SleepTask::new(Duration::from_secs(3600));
        task.stop().await.unwrap();
        assert!(task.start(&Scope::root("/ws")).await.is_err());
    }
}
