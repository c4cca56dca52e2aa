// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 deployflow contributors

//! Running-task registry
//!
//! Ordered set of tasks whose `start()` is in flight. It exists only to drive
//! cascading stop, which visits a snapshot in reverse registration order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::tasks::Task;

#[derive(Default)]
pub struct TaskRegistry {
    running: Mutex<Vec<(u64, Arc<dyn Task>)>>,
    next_id: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task`; it stays registered until the returned guard drops
    pub fn register(&self, task: Arc<dyn Task>) -> Registration<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.running.lock().push((id, task));
        Registration { registry: self, id }
    }

    /// Registered tasks, most recently registered first
    pub fn snapshot_lifo(&self) -> Vec<Arc<dyn Task>> {
        self.running
            .lock()
            .iter()
            .rev()
            .map(|(_, task)| Arc::clone(task))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.running.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deregister(&self, id: u64) {
        self.running.lock().retain(|(entry, _)| *entry != id);
    }
}

/// Membership of one task in a [`TaskRegistry`]
#[must_use = "the task is deregistered as soon as the registration drops"]
pub struct Registration<'a> {
    registry: &'a TaskRegistry,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.deregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::SleepTask;
    use std::time::Duration;

    fn sleep_task(millis: u64) -> Arc<dyn Task> {
        Arc::new(SleepTask::new(Duration::from_millis(millis)))
    }

    #[test]
    fn test_registration_lifetime() {
        let registry = TaskRegistry::new();
        {
            let _a = registry.register(sleep_task(1));
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_lifo() {
        let registry = TaskRegistry::new();
        let first = sleep_task(1);
        let second = sleep_task(2);

        let _a = registry.register(Arc::clone(&first));
        let _b = registry.register(Arc::clone(&second));

        let snapshot = registry.snapshot_lifo();
        assert!(Arc::ptr_eq(&snapshot[0], &second));
        assert!(Arc::ptr_eq(&snapshot[1], &first));
    }

    #[test]
    fn test_out_of_order_deregistration() {
        let registry = TaskRegistry::new();
        let first = sleep_task(1);
        let second = sleep_task(2);

        let a = registry.register(Arc::clone(&first));
        let _b = registry.register(Arc::clone(&second));
        drop(a);

        let snapshot = registry.snapshot_lifo();
        assert_eq!(snapshot.len(), 1);
        assert!(Arc::ptr_eq(&snapshot[0], &second));
    }
}
