//! Concurrent store of task handles.

use crate::driver::handle::TaskHandle;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Task-id keyed handle store, shared between the lifecycle entry points and
/// the background completion watchers. Reads (inspect/stats/events) may
/// overlap writes (start/destroy).
#[derive(Default)]
pub struct TaskRegistry {
    store: RwLock<HashMap<String, Arc<TaskHandle>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, task_id: &str) -> Option<Arc<TaskHandle>> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        store.get(task_id).cloned()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        store.contains_key(task_id)
    }

    pub fn insert(&self, task_id: &str, handle: Arc<TaskHandle>) {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        store.insert(task_id.to_string(), handle);
    }

    pub fn remove(&self, task_id: &str) -> Option<Arc<TaskHandle>> {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        store.remove(task_id)
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn len(&self) -> usize {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        store.len()
    }

    #[cfg_attr(not(test), allow(dead_code))]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskSpec;
    use crate::rpc::ExecutionState;
    use chrono::Utc;

    fn handle(task_id: &str) -> Arc<TaskHandle> {
        Arc::new(TaskHandle::new(
            task_id,
            "exec-1",
            "node-test",
            TaskSpec::default(),
            Utc::now(),
            ExecutionState::Running,
        ))
    }

    #[test]
    fn insert_get_remove() {
        let registry = TaskRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get("a").is_none());

        registry.insert("a", handle("a"));
        assert!(registry.contains("a"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").map(|h| h.task_id().to_string()), Some("a".to_string()));

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.is_empty());
    }
}
