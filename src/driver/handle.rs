//! Per-task runtime record.
//!
//! A handle is the in-memory projection of one task: config snapshot, ids,
//! timestamps, the last status observed from the daemon, and the terminal
//! result once there is one. Handle methods never perform RPC; the driver
//! core and the completion watcher own all daemon traffic.

use crate::config::TaskSpec;
use crate::rpc::ExecutionState;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};
use tokio::sync::watch;

/// Terminal outcome of a task. Exactly one is produced per task; the first
/// write wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub exit_code: i32,
    pub error: Option<String>,
}

/// Read-only snapshot of a task for inspection and events.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub task_id: String,
    pub execution_id: String,
    pub session_id: String,
    pub daemon_status: ExecutionState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<TaskResult>,
}

struct HandleState {
    daemon_status: ExecutionState,
    completed_at: Option<DateTime<Utc>>,
    result: Option<TaskResult>,
}

pub struct TaskHandle {
    task_id: String,
    execution_id: String,
    session_id: String,
    spec: TaskSpec,
    started_at: DateTime<Utc>,
    state: RwLock<HandleState>,
    done: watch::Sender<Option<TaskResult>>,
    watcher_attached: AtomicBool,
}

impl TaskHandle {
    pub fn new(
        task_id: &str,
        execution_id: &str,
        session_id: &str,
        spec: TaskSpec,
        started_at: DateTime<Utc>,
        initial_status: ExecutionState,
    ) -> Self {
        let (done, _) = watch::channel(None);
        Self {
            task_id: task_id.to_string(),
            execution_id: execution_id.to_string(),
            session_id: session_id.to_string(),
            spec,
            started_at,
            state: RwLock::new(HandleState {
                daemon_status: initial_status,
                completed_at: None,
                result: None,
            }),
            done,
            watcher_attached: AtomicBool::new(false),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// True until a terminal result has been recorded.
    pub fn is_running(&self) -> bool {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.result.is_none()
    }

    /// Records the latest status reported by the daemon.
    pub fn record_status(&self, status: ExecutionState) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.daemon_status = status;
    }

    /// Records the terminal result. Idempotent: only the first call takes
    /// effect, stamps the completion time, and publishes to waiters.
    pub fn set_completed(&self, result: TaskResult) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.result.is_some() {
            return false;
        }
        state.result = Some(result.clone());
        state.completed_at = Some(Utc::now());
        drop(state);
        self.done.send_replace(Some(result));
        true
    }

    /// Subscribes to the terminal result. The channel already holds the
    /// result when the task finished earlier.
    pub fn subscribe(&self) -> watch::Receiver<Option<TaskResult>> {
        self.done.subscribe()
    }

    /// Claims the single watcher slot. Returns true for the first caller.
    pub fn try_attach_watcher(&self) -> bool {
        self.watcher_attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn status(&self) -> TaskStatus {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        TaskStatus {
            task_id: self.task_id.clone(),
            execution_id: self.execution_id.clone(),
            session_id: self.session_id.clone(),
            daemon_status: state.daemon_status,
            started_at: self.started_at,
            completed_at: state.completed_at,
            result: state.result.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_handle() -> TaskHandle {
        TaskHandle::new(
            "task-1",
            "exec-1",
            "node-test",
            TaskSpec {
                code: Some("print(1)".to_string()),
                ..TaskSpec::default()
            },
            Utc::now(),
            ExecutionState::Running,
        )
    }

    #[test]
    fn first_terminal_write_wins() {
        let handle = test_handle();
        assert!(handle.is_running());

        assert!(handle.set_completed(TaskResult {
            exit_code: 0,
            error: None,
        }));
        assert!(!handle.set_completed(TaskResult {
            exit_code: 7,
            error: Some("late".to_string()),
        }));

        let status = handle.status();
        assert_eq!(status.result.as_ref().map(|r| r.exit_code), Some(0));
        assert!(status.completed_at.is_some());
        assert!(!handle.is_running());
    }

    #[test]
    fn subscribe_sees_earlier_completion() {
        let handle = test_handle();
        handle.set_completed(TaskResult {
            exit_code: 3,
            error: None,
        });

        let rx = handle.subscribe();
        assert_eq!(rx.borrow().as_ref().map(|r| r.exit_code), Some(3));
    }

    #[test]
    fn watcher_slot_is_claimed_once() {
        let handle = test_handle();
        assert!(handle.try_attach_watcher());
        assert!(!handle.try_attach_watcher());
    }

    #[test]
    fn record_status_updates_projection() {
        let handle = test_handle();
        handle.record_status(ExecutionState::Completed);
        assert_eq!(handle.status().daemon_status, ExecutionState::Completed);
        // Status alone does not end the task; only a terminal result does.
        assert!(handle.is_running());
    }
}
