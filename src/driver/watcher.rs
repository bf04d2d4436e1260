//! Background completion watcher.
//!
//! One watcher per waited task. Polls execution status at a fixed interval,
//! strictly sequentially, and converts the first completed status report (or
//! an exhausted transport-error budget) into the task's single terminal
//! result.

use crate::daemon::DaemonApi;
use crate::driver::handle::{TaskHandle, TaskResult};
use crate::driver::TaskEvent;
use crate::rpc::{ExecutionState, ExecutionStatusReply};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Poll interval for execution status.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline for each status poll.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Exit code reported when no real exit code exists: cancelled executions
/// and waits terminated by transport errors.
pub(crate) const SENTINEL_EXIT_CODE: i32 = -1;

/// Spawns the polling loop for one task. The caller must have claimed the
/// handle's watcher slot first.
pub(crate) fn spawn(
    client: Arc<dyn DaemonApi>,
    handle: Arc<TaskHandle>,
    retry_limit: u32,
    cancel: CancellationToken,
    events: broadcast::Sender<TaskEvent>,
) {
    tokio::spawn(async move {
        watch_task(client, handle, retry_limit, cancel, events).await;
    });
}

async fn watch_task(
    client: Arc<dyn DaemonApi>,
    handle: Arc<TaskHandle>,
    retry_limit: u32,
    cancel: CancellationToken,
    events: broadcast::Sender<TaskEvent>,
) {
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    let mut consecutive_errors = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        match client
            .get_execution_status(handle.session_id(), handle.execution_id(), POLL_TIMEOUT)
            .await
        {
            Err(failure) => {
                if consecutive_errors >= retry_limit {
                    let result = TaskResult {
                        exit_code: SENTINEL_EXIT_CODE,
                        error: Some(failure.to_string()),
                    };
                    finish(&handle, &events, result);
                    return;
                }
                consecutive_errors += 1;
                tracing::warn!(
                    task_id = %handle.task_id(),
                    error = %failure,
                    attempt = consecutive_errors,
                    "status poll failed, retrying"
                );
            }
            Ok(reply) => {
                consecutive_errors = 0;
                handle.record_status(reply.status);
                if reply.complete {
                    finish(&handle, &events, terminal_result(&reply));
                    return;
                }
            }
        }
    }
}

/// Maps a completed status report onto the externally visible result.
pub(crate) fn terminal_result(reply: &ExecutionStatusReply) -> TaskResult {
    match reply.status {
        ExecutionState::Cancelled => TaskResult {
            exit_code: SENTINEL_EXIT_CODE,
            error: None,
        },
        ExecutionState::Failed => TaskResult {
            exit_code: if reply.exit_code != 0 { reply.exit_code } else { 1 },
            error: Some(
                reply
                    .error
                    .clone()
                    .unwrap_or_else(|| "execution failed".to_string()),
            ),
        },
        ExecutionState::Running | ExecutionState::Completed => TaskResult {
            exit_code: reply.exit_code,
            error: reply.error.clone(),
        },
    }
}

fn finish(handle: &TaskHandle, events: &broadcast::Sender<TaskEvent>, result: TaskResult) {
    // set_completed is first-write-wins, so a stop or recovery racing the
    // watcher still produces exactly one terminal emission.
    if handle.set_completed(result.clone()) {
        let mut annotations = HashMap::new();
        annotations.insert("exit_code".to_string(), result.exit_code.to_string());
        if let Some(error) = &result.error {
            annotations.insert("error".to_string(), error.clone());
        }
        let _ = events.send(TaskEvent {
            task_id: handle.task_id().to_string(),
            timestamp: Utc::now(),
            message: "task terminal".to_string(),
            annotations,
        });
        tracing::info!(
            task_id = %handle.task_id(),
            exit_code = result.exit_code,
            "task reached terminal state"
        );
    }
}
