//! Task lifecycle driver.
//!
//! Implements the scheduler-facing contract over the daemon client, the task
//! registry, the session manager, and the background completion watchers.
//! Tasks move through `unstarted -> starting -> running -> terminal ->
//! destroyed`; every terminal transition is produced exactly once.

mod fingerprint;
mod handle;
mod registry;
mod session;
mod state;
mod watcher;

pub use fingerprint::{Fingerprint, HealthState};
pub use handle::{TaskHandle, TaskResult, TaskStatus};
pub use state::{TaskState, TASK_STATE_VERSION};

use crate::config::{DriverConfig, TaskSpec};
use crate::daemon::DaemonApi;
use crate::error::DriverError;
use crate::rpc::ExecuteSnippetRequest;
use chrono::{DateTime, Utc};
use registry::TaskRegistry;
use session::SessionManager;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Driver name reported in fingerprint attributes.
pub const PLUGIN_NAME: &str = "runnerd";

/// Driver version reported in fingerprint attributes.
pub const PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Deadline for execute_snippet RPCs.
const EXECUTE_SNIPPET_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline for the status fetch during task recovery.
const RECOVER_STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for session deletion during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the task event feed.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Annotated lifecycle event for the scheduler's event feed.
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub annotations: HashMap<String, String>,
}

/// Locally computed task statistics. The daemon exposes no per-execution
/// resource usage, so this stays a registry projection.
#[derive(Debug, Clone)]
pub struct TaskStats {
    pub task_id: String,
    pub started_at: DateTime<Utc>,
    pub uptime: Duration,
    pub running: bool,
}

/// The task driver. One instance per process, owning one daemon session.
pub struct RunnerdDriver {
    config: DriverConfig,
    client: Arc<dyn DaemonApi>,
    tasks: TaskRegistry,
    session: Arc<SessionManager>,
    events: broadcast::Sender<TaskEvent>,
    shutdown: CancellationToken,
}

impl RunnerdDriver {
    pub fn new(config: DriverConfig, client: Arc<dyn DaemonApi>) -> Self {
        let session = Arc::new(SessionManager::new(client.clone(), config.session.clone()));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            client,
            tasks: TaskRegistry::new(),
            session,
            events,
            shutdown: CancellationToken::new(),
        }
    }

    /// Eager bootstrap at configure time. Failures are reported, not fatal:
    /// the daemon may not be running yet, and the fingerprint will surface it
    /// as undetected until it comes up.
    pub async fn configure(&self) {
        if let Err(failure) = self.client.health(fingerprint::HEALTH_PROBE_TIMEOUT).await {
            tracing::warn!(error = %failure, "daemon health check failed");
        }
        if let Err(err) = self.session.ensure().await {
            tracing::warn!(
                error = %err,
                "failed to initialize session (daemon may not be running yet)"
            );
        }
    }

    /// Starts a task: validates the spec locally, resolves its source,
    /// ensures the session, and submits the execution. Any failure before
    /// the daemon accepts the execution leaves no registered handle and no
    /// daemon-side state. Returns the recoverable snapshot for the
    /// scheduler's state store.
    pub async fn start_task(
        &self,
        task_id: &str,
        task_dir: &Path,
        spec: TaskSpec,
    ) -> Result<TaskState, DriverError> {
        if self.tasks.contains(task_id) {
            return Err(DriverError::TaskExists {
                task_id: task_id.to_string(),
            });
        }

        spec.validate()?;
        spec.validate_language(&self.config.session.effective_languages())?;
        if spec.overrides.is_set() {
            tracing::warn!(
                task_id,
                "per-task overrides are not supported by the daemon and will be ignored"
            );
        }

        let code = resolve_source(task_dir, &spec).await?;
        let session_id = self.session.ensure().await?;

        let execution_id = format!("exec-{}", Uuid::new_v4());
        let request = ExecuteSnippetRequest {
            session_id: session_id.clone(),
            execution_id,
            code,
            language: spec.language.clone(),
            env: spec.env.clone(),
            args: spec.args.clone(),
        };
        let reply = self
            .client
            .execute_snippet(request, EXECUTE_SNIPPET_TIMEOUT)
            .await
            .map_err(DriverError::Rpc)?;

        let started_at = Utc::now();
        let handle = Arc::new(TaskHandle::new(
            task_id,
            &reply.execution_id,
            &session_id,
            spec.clone(),
            started_at,
            reply.status,
        ));
        let snapshot = TaskState::new(task_id, &reply.execution_id, &session_id, spec, started_at);
        self.tasks.insert(task_id, handle);

        self.emit_event(task_id, "task started", |annotations| {
            annotations.insert("execution_id".to_string(), reply.execution_id.clone());
        });
        tracing::info!(
            task_id,
            execution_id = %reply.execution_id,
            session_id = %session_id,
            "task started"
        );
        Ok(snapshot)
    }

    /// Rebuilds in-memory state for a task from its persisted snapshot after
    /// a process restart. Idempotent for already-registered tasks. When the
    /// execution finished while the process was down, the handle is created
    /// already terminal.
    pub async fn recover_task(&self, snapshot: &TaskState) -> Result<(), DriverError> {
        if self.tasks.contains(&snapshot.task_id) {
            return Ok(());
        }

        self.session.adopt(&snapshot.session_id);

        let reply = self
            .client
            .get_execution_status(
                &snapshot.session_id,
                &snapshot.execution_id,
                RECOVER_STATUS_TIMEOUT,
            )
            .await
            .map_err(DriverError::Rpc)?;

        let handle = Arc::new(TaskHandle::new(
            &snapshot.task_id,
            &snapshot.execution_id,
            &snapshot.session_id,
            snapshot.spec.clone(),
            snapshot.started_at,
            reply.status,
        ));
        if reply.complete {
            handle.set_completed(watcher::terminal_result(&reply));
        }
        self.tasks.insert(&snapshot.task_id, handle);

        tracing::info!(
            task_id = %snapshot.task_id,
            execution_id = %snapshot.execution_id,
            "task recovered"
        );
        Ok(())
    }

    /// Returns a channel yielding the task's single terminal result,
    /// attaching the completion watcher on first call. A wait issued after
    /// completion resolves immediately with the recorded result.
    pub fn wait_task(&self, task_id: &str) -> Result<oneshot::Receiver<TaskResult>, DriverError> {
        let handle = self
            .tasks
            .get(task_id)
            .ok_or_else(|| DriverError::not_found(task_id))?;

        if handle.is_running() && handle.try_attach_watcher() {
            watcher::spawn(
                self.client.clone(),
                handle.clone(),
                self.config.status_retry_limit,
                self.shutdown.child_token(),
                self.events.clone(),
            );
        }

        let mut done = handle.subscribe();
        let cancel = self.shutdown.child_token();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = tokio::select! {
                // Shutdown or a dropped handle closes the channel without a
                // fabricated result.
                _ = cancel.cancelled() => None,
                changed = done.wait_for(|result| result.is_some()) => match changed {
                    Ok(guard) => (*guard).clone(),
                    Err(_) => None,
                },
            };
            if let Some(result) = result {
                let _ = tx.send(result);
            }
        });
        Ok(rx)
    }

    /// Cancels the task's execution. The signal is advisory only: the daemon
    /// contract exposes a single binary cancellation.
    pub async fn stop_task(
        &self,
        task_id: &str,
        timeout: Duration,
        signal: Option<&str>,
    ) -> Result<(), DriverError> {
        let handle = self
            .tasks
            .get(task_id)
            .ok_or_else(|| DriverError::not_found(task_id))?;

        if let Some(signal) = signal {
            tracing::info!(task_id, signal, "stop signal is advisory; issuing plain cancellation");
        }

        self.client
            .cancel_execution(handle.session_id(), handle.execution_id(), timeout)
            .await
            .map_err(DriverError::Rpc)?;

        self.emit_event(task_id, "stop requested", |_| {});
        Ok(())
    }

    /// Read-only snapshot of the task.
    pub fn inspect_task(&self, task_id: &str) -> Result<TaskStatus, DriverError> {
        let handle = self
            .tasks
            .get(task_id)
            .ok_or_else(|| DriverError::not_found(task_id))?;
        Ok(handle.status())
    }

    /// Locally computed statistics for the task.
    pub fn task_stats(&self, task_id: &str) -> Result<TaskStats, DriverError> {
        let handle = self
            .tasks
            .get(task_id)
            .ok_or_else(|| DriverError::not_found(task_id))?;
        let started_at = handle.started_at();
        let uptime = (Utc::now() - started_at).to_std().unwrap_or_default();
        Ok(TaskStats {
            task_id: task_id.to_string(),
            started_at,
            uptime,
            running: handle.is_running(),
        })
    }

    /// Subscribes to the lifecycle event feed.
    pub fn task_events(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    /// Removes a terminal task from the registry. Absent tasks are a no-op;
    /// running tasks are only removed with `force`, and removal issues no
    /// cancellation of its own.
    pub fn destroy_task(&self, task_id: &str, force: bool) -> Result<(), DriverError> {
        let Some(handle) = self.tasks.get(task_id) else {
            return Ok(());
        };
        if handle.is_running() && !force {
            return Err(DriverError::TaskStillRunning {
                task_id: task_id.to_string(),
            });
        }
        self.tasks.remove(task_id);
        Ok(())
    }

    /// Signal forwarding is not supported by the daemon contract; the
    /// request is recorded rather than silently dropped.
    pub fn signal_task(&self, task_id: &str, signal: &str) -> Result<(), DriverError> {
        if self.tasks.get(task_id).is_none() {
            return Err(DriverError::not_found(task_id));
        }
        tracing::warn!(task_id, signal, "signal forwarding not supported by the daemon");
        self.emit_event(task_id, "signal ignored: not supported by the daemon", |a| {
            a.insert("signal".to_string(), signal.to_string());
        });
        Ok(())
    }

    /// Emits fingerprints on the returned channel: one immediately, then one
    /// per period, until shutdown or the receiver is dropped.
    pub fn fingerprints(&self) -> mpsc::Receiver<Fingerprint> {
        let (tx, rx) = mpsc::channel(1);
        let client = self.client.clone();
        let socket_path = self.config.socket_path();
        let session = self.session.clone();
        let cancel = self.shutdown.child_token();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(fingerprint::FINGERPRINT_PERIOD);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = interval.tick() => {}
                }
                let report = fingerprint::build_fingerprint(
                    client.as_ref(),
                    socket_path.as_deref(),
                    session.current(),
                )
                .await;
                if tx.send(report).await.is_err() {
                    return;
                }
            }
        });
        rx
    }

    /// Best-effort shutdown: deletes the owned session under a bounded
    /// deadline, closes the daemon connection, and cancels all background
    /// watchers. Failures are logged, never propagated.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down {} driver", PLUGIN_NAME);

        if let Some(session_id) = self.session.current() {
            match self
                .client
                .delete_session(&session_id, SHUTDOWN_TIMEOUT)
                .await
            {
                Ok(reply) if reply.success => {
                    tracing::info!(session_id = %session_id, "session deleted");
                }
                Ok(_) => {
                    tracing::warn!(session_id = %session_id, "daemon refused session deletion");
                }
                Err(failure) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %failure,
                        "failed to delete session on shutdown"
                    );
                }
            }
        }

        self.client.close();
        self.shutdown.cancel();
    }

    fn emit_event(
        &self,
        task_id: &str,
        message: &str,
        annotate: impl FnOnce(&mut HashMap<String, String>),
    ) {
        let mut annotations = HashMap::new();
        annotate(&mut annotations);
        // Nobody listening is fine; the feed is best-effort.
        let _ = self.events.send(TaskEvent {
            task_id: task_id.to_string(),
            timestamp: Utc::now(),
            message: message.to_string(),
            annotations,
        });
    }
}

/// Produces the snippet source: inline code as-is, or the script file read
/// from under the task directory.
async fn resolve_source(task_dir: &Path, spec: &TaskSpec) -> Result<String, DriverError> {
    if let Some(code) = &spec.code {
        return Ok(code.clone());
    }
    let script = spec
        .script
        .as_deref()
        .ok_or_else(|| DriverError::config("either 'script' or 'code' must be specified"))?;
    let path = resolve_script_path(task_dir, script)?;
    tokio::fs::read_to_string(&path).await.map_err(|e| {
        DriverError::resource(format!("failed to read script file {}: {}", path.display(), e))
    })
}

/// Lexically resolves `script` under `task_dir`, rejecting absolute paths
/// and any traversal out of the task directory before touching the
/// filesystem.
fn resolve_script_path(task_dir: &Path, script: &str) -> Result<PathBuf, DriverError> {
    let mut resolved = task_dir.to_path_buf();
    let mut depth: usize = 0;

    for component in Path::new(script).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(DriverError::resource(format!(
                        "script path '{}' escapes the task directory",
                        script
                    )));
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(DriverError::resource(format!(
                    "script path '{}' must be relative to the task directory",
                    script
                )));
            }
        }
    }

    if depth == 0 {
        return Err(DriverError::resource(format!(
            "script path '{}' does not name a file",
            script
        )));
    }
    Ok(resolved)
}

#[cfg(test)]
#[path = "tests/driver_tests.rs"]
mod tests;
