//! Wire contract for the runnerd execution daemon.
//!
//! Declares the daemon's session/execution API as a tarpc service plus the
//! serde types that cross the wire. The driver treats the daemon as opaque
//! beyond these shapes: it never interprets daemon internals, and daemon-side
//! faults travel as a serializable [`DaemonFault`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Session configuration sent with `create_session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpec {
    /// Number of pre-warmed execution contexts the daemon keeps for the session.
    pub pool_size: u32,
    /// Languages executions may request, in configuration order.
    pub languages: Vec<String>,
    /// Intrinsic capabilities exposed to executions (e.g. "io", "env").
    pub intrinsics: Vec<String>,
    /// Memory ceiling per execution context, in megabytes.
    pub memory_limit_mb: u64,
    /// Whether the daemon's AI features are enabled for the session.
    pub enable_ai: bool,
}

/// Daemon-side session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Active,
    Draining,
    Closed,
}

/// Daemon-side execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Running => write!(f, "running"),
            ExecutionState::Completed => write!(f, "completed"),
            ExecutionState::Failed => write!(f, "failed"),
            ExecutionState::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionReply {
    pub session_id: String,
    pub status: SessionState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSessionReply {
    pub session_id: String,
    pub status: SessionState,
    pub config: SessionSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteSessionReply {
    pub success: bool,
}

/// Everything the daemon needs to run one snippet inside a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteSnippetRequest {
    pub session_id: String,
    /// Caller-chosen execution id; the daemon echoes the authoritative id back.
    pub execution_id: String,
    pub code: String,
    pub language: String,
    pub env: HashMap<String, String>,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteSnippetReply {
    pub execution_id: String,
    pub status: ExecutionState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStatusReply {
    pub execution_id: String,
    pub status: ExecutionState,
    /// True once the execution reached a terminal state; `exit_code` and
    /// `error` are only meaningful when set.
    pub complete: bool,
    pub exit_code: i32,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelExecutionReply {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReply {
    pub healthy: bool,
    pub version: String,
}

/// Errors returned by daemon RPC methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DaemonFault {
    /// Session id not known to the daemon.
    SessionNotFound { session_id: String },
    /// Session id already registered with a different configuration.
    SessionExists { session_id: String },
    /// Execution id not known within the session.
    ExecutionNotFound { execution_id: String },
    /// Requested language is not enabled for the session.
    LanguageDisabled { language: String },
    /// Internal daemon error.
    Internal { message: String },
}

impl std::fmt::Display for DaemonFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonFault::SessionNotFound { session_id } => {
                write!(f, "session not found: {}", session_id)
            }
            DaemonFault::SessionExists { session_id } => {
                write!(f, "session already exists: {}", session_id)
            }
            DaemonFault::ExecutionNotFound { execution_id } => {
                write!(f, "execution not found: {}", execution_id)
            }
            DaemonFault::LanguageDisabled { language } => {
                write!(f, "language not enabled: {}", language)
            }
            DaemonFault::Internal { message } => write!(f, "internal error: {}", message),
        }
    }
}

impl std::error::Error for DaemonFault {}

/// Result type for daemon operations.
pub type DaemonReply<T> = Result<T, DaemonFault>;

/// Execution API exposed by the runnerd daemon.
#[tarpc::service]
pub trait ExecutionApi {
    /// Create a session with the given id and configuration.
    async fn create_session(session_id: String, config: SessionSpec)
        -> DaemonReply<CreateSessionReply>;

    /// Fetch an existing session.
    async fn get_session(session_id: String) -> DaemonReply<GetSessionReply>;

    /// Delete a session and release its execution contexts.
    async fn delete_session(session_id: String) -> DaemonReply<DeleteSessionReply>;

    /// Submit a snippet for execution within a session.
    async fn execute_snippet(request: ExecuteSnippetRequest) -> DaemonReply<ExecuteSnippetReply>;

    /// Current status of an execution.
    async fn get_execution_status(
        session_id: String,
        execution_id: String,
    ) -> DaemonReply<ExecutionStatusReply>;

    /// Cancel a running execution.
    async fn cancel_execution(
        session_id: String,
        execution_id: String,
    ) -> DaemonReply<CancelExecutionReply>;

    /// Daemon liveness and version.
    async fn health() -> HealthReply;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_status_reply_roundtrip() {
        let reply = ExecutionStatusReply {
            execution_id: "exec-1".to_string(),
            status: ExecutionState::Failed,
            complete: true,
            exit_code: 2,
            stdout: None,
            stderr: Some("boom".to_string()),
            error: Some("exited with status 2".to_string()),
        };

        let json = serde_json::to_string(&reply).unwrap();
        let parsed: ExecutionStatusReply = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.status, ExecutionState::Failed);
        assert!(parsed.complete);
        assert_eq!(parsed.exit_code, 2);
        assert_eq!(parsed.error.as_deref(), Some("exited with status 2"));
    }

    #[test]
    fn daemon_fault_display() {
        let fault = DaemonFault::LanguageDisabled {
            language: "ruby".to_string(),
        };
        assert_eq!(fault.to_string(), "language not enabled: ruby");
    }

    #[test]
    fn execution_state_display() {
        assert_eq!(ExecutionState::Running.to_string(), "running");
        assert_eq!(ExecutionState::Cancelled.to_string(), "cancelled");
    }
}
