//! Error types for the driver lifecycle surface.

use std::fmt::{Display, Formatter};

/// A single failed RPC against the daemon, tagged with the method name.
///
/// Covers both transport failures and daemon-side faults; the driver does
/// not distinguish them beyond the message text.
#[derive(Debug, Clone)]
pub struct RpcFailure {
    pub method: &'static str,
    pub message: String,
}

impl RpcFailure {
    pub fn new(method: &'static str, message: impl Into<String>) -> Self {
        Self {
            method,
            message: message.into(),
        }
    }
}

impl Display for RpcFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.method, self.message)
    }
}

impl std::error::Error for RpcFailure {}

/// Errors surfaced by the driver lifecycle entry points.
#[derive(Debug)]
pub enum DriverError {
    /// Malformed task spec: both or neither of script/code, or no language.
    Config { message: String },
    /// Task spec rejected against the session settings.
    Validation { message: String },
    /// Script file missing, unreadable, or resolved outside the task root.
    ResourceResolution { message: String },
    /// Session bootstrap attempts exhausted.
    Session {
        message: String,
        source: Option<RpcFailure>,
    },
    /// Transport or daemon-side failure for a single RPC.
    Rpc(RpcFailure),
    /// Unknown task id.
    TaskNotFound { task_id: String },
    /// Start rejected: the task id is already registered.
    TaskExists { task_id: String },
    /// Destroy refused: the task is still running and `force` was not set.
    TaskStillRunning { task_id: String },
}

impl DriverError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::ResourceResolution {
            message: message.into(),
        }
    }

    pub fn not_found(task_id: impl Into<String>) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }
}

impl Display for DriverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config { message } => write!(f, "invalid task config: {}", message),
            Self::Validation { message } => write!(f, "task validation failed: {}", message),
            Self::ResourceResolution { message } => {
                write!(f, "resource resolution failed: {}", message)
            }
            Self::Session { message, source } => match source {
                Some(rpc) => write!(f, "session bootstrap failed: {}: {}", message, rpc),
                None => write!(f, "session bootstrap failed: {}", message),
            },
            Self::Rpc(rpc) => write!(f, "rpc error: {}", rpc),
            Self::TaskNotFound { task_id } => write!(f, "task not found: {}", task_id),
            Self::TaskExists { task_id } => {
                write!(f, "task with id '{}' already started", task_id)
            }
            Self::TaskStillRunning { task_id } => {
                write!(f, "cannot destroy running task {} without force", task_id)
            }
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Session {
                source: Some(rpc), ..
            } => Some(rpc),
            Self::Rpc(rpc) => Some(rpc),
            _ => None,
        }
    }
}

impl From<RpcFailure> for DriverError {
    fn from(failure: RpcFailure) -> Self {
        Self::Rpc(failure)
    }
}
