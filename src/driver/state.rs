//! Recoverable task state.
//!
//! The snapshot written at task start is the only record that survives a
//! driver restart. It must be sufficient, on its own, to rebuild a task
//! handle and resume status polling without re-executing anything. The
//! scheduler owns the storage mechanism; the driver only defines the shape
//! and its round-trip contract.

use crate::config::TaskSpec;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current snapshot format version. Evolution is additive only: new fields
/// take serde defaults so snapshots written by older drivers keep decoding.
pub const TASK_STATE_VERSION: u32 = 1;

/// Persisted snapshot of a started task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    pub version: u32,
    pub task_id: String,
    /// Daemon-assigned execution id, authoritative for status polling.
    pub execution_id: String,
    pub session_id: String,
    pub spec: TaskSpec,
    pub started_at: DateTime<Utc>,
}

impl TaskState {
    pub fn new(
        task_id: &str,
        execution_id: &str,
        session_id: &str,
        spec: TaskSpec,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version: TASK_STATE_VERSION,
            task_id: task_id.to_string(),
            execution_id: execution_id.to_string(),
            session_id: session_id.to_string(),
            spec,
            started_at,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("failed to encode task state")
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let state: TaskState =
            serde_json::from_slice(bytes).context("failed to decode task state")?;
        if state.version > TASK_STATE_VERSION {
            bail!(
                "unsupported task state version {} (newest known: {})",
                state.version,
                TASK_STATE_VERSION
            );
        }
        Ok(state)
    }
}
