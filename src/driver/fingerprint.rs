//! Periodic health reporting.
//!
//! The scheduler consumes fingerprints to decide whether this driver is
//! usable on a host. Health is three-level: the daemon endpoint may be
//! locally absent (undetected), reachable but failing its health RPC
//! (unhealthy), or responding (healthy).

use crate::daemon::DaemonApi;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Interval between fingerprint reports. The first report is immediate.
pub(crate) const FINGERPRINT_PERIOD: Duration = Duration::from_secs(30);

/// Deadline for the health RPC inside a probe.
pub(crate) const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// The daemon endpoint is locally absent (e.g. socket path missing).
    Undetected,
    /// The endpoint is reachable but the health RPC fails or reports unhealthy.
    Unhealthy,
    /// The health RPC succeeds.
    Healthy,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Undetected => write!(f, "undetected"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
            HealthState::Healthy => write!(f, "healthy"),
        }
    }
}

/// One health/capability report.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    pub health: HealthState,
    pub message: String,
    pub attributes: HashMap<String, String>,
}

pub(crate) async fn build_fingerprint(
    client: &dyn DaemonApi,
    socket_path: Option<&Path>,
    session_id: Option<String>,
) -> Fingerprint {
    if let Some(path) = socket_path {
        if !path.exists() {
            return Fingerprint {
                health: HealthState::Undetected,
                message: format!("daemon socket not found: {}", path.display()),
                attributes: HashMap::new(),
            };
        }
    }

    match client.health(HEALTH_PROBE_TIMEOUT).await {
        Err(failure) => Fingerprint {
            health: HealthState::Unhealthy,
            message: format!("daemon health check failed: {}", failure),
            attributes: HashMap::new(),
        },
        Ok(reply) if !reply.healthy => Fingerprint {
            health: HealthState::Unhealthy,
            message: "daemon reports unhealthy".to_string(),
            attributes: HashMap::new(),
        },
        Ok(reply) => {
            let mut attributes = HashMap::new();
            attributes.insert(
                format!("driver.{}.available", super::PLUGIN_NAME),
                "true".to_string(),
            );
            attributes.insert(
                format!("driver.{}.daemon_version", super::PLUGIN_NAME),
                reply.version,
            );
            if let Some(session_id) = session_id {
                attributes.insert(
                    format!("driver.{}.session_id", super::PLUGIN_NAME),
                    session_id,
                );
            }
            Fingerprint {
                health: HealthState::Healthy,
                message: "driver healthy".to_string(),
                attributes,
            }
        }
    }
}
