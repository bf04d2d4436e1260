//! Session identity and bootstrap.
//!
//! Exactly one daemon session is owned per driver process. The id is
//! derived from host identity, so a restarted driver on the same host
//! reuses its session instead of colliding with itself.

use crate::config::SessionSettings;
use crate::daemon::DaemonApi;
use crate::error::{DriverError, RpcFailure};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

/// Bootstrap attempt budget.
const BOOTSTRAP_ATTEMPTS: u32 = 5;

/// Base delay for the multiplicative backoff between attempts.
const BOOTSTRAP_BASE_DELAY: Duration = Duration::from_millis(200);

/// Deadline for create_session calls.
const CREATE_SESSION_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for get_session calls.
const GET_SESSION_TIMEOUT: Duration = Duration::from_secs(3);

pub struct SessionManager {
    client: Arc<dyn DaemonApi>,
    settings: SessionSettings,
    /// Cached session id; immutable for the process lifetime once set.
    current: RwLock<Option<String>>,
    /// Serializes first-time bootstrap so concurrent task starts single-flight.
    bootstrap: Mutex<()>,
}

impl SessionManager {
    pub fn new(client: Arc<dyn DaemonApi>, settings: SessionSettings) -> Self {
        Self {
            client,
            settings,
            current: RwLock::new(None),
            bootstrap: Mutex::new(()),
        }
    }

    /// The cached session id, if bootstrap has completed.
    pub fn current(&self) -> Option<String> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        current.clone()
    }

    /// Adopts a session id restored from a persisted task snapshot. No-op
    /// when an id is already cached.
    pub fn adopt(&self, session_id: &str) {
        self.cache(session_id.to_string());
    }

    /// Idempotent bootstrap. Returns the cached id immediately when present;
    /// otherwise creates or reuses the host session under a single-flight
    /// guard, with bounded retries and multiplicative backoff.
    pub async fn ensure(&self) -> Result<String, DriverError> {
        if let Some(id) = self.current() {
            return Ok(id);
        }

        let _guard = self.bootstrap.lock().await;
        if let Some(id) = self.current() {
            return Ok(id);
        }

        let session_id = generate_session_id();
        let spec = self.settings.to_session_spec();
        let mut last_failure: Option<RpcFailure> = None;

        for attempt in 1..=BOOTSTRAP_ATTEMPTS {
            match self
                .client
                .create_session(&session_id, spec.clone(), CREATE_SESSION_TIMEOUT)
                .await
            {
                Ok(reply) => {
                    tracing::info!(session_id = %reply.session_id, attempt, "created session");
                    self.cache(reply.session_id.clone());
                    return Ok(reply.session_id);
                }
                Err(failure) => last_failure = Some(failure),
            }

            // Create may have lost a race, or the session may predate this
            // process. A successful get means reuse.
            if let Ok(reply) = self
                .client
                .get_session(&session_id, GET_SESSION_TIMEOUT)
                .await
            {
                tracing::info!(session_id = %reply.session_id, "reusing existing session");
                self.cache(reply.session_id.clone());
                return Ok(reply.session_id);
            }

            if attempt < BOOTSTRAP_ATTEMPTS {
                tokio::time::sleep(BOOTSTRAP_BASE_DELAY * attempt).await;
            }
        }

        Err(DriverError::Session {
            message: format!("exhausted {} attempts", BOOTSTRAP_ATTEMPTS),
            source: last_failure,
        })
    }

    fn cache(&self, session_id: String) {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.is_none() {
            *current = Some(session_id);
        }
    }
}

/// Deterministic session id for this host.
pub(crate) fn generate_session_id() -> String {
    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    let hostname = if hostname.is_empty() {
        "unknown".to_string()
    } else {
        hostname
    };
    format!("node-{}", hostname)
}
