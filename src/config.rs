//! Driver and task configuration.
//!
//! The scheduler's schema layer hands these structs over already decoded;
//! here they only gain serde defaults, file loading for the standalone
//! binary, and the local validation the driver performs before issuing any
//! RPC.

use crate::error::DriverError;
use crate::rpc::SessionSpec;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Socket path used when neither endpoint is configured.
pub const DEFAULT_DAEMON_SOCKET: &str = "/tmp/runnerd.sock";

/// Driver-level configuration, set once per process.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DriverConfig {
    /// Unix socket path of the daemon. Preferred over `daemon_address`.
    #[serde(default)]
    pub daemon_socket: Option<PathBuf>,
    /// TCP address of the daemon (`host:port`), used when no socket is set.
    #[serde(default)]
    pub daemon_address: Option<String>,
    /// Session configuration. One session is owned per driver process.
    #[serde(default)]
    pub session: SessionSettings,
    /// Consecutive status-poll transport failures tolerated per task before
    /// the wait is declared failed. Zero fails fast on the first error.
    #[serde(default)]
    pub status_retry_limit: u32,
}

impl DriverConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Socket path to probe for local reachability, when socket transport is
    /// in use. `None` means the driver talks TCP instead.
    pub fn socket_path(&self) -> Option<PathBuf> {
        match (&self.daemon_socket, &self.daemon_address) {
            (Some(path), _) => Some(path.clone()),
            (None, Some(_)) => None,
            (None, None) => Some(PathBuf::from(DEFAULT_DAEMON_SOCKET)),
        }
    }
}

/// Session configuration carried to the daemon at bootstrap.
///
/// Unset fields fall back to the same defaults the daemon documents, so a
/// bare `[session]` block still produces a usable session.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionSettings {
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub intrinsics: Vec<String>,
    #[serde(default = "default_memory_limit_mb")]
    pub memory_limit_mb: u64,
    #[serde(default)]
    pub enable_ai: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            languages: Vec::new(),
            intrinsics: Vec::new(),
            memory_limit_mb: default_memory_limit_mb(),
            enable_ai: false,
        }
    }
}

impl SessionSettings {
    /// Enabled languages with defaults applied when the list is empty.
    pub fn effective_languages(&self) -> Vec<String> {
        if self.languages.is_empty() {
            default_languages()
        } else {
            self.languages.clone()
        }
    }

    /// Wire-shape session configuration with all defaults applied.
    pub fn to_session_spec(&self) -> SessionSpec {
        SessionSpec {
            pool_size: if self.pool_size == 0 {
                default_pool_size()
            } else {
                self.pool_size
            },
            languages: self.effective_languages(),
            intrinsics: if self.intrinsics.is_empty() {
                default_intrinsics()
            } else {
                self.intrinsics.clone()
            },
            memory_limit_mb: if self.memory_limit_mb == 0 {
                default_memory_limit_mb()
            } else {
                self.memory_limit_mb
            },
            enable_ai: self.enable_ai,
        }
    }
}

fn default_pool_size() -> u32 {
    10
}

fn default_memory_limit_mb() -> u64 {
    512
}

fn default_languages() -> Vec<String> {
    vec![
        "python".to_string(),
        "javascript".to_string(),
        "typescript".to_string(),
    ]
}

fn default_intrinsics() -> Vec<String> {
    vec!["io".to_string(), "env".to_string()]
}

fn default_language() -> String {
    "python".to_string()
}

/// Per-task configuration, one per `start_task` call.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TaskSpec {
    /// Path to a script file, relative to the task directory.
    #[serde(default)]
    pub script: Option<String>,
    /// Inline code, alternative to `script`.
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Reserved per-task overrides. Parsed and logged, never applied: the
    /// daemon contract has no per-task configuration.
    #[serde(default)]
    pub overrides: TaskOverrides,
}

impl Default for TaskSpec {
    fn default() -> Self {
        Self {
            script: None,
            code: None,
            language: default_language(),
            env: HashMap::new(),
            args: Vec::new(),
            overrides: TaskOverrides::default(),
        }
    }
}

impl TaskSpec {
    /// Shape validation: exactly one source, and a language name present.
    pub fn validate(&self) -> Result<(), DriverError> {
        match (&self.script, &self.code) {
            (None, None) => Err(DriverError::config(
                "either 'script' or 'code' must be specified",
            )),
            (Some(_), Some(_)) => Err(DriverError::config(
                "cannot specify both 'script' and 'code'",
            )),
            _ => {
                if self.language.is_empty() {
                    Err(DriverError::config("'language' must not be empty"))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Membership check against the session's enabled languages.
    pub fn validate_language(&self, enabled: &[String]) -> Result<(), DriverError> {
        if enabled.iter().any(|lang| lang == &self.language) {
            Ok(())
        } else {
            Err(DriverError::validation(format!(
                "language '{}' not enabled in session (enabled: {})",
                self.language,
                enabled.join(", ")
            )))
        }
    }
}

/// Per-task overrides reserved for a future daemon API.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TaskOverrides {
    #[serde(default)]
    pub memory_limit_mb: Option<u64>,
    #[serde(default)]
    pub enable_ai: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl TaskOverrides {
    pub fn is_set(&self) -> bool {
        self.memory_limit_mb.is_some() || self.enable_ai.is_some() || self.timeout_secs.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_config_defaults_from_empty_toml() {
        let config: DriverConfig = toml::from_str("").unwrap();
        assert!(config.daemon_socket.is_none());
        assert_eq!(config.session.pool_size, 10);
        assert_eq!(config.session.memory_limit_mb, 512);
        assert_eq!(config.status_retry_limit, 0);
        assert_eq!(
            config.socket_path(),
            Some(PathBuf::from(DEFAULT_DAEMON_SOCKET))
        );
    }

    #[test]
    fn tcp_address_disables_socket_probe() {
        let config: DriverConfig = toml::from_str("daemon_address = \"127.0.0.1:7878\"").unwrap();
        assert_eq!(config.socket_path(), None);
    }

    #[test]
    fn session_spec_applies_defaults() {
        let settings = SessionSettings {
            pool_size: 0,
            languages: Vec::new(),
            intrinsics: Vec::new(),
            memory_limit_mb: 0,
            enable_ai: false,
        };
        let spec = settings.to_session_spec();
        assert_eq!(spec.pool_size, 10);
        assert_eq!(spec.languages, default_languages());
        assert_eq!(spec.intrinsics, vec!["io", "env"]);
        assert_eq!(spec.memory_limit_mb, 512);
    }

    #[test]
    fn task_spec_requires_exactly_one_source() {
        let neither = TaskSpec::default();
        assert!(matches!(neither.validate(), Err(DriverError::Config { .. })));

        let both = TaskSpec {
            script: Some("main.py".to_string()),
            code: Some("print(1)".to_string()),
            ..TaskSpec::default()
        };
        assert!(matches!(both.validate(), Err(DriverError::Config { .. })));

        let code_only = TaskSpec {
            code: Some("print(1)".to_string()),
            ..TaskSpec::default()
        };
        assert!(code_only.validate().is_ok());
    }

    #[test]
    fn task_spec_rejects_empty_language() {
        let spec = TaskSpec {
            code: Some("print(1)".to_string()),
            language: String::new(),
            ..TaskSpec::default()
        };
        assert!(matches!(spec.validate(), Err(DriverError::Config { .. })));
    }

    #[test]
    fn language_membership_check() {
        let spec = TaskSpec {
            code: Some("puts 1".to_string()),
            language: "ruby".to_string(),
            ..TaskSpec::default()
        };
        let enabled = default_languages();
        assert!(matches!(
            spec.validate_language(&enabled),
            Err(DriverError::Validation { .. })
        ));

        let python = TaskSpec {
            code: Some("print(1)".to_string()),
            ..TaskSpec::default()
        };
        assert!(python.validate_language(&enabled).is_ok());
    }

    #[test]
    fn config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.toml");
        std::fs::write(
            &path,
            r#"
daemon_socket = "/run/runnerd.sock"

[session]
pool_size = 4
languages = ["python"]
memory_limit_mb = 256
"#,
        )
        .unwrap();

        let config = DriverConfig::load(&path).unwrap();
        assert_eq!(
            config.daemon_socket,
            Some(PathBuf::from("/run/runnerd.sock"))
        );
        assert_eq!(config.session.pool_size, 4);
        assert_eq!(config.session.languages, vec!["python"]);
        assert_eq!(config.session.memory_limit_mb, 256);
        assert!(!config.session.enable_ai);
    }

    #[test]
    fn overrides_detection() {
        let mut overrides = TaskOverrides::default();
        assert!(!overrides.is_set());
        overrides.timeout_secs = Some(30);
        assert!(overrides.is_set());
    }
}
