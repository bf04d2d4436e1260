//! Client for the runnerd daemon.
//!
//! [`DaemonApi`] is the seam between the driver and the daemon transport:
//! lifecycle code and the completion watcher only see this trait, so a
//! push-based status source could replace the polling client without touching
//! them. [`DaemonClient`] is the tarpc implementation over a Unix socket or
//! TCP: one connection, established once, reused by every component, and
//! explicitly closed on shutdown. No retries here; retry policy belongs to
//! the callers.

use crate::config::DriverConfig;
use crate::error::RpcFailure;
use crate::rpc::{
    CancelExecutionReply, CreateSessionReply, DaemonReply, DeleteSessionReply,
    ExecuteSnippetReply, ExecuteSnippetRequest, ExecutionApiClient, ExecutionStatusReply,
    GetSessionReply, HealthReply, SessionSpec,
};
use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::sync::RwLock;
use std::time::Duration;
use tarpc::tokio_serde::formats::Bincode;
use tarpc::{client, context};
use tokio_util::codec::LengthDelimitedCodec;

/// Typed access to the daemon's execution API.
///
/// Every method takes a caller-supplied deadline and surfaces failures as an
/// [`RpcFailure`] tagged with the method name. There are no partial-success
/// states: a method either returns the daemon's reply or an error.
#[async_trait]
pub trait DaemonApi: Send + Sync {
    async fn create_session(
        &self,
        session_id: &str,
        config: SessionSpec,
        deadline: Duration,
    ) -> Result<CreateSessionReply, RpcFailure>;

    async fn get_session(
        &self,
        session_id: &str,
        deadline: Duration,
    ) -> Result<GetSessionReply, RpcFailure>;

    async fn delete_session(
        &self,
        session_id: &str,
        deadline: Duration,
    ) -> Result<DeleteSessionReply, RpcFailure>;

    async fn execute_snippet(
        &self,
        request: ExecuteSnippetRequest,
        deadline: Duration,
    ) -> Result<ExecuteSnippetReply, RpcFailure>;

    async fn get_execution_status(
        &self,
        session_id: &str,
        execution_id: &str,
        deadline: Duration,
    ) -> Result<ExecutionStatusReply, RpcFailure>;

    async fn cancel_execution(
        &self,
        session_id: &str,
        execution_id: &str,
        deadline: Duration,
    ) -> Result<CancelExecutionReply, RpcFailure>;

    async fn health(&self, deadline: Duration) -> Result<HealthReply, RpcFailure>;

    /// Drops the underlying connection. Later calls fail with a closed error.
    fn close(&self);
}

/// tarpc client for the daemon, shared by all driver components.
pub struct DaemonClient {
    inner: RwLock<Option<ExecutionApiClient>>,
}

impl DaemonClient {
    /// Connects over a Unix socket with length-delimited Bincode framing.
    pub async fn connect_unix(path: &Path) -> Result<Self, RpcFailure> {
        let stream = tokio::net::UnixStream::connect(path).await.map_err(|e| {
            RpcFailure::new("connect", format!("unix socket {}: {}", path.display(), e))
        })?;
        let framed = LengthDelimitedCodec::builder().new_framed(stream);
        let transport = tarpc::serde_transport::new(framed, Bincode::default());
        let client = ExecutionApiClient::new(client::Config::default(), transport).spawn();
        Ok(Self::from_client(client))
    }

    /// Connects over TCP.
    pub async fn connect_tcp(addr: &str) -> Result<Self, RpcFailure> {
        let transport = tarpc::serde_transport::tcp::connect(addr, Bincode::default)
            .await
            .map_err(|e| RpcFailure::new("connect", format!("tcp {}: {}", addr, e)))?;
        let client = ExecutionApiClient::new(client::Config::default(), transport).spawn();
        Ok(Self::from_client(client))
    }

    /// Connects per the driver configuration: socket when configured (or
    /// defaulted), TCP otherwise.
    pub async fn connect(config: &DriverConfig) -> Result<Self, RpcFailure> {
        match config.socket_path() {
            Some(path) => Self::connect_unix(&path).await,
            None => match config.daemon_address.as_deref() {
                Some(addr) => Self::connect_tcp(addr).await,
                None => Err(RpcFailure::new("connect", "no daemon endpoint configured")),
            },
        }
    }

    fn from_client(client: ExecutionApiClient) -> Self {
        Self {
            inner: RwLock::new(Some(client)),
        }
    }

    fn client(&self, method: &'static str) -> Result<ExecutionApiClient, RpcFailure> {
        self.inner
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| RpcFailure::new(method, "connection closed"))
    }
}

/// Runs one RPC under a deadline, flattening transport errors and
/// daemon-side faults into an [`RpcFailure`].
async fn dispatch<T, F>(method: &'static str, deadline: Duration, call: F) -> Result<T, RpcFailure>
where
    F: Future<Output = Result<DaemonReply<T>, tarpc::client::RpcError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Err(_) => Err(RpcFailure::new(
            method,
            format!("deadline of {:?} exceeded", deadline),
        )),
        Ok(Err(transport)) => Err(RpcFailure::new(method, transport.to_string())),
        Ok(Ok(Err(fault))) => Err(RpcFailure::new(method, fault.to_string())),
        Ok(Ok(Ok(reply))) => Ok(reply),
    }
}

#[async_trait]
impl DaemonApi for DaemonClient {
    async fn create_session(
        &self,
        session_id: &str,
        config: SessionSpec,
        deadline: Duration,
    ) -> Result<CreateSessionReply, RpcFailure> {
        let client = self.client("create_session")?;
        let call = client.create_session(context::current(), session_id.to_string(), config);
        dispatch("create_session", deadline, call).await
    }

    async fn get_session(
        &self,
        session_id: &str,
        deadline: Duration,
    ) -> Result<GetSessionReply, RpcFailure> {
        let client = self.client("get_session")?;
        let call = client.get_session(context::current(), session_id.to_string());
        dispatch("get_session", deadline, call).await
    }

    async fn delete_session(
        &self,
        session_id: &str,
        deadline: Duration,
    ) -> Result<DeleteSessionReply, RpcFailure> {
        let client = self.client("delete_session")?;
        let call = client.delete_session(context::current(), session_id.to_string());
        dispatch("delete_session", deadline, call).await
    }

    async fn execute_snippet(
        &self,
        request: ExecuteSnippetRequest,
        deadline: Duration,
    ) -> Result<ExecuteSnippetReply, RpcFailure> {
        let client = self.client("execute_snippet")?;
        let call = client.execute_snippet(context::current(), request);
        dispatch("execute_snippet", deadline, call).await
    }

    async fn get_execution_status(
        &self,
        session_id: &str,
        execution_id: &str,
        deadline: Duration,
    ) -> Result<ExecutionStatusReply, RpcFailure> {
        let client = self.client("get_execution_status")?;
        let call = client.get_execution_status(
            context::current(),
            session_id.to_string(),
            execution_id.to_string(),
        );
        dispatch("get_execution_status", deadline, call).await
    }

    async fn cancel_execution(
        &self,
        session_id: &str,
        execution_id: &str,
        deadline: Duration,
    ) -> Result<CancelExecutionReply, RpcFailure> {
        let client = self.client("cancel_execution")?;
        let call = client.cancel_execution(
            context::current(),
            session_id.to_string(),
            execution_id.to_string(),
        );
        dispatch("cancel_execution", deadline, call).await
    }

    async fn health(&self, deadline: Duration) -> Result<HealthReply, RpcFailure> {
        let client = self.client("health")?;
        match tokio::time::timeout(deadline, client.health(context::current())).await {
            Err(_) => Err(RpcFailure::new(
                "health",
                format!("deadline of {:?} exceeded", deadline),
            )),
            Ok(Err(transport)) => Err(RpcFailure::new("health", transport.to_string())),
            Ok(Ok(reply)) => Ok(reply),
        }
    }

    fn close(&self) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = None;
        }
    }
}

/// In-memory daemon double used by the driver tests.
///
/// Records per-method call counts and supports scripted failures, so tests
/// can assert that rejected task specs trigger zero RPC calls and that
/// transport errors terminate waits.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::rpc::{ExecutionState, SessionState};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockState {
        sessions: HashMap<String, SessionSpec>,
        executions: HashMap<String, MockExecution>,
        fail: HashMap<&'static str, String>,
        calls: HashMap<&'static str, u32>,
        closed: bool,
    }

    #[derive(Clone)]
    pub struct MockExecution {
        pub session_id: String,
        pub status: ExecutionState,
        pub complete: bool,
        pub exit_code: i32,
        pub error: Option<String>,
    }

    #[derive(Default)]
    pub struct MockDaemon {
        state: Mutex<MockState>,
    }

    impl MockDaemon {
        pub fn new() -> Self {
            Self::default()
        }

        /// Arranges for the named method to fail until cleared.
        pub fn fail_with(&self, method: &'static str, message: &str) {
            let mut state = self.state.lock().unwrap();
            state.fail.insert(method, message.to_string());
        }

        pub fn clear_failure(&self, method: &'static str) {
            let mut state = self.state.lock().unwrap();
            state.fail.remove(method);
        }

        /// Number of calls recorded for the named method.
        pub fn calls(&self, method: &'static str) -> u32 {
            let state = self.state.lock().unwrap();
            state.calls.get(method).copied().unwrap_or(0)
        }

        pub fn session_ids(&self) -> Vec<String> {
            let state = self.state.lock().unwrap();
            state.sessions.keys().cloned().collect()
        }

        /// Marks an execution as completed with the given exit code.
        pub fn complete_execution(&self, execution_id: &str, exit_code: i32) {
            let mut state = self.state.lock().unwrap();
            if let Some(exec) = state.executions.get_mut(execution_id) {
                exec.status = ExecutionState::Completed;
                exec.complete = true;
                exec.exit_code = exit_code;
            }
        }

        /// Marks an execution as failed with an error message.
        pub fn fail_execution(&self, execution_id: &str, message: &str) {
            let mut state = self.state.lock().unwrap();
            if let Some(exec) = state.executions.get_mut(execution_id) {
                exec.status = ExecutionState::Failed;
                exec.complete = true;
                exec.exit_code = 1;
                exec.error = Some(message.to_string());
            }
        }

        pub fn is_closed(&self) -> bool {
            self.state.lock().unwrap().closed
        }

        fn record(&self, method: &'static str) -> Result<(), RpcFailure> {
            let mut state = self.state.lock().unwrap();
            *state.calls.entry(method).or_insert(0) += 1;
            match state.fail.get(method) {
                Some(message) => Err(RpcFailure::new(method, message.clone())),
                None => Ok(()),
            }
        }
    }

    #[async_trait]
    impl DaemonApi for MockDaemon {
        async fn create_session(
            &self,
            session_id: &str,
            config: SessionSpec,
            _deadline: Duration,
        ) -> Result<CreateSessionReply, RpcFailure> {
            self.record("create_session")?;
            let mut state = self.state.lock().unwrap();
            state.sessions.insert(session_id.to_string(), config);
            Ok(CreateSessionReply {
                session_id: session_id.to_string(),
                status: SessionState::Active,
            })
        }

        async fn get_session(
            &self,
            session_id: &str,
            _deadline: Duration,
        ) -> Result<GetSessionReply, RpcFailure> {
            self.record("get_session")?;
            let state = self.state.lock().unwrap();
            match state.sessions.get(session_id) {
                Some(config) => Ok(GetSessionReply {
                    session_id: session_id.to_string(),
                    status: SessionState::Active,
                    config: config.clone(),
                }),
                None => Err(RpcFailure::new("get_session", "session not found")),
            }
        }

        async fn delete_session(
            &self,
            session_id: &str,
            _deadline: Duration,
        ) -> Result<DeleteSessionReply, RpcFailure> {
            self.record("delete_session")?;
            let mut state = self.state.lock().unwrap();
            let success = state.sessions.remove(session_id).is_some();
            Ok(DeleteSessionReply { success })
        }

        async fn execute_snippet(
            &self,
            request: ExecuteSnippetRequest,
            _deadline: Duration,
        ) -> Result<ExecuteSnippetReply, RpcFailure> {
            self.record("execute_snippet")?;
            let mut state = self.state.lock().unwrap();
            state.executions.insert(
                request.execution_id.clone(),
                MockExecution {
                    session_id: request.session_id,
                    status: ExecutionState::Running,
                    complete: false,
                    exit_code: 0,
                    error: None,
                },
            );
            Ok(ExecuteSnippetReply {
                execution_id: request.execution_id,
                status: ExecutionState::Running,
            })
        }

        async fn get_execution_status(
            &self,
            session_id: &str,
            execution_id: &str,
            _deadline: Duration,
        ) -> Result<ExecutionStatusReply, RpcFailure> {
            self.record("get_execution_status")?;
            let state = self.state.lock().unwrap();
            match state.executions.get(execution_id) {
                Some(exec) if exec.session_id != session_id => Err(RpcFailure::new(
                    "get_execution_status",
                    "execution not found in session",
                )),
                Some(exec) => Ok(ExecutionStatusReply {
                    execution_id: execution_id.to_string(),
                    status: exec.status,
                    complete: exec.complete,
                    exit_code: exec.exit_code,
                    stdout: None,
                    stderr: None,
                    error: exec.error.clone(),
                }),
                None => Err(RpcFailure::new(
                    "get_execution_status",
                    "execution not found",
                )),
            }
        }

        async fn cancel_execution(
            &self,
            _session_id: &str,
            execution_id: &str,
            _deadline: Duration,
        ) -> Result<CancelExecutionReply, RpcFailure> {
            self.record("cancel_execution")?;
            let mut state = self.state.lock().unwrap();
            match state.executions.get_mut(execution_id) {
                Some(exec) => {
                    exec.status = ExecutionState::Cancelled;
                    exec.complete = true;
                    Ok(CancelExecutionReply { success: true })
                }
                None => Err(RpcFailure::new("cancel_execution", "execution not found")),
            }
        }

        async fn health(&self, _deadline: Duration) -> Result<HealthReply, RpcFailure> {
            self.record("health")?;
            Ok(HealthReply {
                healthy: true,
                version: "mock".to_string(),
            })
        }

        fn close(&self) {
            self.state.lock().unwrap().closed = true;
        }
    }
}
