//! Remote shell sessions
//!
//! One SSH session per executor invocation, driven through blocking tasks.
//! The `CommandRunner` seam keeps the conflict-remediation logic in the
//! shell executor testable without a network.

use std::io::Read;
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use ssh2::Session;
use tracing::debug;

use crate::errors::OrchestratorError;
use crate::models::host::ShellCredentials;

/// Captured output of one remote command
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes commands on one remote host
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn exec(&self, command: &str) -> Result<ExecOutput, OrchestratorError>;
}

/// Opens sessions from shell credentials
#[async_trait]
pub trait ShellConnector: Send + Sync {
    async fn connect(
        &self,
        credentials: &ShellCredentials,
    ) -> Result<Arc<dyn CommandRunner>, OrchestratorError>;
}

/// SSH-backed connector
pub struct SshConnector {
    connect_timeout: Duration,
}

impl SshConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl ShellConnector for SshConnector {
    async fn connect(
        &self,
        credentials: &ShellCredentials,
    ) -> Result<Arc<dyn CommandRunner>, OrchestratorError> {
        let credentials = credentials.clone();
        let timeout = self.connect_timeout;

        let session = tokio::task::spawn_blocking(move || open_session(&credentials, timeout))
            .await
            .map_err(|e| OrchestratorError::Internal(format!("connect task failed: {}", e)))??;

        Ok(Arc::new(SshSession {
            session: Arc::new(Mutex::new(session)),
        }))
    }
}

fn open_session(
    credentials: &ShellCredentials,
    timeout: Duration,
) -> Result<Session, OrchestratorError> {
    use std::net::ToSocketAddrs;

    let addr = format!("{}:{}", credentials.address, credentials.port);
    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|e| OrchestratorError::ShellError(format!("resolve {}: {}", addr, e)))?
        .next()
        .ok_or_else(|| OrchestratorError::ShellError(format!("no address for {}", addr)))?;

    let stream = TcpStream::connect_timeout(&socket_addr, timeout)
        .map_err(|e| OrchestratorError::ShellError(format!("connect {}: {}", addr, e)))?;

    let mut session =
        Session::new().map_err(|e| OrchestratorError::ShellError(e.to_string()))?;
    session.set_tcp_stream(stream);
    session
        .handshake()
        .map_err(|e| OrchestratorError::ShellError(format!("handshake: {}", e)))?;

    if let Some(key) = &credentials.private_key {
        session
            .userauth_pubkey_memory(&credentials.username, None, key.expose_secret(), None)
            .map_err(|e| OrchestratorError::ShellError(format!("key auth: {}", e)))?;
    } else if let Some(password) = &credentials.password {
        session
            .userauth_password(&credentials.username, password.expose_secret())
            .map_err(|e| OrchestratorError::ShellError(format!("password auth: {}", e)))?;
    } else {
        return Err(OrchestratorError::ShellError(
            "host has neither password nor private key".to_string(),
        ));
    }

    debug!("SSH session established with {}", addr);
    Ok(session)
}

/// One live SSH session
pub struct SshSession {
    session: Arc<Mutex<Session>>,
}

#[async_trait]
impl CommandRunner for SshSession {
    async fn exec(&self, command: &str) -> Result<ExecOutput, OrchestratorError> {
        let session = self.session.clone();
        let command = command.to_string();

        tokio::task::spawn_blocking(move || exec_blocking(&session, &command))
            .await
            .map_err(|e| OrchestratorError::Internal(format!("exec task failed: {}", e)))?
    }
}

fn exec_blocking(
    session: &Arc<Mutex<Session>>,
    command: &str,
) -> Result<ExecOutput, OrchestratorError> {
    let session = session.lock().map_err(|_| {
        OrchestratorError::Internal("ssh session lock poisoned".to_string())
    })?;

    let mut channel = session
        .channel_session()
        .map_err(|e| OrchestratorError::ShellError(format!("open channel: {}", e)))?;
    channel
        .exec(command)
        .map_err(|e| OrchestratorError::ShellError(format!("exec: {}", e)))?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(|e| OrchestratorError::ShellError(format!("read stdout: {}", e)))?;

    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(|e| OrchestratorError::ShellError(format!("read stderr: {}", e)))?;

    channel
        .wait_close()
        .map_err(|e| OrchestratorError::ShellError(format!("close: {}", e)))?;
    let exit_code = channel
        .exit_status()
        .map_err(|e| OrchestratorError::ShellError(format!("exit status: {}", e)))?;

    Ok(ExecOutput {
        exit_code,
        stdout,
        stderr,
    })
}
