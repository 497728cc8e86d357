//! Control channel sessions
//!
//! One session per connected agent. The socket's write half is owned by a
//! writer task fed through a bounded queue, so the registry can push frames
//! without touching the socket. The read loop validates every frame at the
//! boundary and only ever resolves pending dispatches on terminal statuses.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::StreamExt;
use futures::SinkExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::OrchestratorError;
use crate::models::host::Host;
use crate::proto::{DeployReply, InboundMessage, OutboundMessage};
use crate::registry::pending::correlation_key;
use crate::registry::AgentChannel;
use crate::server::state::ServerState;

/// Writer queue depth per session
const WRITER_QUEUE: usize = 32;

enum WriterCommand {
    Frame(String),
    Close,
}

/// Registry-facing handle for one live socket
struct WsChannel {
    tx: mpsc::Sender<WriterCommand>,
}

#[async_trait]
impl AgentChannel for WsChannel {
    async fn send(&self, message: &OutboundMessage) -> Result<(), OrchestratorError> {
        let frame = serde_json::to_string(message)?;
        self.tx
            .send(WriterCommand::Frame(frame))
            .await
            .map_err(|_| OrchestratorError::TransportError("session writer is gone".to_string()))
    }

    async fn close(&self) {
        let _ = self.tx.send(WriterCommand::Close).await;
    }
}

/// Drive one upgraded socket to completion.
pub async fn run(state: Arc<ServerState>, socket: WebSocket, token: Option<String>) {
    let (mut sink, mut stream) = socket.split();

    let host = match token {
        Some(token) => state.hosts.find_by_agent_token(&token).await,
        None => None,
    };

    let Some(host) = host else {
        // Unknown peers get a pending notice, never a channel.
        warn!("Rejecting control connection with unknown or missing token");
        let notice = OutboundMessage::Pending {
            message: "host is not registered in the fleet".to_string(),
        };
        if let Ok(frame) = serde_json::to_string(&notice) {
            let _ = sink.send(Message::Text(frame.into())).await;
        }
        let _ = sink.send(Message::Close(None)).await;
        return;
    };

    let (tx, mut rx) = mpsc::channel(WRITER_QUEUE);
    let writer = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                WriterCommand::Frame(frame) => {
                    if sink.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                WriterCommand::Close => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let channel: Arc<dyn AgentChannel> = Arc::new(WsChannel { tx });
    let welcome = OutboundMessage::Welcome {
        host_name: host.name.clone(),
    };
    if channel.send(&welcome).await.is_err() {
        writer.abort();
        return;
    }
    state.registry.register(&host.name, channel.clone()).await;

    while let Some(frame) = stream.next().await {
        let message = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Socket error on {}: {}", host.name, e);
                break;
            }
        };

        match InboundMessage::parse(&message) {
            Ok(inbound) => handle_frame(&state, &host, channel.as_ref(), inbound).await,
            Err(e) => {
                debug!("Malformed frame from {}: {}", host.name, e);
                let _ = channel
                    .send(&OutboundMessage::Error {
                        message: format!("malformed frame: {}", e),
                    })
                    .await;
            }
        }
    }

    // Conditional on identity: if the agent already reconnected, this
    // session's teardown must not evict the fresh channel.
    state.registry.unregister_if(&host.name, &channel).await;
    writer.abort();
}

async fn handle_frame(
    state: &ServerState,
    host: &Host,
    channel: &dyn AgentChannel,
    inbound: InboundMessage,
) {
    match inbound {
        InboundMessage::Heartbeat { .. } => {
            let _ = channel.send(&OutboundMessage::HeartbeatAck).await;
        }
        InboundMessage::DeployResult {
            task_id,
            target_name,
            status,
            message,
            result,
            error,
        } => {
            let _ = channel
                .send(&OutboundMessage::DeployResultAck {
                    task_id: task_id.clone(),
                    target_name: target_name.clone(),
                    status,
                })
                .await;

            if status.is_terminal() {
                let key = correlation_key(&task_id, &target_name);
                state.pending.resolve(
                    &key,
                    &host.name,
                    DeployReply {
                        status,
                        message,
                        result,
                        error,
                    },
                );
            } else {
                // Progress report, forwarded to the task log only.
                info!(
                    "Deploy {}:{} on {}: {} {}",
                    task_id,
                    target_name,
                    host.name,
                    status.as_str(),
                    message
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Mutex;
    use std::time::Duration;

    use secrecy::SecretString;

    use crate::config::Settings;
    use crate::coordinator::DeployCoordinator;
    use crate::hosts::MemoryHostStore;
    use crate::models::host::{AgentCredentials, HostCredentials, HostKind, HostStatus};
    use crate::proto::DeployStatus;
    use crate::registry::ConnectionRegistry;
    use crate::registry::pending::PendingDeploys;
    use crate::shell::{CommandRunner, ShellConnector};

    struct NoShell;

    #[async_trait]
    impl ShellConnector for NoShell {
        async fn connect(
            &self,
            _credentials: &crate::models::host::ShellCredentials,
        ) -> Result<Arc<dyn CommandRunner>, OrchestratorError> {
            Err(OrchestratorError::ShellError("no shell in tests".into()))
        }
    }

    struct RecordingChannel {
        sent: Mutex<Vec<OutboundMessage>>,
    }

    #[async_trait]
    impl AgentChannel for RecordingChannel {
        async fn send(&self, message: &OutboundMessage) -> Result<(), OrchestratorError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }

        async fn close(&self) {}
    }

    fn state() -> (Arc<ServerState>, Arc<PendingDeploys>) {
        let hosts = Arc::new(MemoryHostStore::new());
        let pending = Arc::new(PendingDeploys::new());
        let registry = Arc::new(ConnectionRegistry::new(
            hosts.clone(),
            0,
            Duration::from_millis(1),
        ));
        let coordinator = Arc::new(DeployCoordinator::new(
            hosts.clone(),
            registry.clone(),
            pending.clone(),
            Arc::new(NoShell),
            Settings::default(),
        ));
        let state = Arc::new(ServerState::new(
            hosts,
            registry,
            pending.clone(),
            coordinator,
            Settings::default(),
        ));
        (state, pending)
    }

    fn host_named(name: &str) -> Host {
        Host {
            name: name.to_string(),
            kind: HostKind::Agent,
            status: HostStatus::Online,
            credentials: HostCredentials::Agent(AgentCredentials {
                token: SecretString::from("tok"),
            }),
        }
    }

    fn deploy_result(status: DeployStatus) -> InboundMessage {
        InboundMessage::DeployResult {
            task_id: "t1".to_string(),
            target_name: "web".to_string(),
            status,
            message: "progress".to_string(),
            result: None,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_running_status_never_resolves_the_handle() {
        let (state, pending) = state();
        let channel = RecordingChannel {
            sent: Mutex::new(Vec::new()),
        };
        let _handle = pending.create("t1:web", "edge-1").unwrap();

        let host = host_named("edge-1");
        handle_frame(&state, &host, &channel, deploy_result(DeployStatus::Running)).await;
        handle_frame(&state, &host, &channel, deploy_result(DeployStatus::Running)).await;

        assert_eq!(pending.len(), 1, "handle keeps waiting through progress");
        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), 2, "every status is acknowledged");
        assert!(matches!(
            sent[0],
            OutboundMessage::DeployResultAck {
                status: DeployStatus::Running,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_terminal_status_resolves_the_handle() {
        let (state, pending) = state();
        let channel = RecordingChannel {
            sent: Mutex::new(Vec::new()),
        };
        let handle = pending.create("t1:web", "edge-1").unwrap();

        handle_frame(
            &state,
            &host_named("edge-1"),
            &channel,
            deploy_result(DeployStatus::Completed),
        )
        .await;

        let reply = handle.wait().await.unwrap();
        assert!(reply.succeeded());
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_report_from_another_host_is_dropped() {
        let (state, pending) = state();
        let channel = RecordingChannel {
            sent: Mutex::new(Vec::new()),
        };
        let _handle = pending.create("t1:web", "edge-1").unwrap();

        // A different connected agent reports completion for edge-1's
        // dispatch; the handle keeps waiting.
        handle_frame(
            &state,
            &host_named("edge-9"),
            &channel,
            deploy_result(DeployStatus::Completed),
        )
        .await;

        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_is_acknowledged() {
        let (state, _) = state();
        let channel = RecordingChannel {
            sent: Mutex::new(Vec::new()),
        };

        handle_frame(
            &state,
            &host_named("edge-1"),
            &channel,
            InboundMessage::Heartbeat { host: None },
        )
        .await;

        let sent = channel.sent.lock().unwrap();
        assert!(matches!(sent[0], OutboundMessage::HeartbeatAck));
    }
}
