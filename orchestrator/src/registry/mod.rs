//! Connection registry
//!
//! Maps a host name to its live control connection. The registry guarantees
//! at most one live channel per host at any instant; registering a
//! replacement always closes the previous channel first.

pub mod pending;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::OrchestratorError;
use crate::hosts::HostStore;
use crate::models::host::HostStatus;
use crate::proto::OutboundMessage;

/// Outbound side of one control connection
#[async_trait]
pub trait AgentChannel: Send + Sync {
    /// Write one message to the peer
    async fn send(&self, message: &OutboundMessage) -> Result<(), OrchestratorError>;

    /// Close the connection
    async fn close(&self);
}

/// Registry of live control connections
pub struct ConnectionRegistry {
    channels: RwLock<HashMap<String, Arc<dyn AgentChannel>>>,
    hosts: Arc<dyn HostStore>,
    send_retries: u32,
    send_retry_delay: Duration,
}

impl ConnectionRegistry {
    pub fn new(hosts: Arc<dyn HostStore>, send_retries: u32, send_retry_delay: Duration) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            hosts,
            send_retries,
            send_retry_delay,
        }
    }

    /// Accept a new channel for a host. An existing channel for the same
    /// host is closed and replaced, so a stale connection can never race a
    /// fresh one for delivery.
    pub async fn register(&self, host_name: &str, channel: Arc<dyn AgentChannel>) {
        let previous = {
            let mut channels = self.channels.write().await;
            channels.insert(host_name.to_string(), channel)
        };

        if let Some(old) = previous {
            warn!("Replacing existing channel for host {}", host_name);
            old.close().await;
        }

        self.hosts.set_status(host_name, HostStatus::Online).await;
        info!("Host {} connected", host_name);
    }

    /// Remove the channel for a host and mark it offline.
    pub async fn unregister(&self, host_name: &str) {
        let removed = self.channels.write().await.remove(host_name);
        if let Some(channel) = removed {
            channel.close().await;
        }
        self.hosts.set_status(host_name, HostStatus::Offline).await;
        info!("Host {} disconnected", host_name);
    }

    /// Remove the channel for a host only if it is still `channel`.
    ///
    /// Teardown of a stale connection must not evict a replacement that
    /// registered in the meantime: the stale session observed its own
    /// channel close, which says nothing about the one now in the map.
    pub async fn unregister_if(&self, host_name: &str, channel: &Arc<dyn AgentChannel>) {
        let removed = {
            let mut channels = self.channels.write().await;
            match channels.get(host_name) {
                Some(current) if Arc::ptr_eq(current, channel) => channels.remove(host_name),
                _ => None,
            }
        };

        match removed {
            Some(stale) => {
                stale.close().await;
                self.hosts.set_status(host_name, HostStatus::Offline).await;
                info!("Host {} disconnected", host_name);
            }
            None => {
                debug!(
                    "Skipping teardown for {}, channel was already replaced",
                    host_name
                );
            }
        }
    }

    /// Push one message to a connected host.
    ///
    /// Fails synchronously when no channel is registered. A transient write
    /// failure is retried a bounded number of times with a short pause; if
    /// every attempt fails the host is marked offline and the error is
    /// returned.
    pub async fn send(
        &self,
        host_name: &str,
        message: &OutboundMessage,
    ) -> Result<(), OrchestratorError> {
        let channel = {
            let channels = self.channels.read().await;
            channels.get(host_name).cloned()
        };

        let Some(channel) = channel else {
            return Err(OrchestratorError::NotConnected(host_name.to_string()));
        };

        let attempts = self.send_retries + 1;
        let mut last_err = None;
        for attempt in 1..=attempts {
            match channel.send(message).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(
                        "Send to {} failed (attempt {}/{}): {}",
                        host_name, attempt, attempts, e
                    );
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.send_retry_delay).await;
                    }
                }
            }
        }

        warn!("Channel for host {} is dead, marking offline", host_name);
        self.unregister_if(host_name, &channel).await;
        Err(last_err.unwrap_or_else(|| {
            OrchestratorError::TransportError(format!("send to {} failed", host_name))
        }))
    }

    /// Names of all currently reachable hosts.
    pub async fn connected(&self) -> Vec<String> {
        self.channels.read().await.keys().cloned().collect()
    }

    /// Whether a host currently has a live channel.
    pub async fn is_connected(&self, host_name: &str) -> bool {
        self.channels.read().await.contains_key(host_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::hosts::MemoryHostStore;

    struct FakeChannel {
        sends: AtomicU32,
        closes: AtomicU32,
        fail_first: u32,
    }

    impl FakeChannel {
        fn new(fail_first: u32) -> Arc<Self> {
            Arc::new(Self {
                sends: AtomicU32::new(0),
                closes: AtomicU32::new(0),
                fail_first,
            })
        }
    }

    #[async_trait]
    impl AgentChannel for FakeChannel {
        async fn send(&self, _message: &OutboundMessage) -> Result<(), OrchestratorError> {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(OrchestratorError::TransportError("write failed".into()))
            } else {
                Ok(())
            }
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn registry() -> (ConnectionRegistry, Arc<MemoryHostStore>) {
        let hosts = Arc::new(MemoryHostStore::new());
        let registry = ConnectionRegistry::new(hosts.clone(), 2, Duration::from_millis(1));
        (registry, hosts)
    }

    #[tokio::test]
    async fn test_send_to_unregistered_host_fails_immediately() {
        let (registry, _) = registry();
        let err = registry
            .send("ghost", &OutboundMessage::HeartbeatAck)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_register_replaces_and_closes_old_channel() {
        let (registry, _) = registry();
        let first = FakeChannel::new(0);
        let second = FakeChannel::new(0);

        registry.register("edge-1", first.clone()).await;
        registry.register("edge-1", second.clone()).await;

        assert_eq!(first.closes.load(Ordering::SeqCst), 1);
        assert_eq!(registry.connected().await, vec!["edge-1".to_string()]);

        registry
            .send("edge-1", &OutboundMessage::HeartbeatAck)
            .await
            .unwrap();
        assert_eq!(first.sends.load(Ordering::SeqCst), 0);
        assert_eq!(second.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_retries_then_succeeds() {
        let (registry, _) = registry();
        let channel = FakeChannel::new(2);
        registry.register("edge-1", channel.clone()).await;

        registry
            .send("edge-1", &OutboundMessage::HeartbeatAck)
            .await
            .unwrap();
        assert_eq!(channel.sends.load(Ordering::SeqCst), 3);
        assert!(registry.is_connected("edge-1").await);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_host_offline() {
        let (registry, _) = registry();
        let channel = FakeChannel::new(u32::MAX);
        registry.register("edge-1", channel.clone()).await;

        let err = registry
            .send("edge-1", &OutboundMessage::HeartbeatAck)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::TransportError(_)));
        assert_eq!(channel.sends.load(Ordering::SeqCst), 3);
        assert!(!registry.is_connected("edge-1").await);
    }

    #[tokio::test]
    async fn test_stale_teardown_leaves_replacement_intact() {
        let (registry, _) = registry();
        let first: Arc<dyn AgentChannel> = FakeChannel::new(0);
        let second: Arc<dyn AgentChannel> = FakeChannel::new(0);

        registry.register("edge-1", first.clone()).await;
        registry.register("edge-1", second.clone()).await;

        // The stale session's cleanup runs after the replacement landed.
        registry.unregister_if("edge-1", &first).await;
        assert!(registry.is_connected("edge-1").await);
        registry
            .send("edge-1", &OutboundMessage::HeartbeatAck)
            .await
            .unwrap();

        // The live session's own cleanup still removes its channel.
        registry.unregister_if("edge-1", &second).await;
        assert!(!registry.is_connected("edge-1").await);
    }

    #[tokio::test]
    async fn test_unregister_removes_channel() {
        let (registry, _) = registry();
        let channel = FakeChannel::new(0);
        registry.register("edge-1", channel.clone()).await;
        registry.unregister("edge-1").await;

        assert!(registry.connected().await.is_empty());
        assert_eq!(channel.closes.load(Ordering::SeqCst), 1);
    }
}
