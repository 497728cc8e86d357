//! Host lookup collaborator
//!
//! Persisted host storage is an external service; the orchestrator consumes
//! it through this trait and only ever mutates host status.

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::host::{Host, HostStatus};

/// Lookup/update service for host records
#[async_trait]
pub trait HostStore: Send + Sync {
    /// Fetch a host by name
    async fn get(&self, name: &str) -> Option<Host>;

    /// Resolve an agent connection token to its host
    async fn find_by_agent_token(&self, token: &str) -> Option<Host>;

    /// Update the reachability status of a host
    async fn set_status(&self, name: &str, status: HostStatus);
}

/// In-memory host store, used by tests and single-node setups
#[derive(Default)]
pub struct MemoryHostStore {
    hosts: RwLock<HashMap<String, Host>>,
}

impl MemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, host: Host) {
        self.hosts.write().await.insert(host.name.clone(), host);
    }
}

#[async_trait]
impl HostStore for MemoryHostStore {
    async fn get(&self, name: &str) -> Option<Host> {
        self.hosts.read().await.get(name).cloned()
    }

    async fn find_by_agent_token(&self, token: &str) -> Option<Host> {
        let hosts = self.hosts.read().await;
        hosts
            .values()
            .find(|host| {
                host.agent_credentials()
                    .map(|c| c.token.expose_secret() == token)
                    .unwrap_or(false)
            })
            .cloned()
    }

    async fn set_status(&self, name: &str, status: HostStatus) {
        let mut hosts = self.hosts.write().await;
        if let Some(host) = hosts.get_mut(name) {
            debug!("Host {} status -> {:?}", name, status);
            host.status = status;
        }
    }
}
