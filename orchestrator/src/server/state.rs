//! Server state

use std::sync::Arc;

use crate::config::Settings;
use crate::coordinator::DeployCoordinator;
use crate::hosts::HostStore;
use crate::registry::pending::PendingDeploys;
use crate::registry::ConnectionRegistry;

/// Server state shared across handlers and channel sessions
pub struct ServerState {
    pub hosts: Arc<dyn HostStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub pending: Arc<PendingDeploys>,
    pub coordinator: Arc<DeployCoordinator>,
    pub settings: Settings,
}

impl ServerState {
    pub fn new(
        hosts: Arc<dyn HostStore>,
        registry: Arc<ConnectionRegistry>,
        pending: Arc<PendingDeploys>,
        coordinator: Arc<DeployCoordinator>,
        settings: Settings,
    ) -> Self {
        Self {
            hosts,
            registry,
            pending,
            coordinator,
            settings,
        }
    }
}
