//! Host records
//!
//! Hosts are created and edited by an external registration flow; the
//! orchestrator only reads them and flips their status on lifecycle events.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Transport kind for a target host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKind {
    /// Push-style agent reachable over a persistent control connection
    Agent,

    /// Remote control API fronting a container runtime
    ControlApi,

    /// Bare remote shell
    Shell,
}

impl HostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostKind::Agent => "agent",
            HostKind::ControlApi => "control-api",
            HostKind::Shell => "shell",
        }
    }
}

/// Reachability status of a host
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Online,
    #[default]
    Offline,
}

/// Credentials for an agent-kind host
#[derive(Debug, Clone, Deserialize)]
pub struct AgentCredentials {
    /// Token presented by the agent on connect
    pub token: SecretString,
}

/// Credentials for a control-API-kind host
#[derive(Debug, Clone, Deserialize)]
pub struct ControlApiCredentials {
    /// Base URL of the control API
    pub api_url: String,

    /// API key sent with every request
    pub api_key: SecretString,

    /// Target environment id on the control API
    pub environment_id: u64,
}

/// Credentials for a shell-kind host
#[derive(Debug, Clone, Deserialize)]
pub struct ShellCredentials {
    /// Remote address
    pub address: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Login user
    pub username: String,

    /// Password, if password auth is used
    #[serde(default)]
    pub password: Option<SecretString>,

    /// PEM private key, if key auth is used
    #[serde(default)]
    pub private_key: Option<SecretString>,
}

fn default_ssh_port() -> u16 {
    22
}

/// Transport-specific credential shape, selected by host kind.
/// Exactly one variant is populated per host.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostCredentials {
    Agent(AgentCredentials),
    ControlApi(ControlApiCredentials),
    Shell(ShellCredentials),
}

/// A registered target host
#[derive(Debug, Clone, Deserialize)]
pub struct Host {
    /// Unique host name
    pub name: String,

    /// Transport kind
    pub kind: HostKind,

    /// Reachability status
    #[serde(default)]
    pub status: HostStatus,

    /// Transport credentials matching `kind`
    pub credentials: HostCredentials,
}

impl Host {
    pub fn is_online(&self) -> bool {
        self.status == HostStatus::Online
    }

    pub fn agent_credentials(&self) -> Option<&AgentCredentials> {
        match &self.credentials {
            HostCredentials::Agent(c) => Some(c),
            _ => None,
        }
    }

    pub fn control_api_credentials(&self) -> Option<&ControlApiCredentials> {
        match &self.credentials {
            HostCredentials::ControlApi(c) => Some(c),
            _ => None,
        }
    }

    pub fn shell_credentials(&self) -> Option<&ShellCredentials> {
        match &self.credentials {
            HostCredentials::Shell(c) => Some(c),
            _ => None,
        }
    }
}
