//! Orchestrator settings

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::logs::LogLevel;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Control channel server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Agent transport configuration
    #[serde(default)]
    pub agent: AgentSettings,

    /// Container control API configuration
    #[serde(default)]
    pub control_api: ControlApiSettings,

    /// Remote shell configuration
    #[serde(default)]
    pub shell: ShellSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            server: ServerSettings::default(),
            agent: AgentSettings::default(),
            control_api: ControlApiSettings::default(),
            shell: ShellSettings::default(),
        }
    }
}

/// Control channel server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind host
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_server_port() -> u16 {
    8788
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Agent transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Ceiling for a single deploy round trip, in seconds
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_secs: u64,

    /// Extra attempts after a failed channel write
    #[serde(default = "default_send_retries")]
    pub send_retries: u32,

    /// Pause between channel write attempts, in milliseconds
    #[serde(default = "default_send_retry_delay")]
    pub send_retry_delay_ms: u64,
}

fn default_reply_timeout() -> u64 {
    300
}

fn default_send_retries() -> u32 {
    2
}

fn default_send_retry_delay() -> u64 {
    200
}

impl AgentSettings {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    pub fn send_retry_delay(&self) -> Duration {
        Duration::from_millis(self.send_retry_delay_ms)
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            reply_timeout_secs: default_reply_timeout(),
            send_retries: default_send_retries(),
            send_retry_delay_ms: default_send_retry_delay(),
        }
    }
}

/// Container control API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlApiSettings {
    /// Total attempts for a connection-reset class failure
    #[serde(default = "default_api_attempts")]
    pub max_attempts: u32,

    /// Backoff base, multiplied by the attempt number, in seconds
    #[serde(default = "default_api_backoff")]
    pub backoff_base_secs: u64,

    /// Per-request timeout, in seconds
    #[serde(default = "default_api_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_attempts() -> u32 {
    3
}

fn default_api_backoff() -> u64 {
    2
}

fn default_api_timeout() -> u64 {
    30
}

impl Default for ControlApiSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_api_attempts(),
            backoff_base_secs: default_api_backoff(),
            request_timeout_secs: default_api_timeout(),
        }
    }
}

/// Remote shell settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellSettings {
    /// TCP connect timeout, in seconds
    #[serde(default = "default_shell_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_shell_connect_timeout() -> u64 {
    15
}

impl ShellSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_shell_connect_timeout(),
        }
    }
}
