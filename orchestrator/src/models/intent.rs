//! Deployment intent models

use serde::{Deserialize, Serialize};

use crate::models::host::HostKind;

/// Application identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppIdentity {
    /// Application name
    pub name: String,

    /// Source repository, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

/// One named step of a multi-step deploy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployStep {
    /// Step name, also used to classify cleanup steps
    pub name: String,

    /// Command to run for this step
    pub command: String,
}

/// Single-command deploy mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    #[default]
    Container,
    Compose,
}

/// What to deploy. A step list and a single-command definition are
/// mutually exclusive by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeployDefinition {
    /// Ordered list of named steps
    Steps {
        steps: Vec<DeployStep>,

        /// Replace an existing deployment of the same name first
        #[serde(default)]
        redeploy: bool,
    },

    /// One command, optionally with a compose document
    Single {
        #[serde(rename = "type", default)]
        mode: DeployMode,

        command: String,

        #[serde(default, skip_serializing_if = "Option::is_none")]
        compose_content: Option<String>,

        /// Replace an existing deployment of the same name first
        #[serde(default)]
        redeploy: bool,
    },
}

impl DeployDefinition {
    pub fn redeploy(&self) -> bool {
        match self {
            DeployDefinition::Steps { redeploy, .. } => *redeploy,
            DeployDefinition::Single { redeploy, .. } => *redeploy,
        }
    }
}

/// Per-target command/compose overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compose_content: Option<String>,
}

impl TargetOverrides {
    pub fn is_empty(&self) -> bool {
        self.command.is_none() && self.compose_content.is_none()
    }
}

/// One deployment target, resolving to exactly one host by name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Target name, unique within the intent
    pub name: String,

    /// Transport kind of the target host
    pub host_kind: HostKind,

    /// Name of the host record
    pub host_name: String,

    /// Optional overrides applied on top of the deploy definition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overrides: Option<TargetOverrides>,
}

/// Transport-neutral description of what to deploy and where
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentIntent {
    /// Application identity
    pub app: AppIdentity,

    /// Deploy definition
    pub deploy: DeployDefinition,

    /// Deployment targets
    pub targets: Vec<Target>,
}
