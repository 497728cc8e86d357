//! Control-connection wire messages
//!
//! JSON objects over the persistent bidirectional channel, discriminated by
//! `type`. Frames are validated at the boundary and converted into these
//! typed values before any logic touches them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of an in-flight deploy as reported by a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployStatus {
    Running,
    Completed,
    Failed,
}

impl DeployStatus {
    /// Only terminal statuses may resolve a pending handle.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployStatus::Completed | DeployStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::Running => "running",
            DeployStatus::Completed => "completed",
            DeployStatus::Failed => "failed",
        }
    }
}

/// Orchestrator → peer messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Post-handshake greeting
    Welcome {
        host_name: String,
    },

    /// Push one deploy to the peer
    Deploy {
        task_id: String,
        /// Composite correlation key, `task_id:target_name`
        deploy_task_id: String,
        deploy_config: Value,
        context: Value,
        target_name: String,
    },

    /// Liveness reply
    HeartbeatAck,

    /// Peer connected but not yet approved into the fleet
    Pending {
        message: String,
    },

    /// Malformed input from the peer
    Error {
        message: String,
    },

    /// Lightweight echo for every deploy_result status
    DeployResultAck {
        task_id: String,
        target_name: String,
        status: DeployStatus,
    },
}

/// Peer → orchestrator messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Liveness probe with a host info payload
    Heartbeat {
        #[serde(default)]
        host: Option<Value>,
    },

    /// Progress or terminal report for one dispatched deploy
    DeployResult {
        task_id: String,
        target_name: String,
        status: DeployStatus,
        #[serde(default)]
        message: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
}

impl InboundMessage {
    /// Parse one frame off the channel.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Typed payload a terminal deploy_result resolves a pending handle with
#[derive(Debug, Clone)]
pub struct DeployReply {
    pub status: DeployStatus,
    pub message: String,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl DeployReply {
    pub fn succeeded(&self) -> bool {
        self.status == DeployStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_deploy_result_frame() {
        let raw = r#"{"type":"deploy_result","task_id":"t-1","target_name":"web",
                      "status":"completed","message":"done","result":{"success":true}}"#;
        let msg = InboundMessage::parse(raw).unwrap();
        match msg {
            InboundMessage::DeployResult {
                task_id,
                target_name,
                status,
                result,
                ..
            } => {
                assert_eq!(task_id, "t-1");
                assert_eq!(target_name, "web");
                assert_eq!(status, DeployStatus::Completed);
                assert_eq!(result.unwrap()["success"], true);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_heartbeat_without_payload() {
        let msg = InboundMessage::parse(r#"{"type":"heartbeat"}"#).unwrap();
        assert!(matches!(msg, InboundMessage::Heartbeat { host: None }));
    }

    #[test]
    fn test_malformed_frame_is_rejected() {
        assert!(InboundMessage::parse(r#"{"type":"launch_missiles"}"#).is_err());
        assert!(InboundMessage::parse("not json").is_err());
    }

    #[test]
    fn test_running_is_not_terminal() {
        assert!(!DeployStatus::Running.is_terminal());
        assert!(DeployStatus::Completed.is_terminal());
        assert!(DeployStatus::Failed.is_terminal());
    }

    #[test]
    fn test_outbound_deploy_wire_shape() {
        let msg = OutboundMessage::Deploy {
            task_id: "t-9".to_string(),
            deploy_task_id: "t-9:web".to_string(),
            deploy_config: serde_json::json!({"command": "run nginx"}),
            context: serde_json::json!({"tag": "latest"}),
            target_name: "web".to_string(),
        };
        let wire: Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire["type"], "deploy");
        assert_eq!(wire["deploy_task_id"], "t-9:web");
    }
}
