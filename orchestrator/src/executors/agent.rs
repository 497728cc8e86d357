//! Agent executor
//!
//! Pushes the deploy over the host's control connection and waits on a
//! pending result handle. The handle is registered before the push goes
//! out, so a reply can never beat its own waiter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::executors::Executor;
use crate::models::host::HostKind;
use crate::models::outcome::TargetResult;
use crate::proto::OutboundMessage;
use crate::registry::pending::{correlation_key, PendingDeploys};
use crate::registry::ConnectionRegistry;
use crate::spec::ExecutionSpec;

/// Executor for agent-kind hosts
pub struct AgentExecutor {
    host_name: String,
    registry: Arc<ConnectionRegistry>,
    pending: Arc<PendingDeploys>,
    reply_timeout: Duration,
}

impl AgentExecutor {
    pub fn new(
        host_name: &str,
        registry: Arc<ConnectionRegistry>,
        pending: Arc<PendingDeploys>,
        reply_timeout: Duration,
    ) -> Self {
        Self {
            host_name: host_name.to_string(),
            registry,
            pending,
            reply_timeout,
        }
    }

    fn failure(&self, message: impl Into<String>) -> TargetResult {
        TargetResult::failure(HostKind::Agent, &self.host_name, message)
    }
}

#[async_trait]
impl Executor for AgentExecutor {
    async fn can_execute(&self) -> bool {
        self.registry.is_connected(&self.host_name).await
    }

    async fn execute(
        &self,
        spec: &ExecutionSpec,
        task_id: &str,
        target_name: &str,
    ) -> TargetResult {
        let key = correlation_key(task_id, target_name);

        // Handle first, push second. A reply arriving faster than handle
        // creation would otherwise be silently dropped.
        let handle = match self.pending.create(&key, &self.host_name) {
            Ok(handle) => handle,
            Err(e) => {
                return self
                    .failure(format!("dispatch {} already in flight", key))
                    .with_error(e.to_string())
            }
        };

        let message = OutboundMessage::Deploy {
            task_id: task_id.to_string(),
            deploy_task_id: key.clone(),
            deploy_config: json!({
                "app": spec.app,
                "deploy": spec.definition,
            }),
            context: spec.context.clone(),
            target_name: target_name.to_string(),
        };

        if let Err(e) = self.registry.send(&self.host_name, &message).await {
            // No push went out, so nothing can ever resolve this handle.
            self.pending.cancel(&key);
            return self
                .failure(format!("failed to push deploy to {}", self.host_name))
                .with_error(e.to_string());
        }

        info!("Deploy {} pushed to agent {}", key, self.host_name);

        match tokio::time::timeout(self.reply_timeout, handle.wait()).await {
            Ok(Ok(reply)) => {
                let mut result = if reply.succeeded() {
                    TargetResult::success(HostKind::Agent, &self.host_name, reply.message)
                } else {
                    self.failure(reply.message)
                };
                if let Some(error) = reply.error {
                    result = result.with_error(error);
                }
                if let Some(raw) = reply.result {
                    result = result.with_raw_output(raw.to_string());
                }
                result
            }
            Ok(Err(e)) => self
                .failure("dispatch cancelled before a reply arrived")
                .with_error(e.to_string()),
            Err(_) => {
                warn!(
                    "Deploy {} timed out after {:?}, cancelling handle",
                    key, self.reply_timeout
                );
                self.pending.cancel(&key);
                self.failure(format!(
                    "timed out after {}s waiting for agent reply",
                    self.reply_timeout.as_secs()
                ))
            }
        }
    }
}
