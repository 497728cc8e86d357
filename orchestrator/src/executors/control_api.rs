//! Control-API executor
//!
//! Deploys through the remote control API: create+start for a single
//! container, stack upsert for a compose document. Pre-cleanup under the
//! redeploy flag is best effort; its errors are swallowed.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::executors::Executor;
use crate::http::control_api::ControlApiClient;
use crate::models::host::{Host, HostKind};
use crate::models::intent::{DeployDefinition, DeployMode};
use crate::models::outcome::TargetResult;
use crate::spec::command::{derive_container_name, parse_run_command};
use crate::spec::ExecutionSpec;

/// Executor for control-API-kind hosts
pub struct ControlApiExecutor {
    host: Host,
    client: Option<ControlApiClient>,
}

impl ControlApiExecutor {
    pub fn new(host: Host, client: Option<ControlApiClient>) -> Self {
        Self { host, client }
    }

    fn failure(&self, message: impl Into<String>) -> TargetResult {
        TargetResult::failure(HostKind::ControlApi, &self.host.name, message)
    }

    async fn deploy_container(
        &self,
        client: &ControlApiClient,
        command: &str,
        app_name: &str,
        redeploy: bool,
    ) -> TargetResult {
        let spec = match parse_run_command(command) {
            Ok(spec) => spec,
            Err(e) => return self.failure("invalid run command").with_error(e.to_string()),
        };
        let name = derive_container_name(&spec, app_name);

        if redeploy {
            if let Err(e) = client.remove_container(&name).await {
                debug!("Pre-cleanup of container {} skipped: {}", name, e);
            }
        }

        let container_id = match client.create_container(&spec, &name).await {
            Ok(id) => id,
            Err(e) => {
                return self
                    .failure(format!("failed to create container {}", name))
                    .with_error(e.to_string())
            }
        };

        // Created but not started is a distinct failure, never a silent
        // success.
        if let Err(e) = client.start_container(&container_id).await {
            return self
                .failure(format!(
                    "container {} created but failed to start",
                    container_id
                ))
                .with_error(e.to_string());
        }

        info!(
            "Container {} deployed on {} as {}",
            name, self.host.name, container_id
        );
        TargetResult::success(
            HostKind::ControlApi,
            &self.host.name,
            format!("container {} started", container_id),
        )
    }

    async fn deploy_stack(
        &self,
        client: &ControlApiClient,
        app_name: &str,
        compose_content: Option<&str>,
        redeploy: bool,
    ) -> TargetResult {
        let Some(compose) = compose_content else {
            return self.failure("compose deploy without compose_content");
        };

        if redeploy {
            if let Err(e) = client.remove_stack(app_name).await {
                debug!("Pre-cleanup of stack {} skipped: {}", app_name, e);
            }
        }

        match client.upsert_stack(app_name, compose).await {
            Ok(stack_id) => {
                info!("Stack {} deployed on {} (id {})", app_name, self.host.name, stack_id);
                TargetResult::success(
                    HostKind::ControlApi,
                    &self.host.name,
                    format!("stack {} deployed (id {})", app_name, stack_id),
                )
            }
            Err(e) => self
                .failure(format!("failed to deploy stack {}", app_name))
                .with_error(e.to_string()),
        }
    }
}

#[async_trait]
impl Executor for ControlApiExecutor {
    async fn can_execute(&self) -> bool {
        self.host.is_online() && self.client.is_some()
    }

    async fn execute(
        &self,
        spec: &ExecutionSpec,
        _task_id: &str,
        _target_name: &str,
    ) -> TargetResult {
        let Some(client) = &self.client else {
            return self.failure("host has no control API credentials");
        };

        match &spec.definition {
            DeployDefinition::Single {
                mode: DeployMode::Container,
                command,
                redeploy,
                ..
            } => {
                self.deploy_container(client, command, &spec.app.name, *redeploy)
                    .await
            }
            DeployDefinition::Single {
                mode: DeployMode::Compose,
                compose_content,
                redeploy,
                ..
            } => {
                self.deploy_stack(client, &spec.app.name, compose_content.as_deref(), *redeploy)
                    .await
            }
            DeployDefinition::Steps { .. } => {
                self.failure("step lists are not supported on control-api hosts")
            }
        }
    }
}
