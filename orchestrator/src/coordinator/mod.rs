//! Deploy task coordinator
//!
//! Walks the targets of one deployment intent in order, selects the
//! executor matching each host's transport kind, and folds the per-target
//! results into one task outcome. Targets that cannot be reached fail
//! without a single remote call; one target's failure never aborts the
//! rest of the task.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Settings;
use crate::executors::agent::AgentExecutor;
use crate::executors::control_api::ControlApiExecutor;
use crate::executors::shell::ShellExecutor;
use crate::executors::Executor;
use crate::hosts::HostStore;
use crate::http::control_api::ControlApiClient;
use crate::models::host::{Host, HostKind};
use crate::models::intent::{DeploymentIntent, Target};
use crate::models::outcome::{aggregate, TargetResult, TaskOutcome};
use crate::registry::pending::PendingDeploys;
use crate::registry::ConnectionRegistry;
use crate::shell::ShellConnector;
use crate::spec::resolve_for_target;
use crate::spec::template::RenderContext;

/// Runs deployment tasks against the fleet
pub struct DeployCoordinator {
    hosts: Arc<dyn HostStore>,
    registry: Arc<ConnectionRegistry>,
    pending: Arc<PendingDeploys>,
    connector: Arc<dyn ShellConnector>,
    settings: Settings,
}

impl DeployCoordinator {
    pub fn new(
        hosts: Arc<dyn HostStore>,
        registry: Arc<ConnectionRegistry>,
        pending: Arc<PendingDeploys>,
        connector: Arc<dyn ShellConnector>,
        settings: Settings,
    ) -> Self {
        Self {
            hosts,
            registry,
            pending,
            connector,
            settings,
        }
    }

    /// Execute one deployment task: every target in order, one result per
    /// target, `completed` iff all of them succeeded.
    pub async fn run(
        &self,
        task_id: &str,
        intent: &DeploymentIntent,
        ctx: &RenderContext,
    ) -> TaskOutcome {
        info!(
            "Task {} deploying {} to {} target(s)",
            task_id,
            intent.app.name,
            intent.targets.len()
        );

        let mut results = BTreeMap::new();
        for target in &intent.targets {
            let result = self.run_target(task_id, intent, target, ctx).await;
            if result.success {
                info!("Task {} target {} succeeded: {}", task_id, target.name, result.message);
            } else {
                warn!("Task {} target {} failed: {}", task_id, target.name, result.message);
            }
            results.insert(target.name.clone(), result);
        }

        let outcome = aggregate(results);
        info!("Task {} finished: {:?}", task_id, outcome.status);
        outcome
    }

    async fn run_target(
        &self,
        task_id: &str,
        intent: &DeploymentIntent,
        target: &Target,
        ctx: &RenderContext,
    ) -> TargetResult {
        let Some(host) = self.hosts.get(&target.host_name).await else {
            return TargetResult::failure(
                target.host_kind,
                &target.host_name,
                format!("unknown host {}", target.host_name),
            );
        };
        if host.kind != target.host_kind {
            return TargetResult::failure(
                target.host_kind,
                &host.name,
                format!(
                    "host {} is {}, target expects {}",
                    host.name,
                    host.kind.as_str(),
                    target.host_kind.as_str()
                ),
            );
        }

        let spec = resolve_for_target(intent, target, ctx);
        let executor = self.executor_for(&host);

        // The reachability gate keeps an unreachable target from costing a
        // single remote call.
        if !executor.can_execute().await {
            return TargetResult::failure(
                host.kind,
                &host.name,
                format!("host {} is not reachable over {}", host.name, host.kind.as_str()),
            );
        }

        executor.execute(&spec, task_id, &target.name).await
    }

    fn executor_for(&self, host: &Host) -> Box<dyn Executor> {
        match host.kind {
            HostKind::Agent => Box::new(AgentExecutor::new(
                &host.name,
                self.registry.clone(),
                self.pending.clone(),
                self.settings.agent.reply_timeout(),
            )),
            HostKind::ControlApi => {
                let client = host.control_api_credentials().and_then(|credentials| {
                    match ControlApiClient::new(credentials, &self.settings.control_api) {
                        Ok(client) => Some(client),
                        Err(e) => {
                            warn!("Host {} has unusable API credentials: {}", host.name, e);
                            None
                        }
                    }
                });
                Box::new(ControlApiExecutor::new(host.clone(), client))
            }
            HostKind::Shell => Box::new(ShellExecutor::new(
                &host.name,
                host.shell_credentials().cloned(),
                self.connector.clone(),
            )),
        }
    }
}
