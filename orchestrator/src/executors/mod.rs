//! Transport executors
//!
//! One polymorphic strategy per host kind. Executors never raise into the
//! coordinator: every failure is folded into the returned `TargetResult`.

pub mod agent;
pub mod control_api;
pub mod shell;

use async_trait::async_trait;

use crate::models::outcome::TargetResult;
use crate::spec::ExecutionSpec;

/// Transport-specific deploy strategy for one host
#[async_trait]
pub trait Executor: Send + Sync {
    /// Whether the transport can currently reach its host.
    async fn can_execute(&self) -> bool;

    /// Carry out one deployment intent against the host.
    async fn execute(
        &self,
        spec: &ExecutionSpec,
        task_id: &str,
        target_name: &str,
    ) -> TargetResult;
}
