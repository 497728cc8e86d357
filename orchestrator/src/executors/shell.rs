//! Shell executor
//!
//! Runs the deploy as remote commands over one SSH-style session. A
//! multi-step spec executes in order and aborts at the first non-zero
//! exit, with two exceptions: cleanup steps tolerate failure, and a
//! name-already-in-use conflict is remediated once by force-removing the
//! conflicting resource and re-running the step.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::executors::Executor;
use crate::models::host::{HostKind, ShellCredentials};
use crate::models::intent::{DeployDefinition, DeployStep};
use crate::models::outcome::TargetResult;
use crate::shell::{CommandRunner, ShellConnector};
use crate::spec::command::to_shell_command;
use crate::spec::ExecutionSpec;

/// Cleanup verbs whose steps tolerate a non-zero exit
const CLEANUP_VERBS: &[&str] = &["kill", "stop", "rm"];

/// Record of one executed step, kept regardless of outcome
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub auto_cleaned: bool,
}

/// Executor for shell-kind hosts
pub struct ShellExecutor {
    host_name: String,
    credentials: Option<ShellCredentials>,
    connector: Arc<dyn ShellConnector>,
}

impl ShellExecutor {
    pub fn new(
        host_name: &str,
        credentials: Option<ShellCredentials>,
        connector: Arc<dyn ShellConnector>,
    ) -> Self {
        Self {
            host_name: host_name.to_string(),
            credentials,
            connector,
        }
    }

    fn failure(&self, message: impl Into<String>) -> TargetResult {
        TargetResult::failure(HostKind::Shell, &self.host_name, message)
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn can_execute(&self) -> bool {
        match &self.credentials {
            Some(creds) => {
                !creds.address.is_empty()
                    && (creds.password.is_some() || creds.private_key.is_some())
            }
            None => false,
        }
    }

    async fn execute(
        &self,
        spec: &ExecutionSpec,
        _task_id: &str,
        _target_name: &str,
    ) -> TargetResult {
        let Some(credentials) = &self.credentials else {
            return self.failure("host has no shell credentials");
        };

        let runner = match self.connector.connect(credentials).await {
            Ok(runner) => runner,
            Err(e) => {
                return self
                    .failure(format!("failed to open shell session to {}", self.host_name))
                    .with_error(e.to_string())
            }
        };

        let steps: Vec<DeployStep> = match &spec.definition {
            DeployDefinition::Single { command, .. } => vec![DeployStep {
                name: "deploy".to_string(),
                command: to_shell_command(command),
            }],
            DeployDefinition::Steps { steps, .. } => steps.clone(),
        };

        let (records, failed_step) = run_steps(runner.as_ref(), &steps).await;
        let raw = serde_json::to_string(&records).unwrap_or_default();

        match failed_step {
            None => {
                info!("{} steps completed on {}", records.len(), self.host_name);
                TargetResult::success(
                    HostKind::Shell,
                    &self.host_name,
                    format!("{} steps completed", records.len()),
                )
                .with_raw_output(raw)
            }
            Some(message) => self.failure(message).with_raw_output(raw),
        }
    }
}

/// Execute steps in order. Returns the records of every step that ran and,
/// on abort, a message naming the failing step.
async fn run_steps(
    runner: &dyn CommandRunner,
    steps: &[DeployStep],
) -> (Vec<StepRecord>, Option<String>) {
    let mut records = Vec::with_capacity(steps.len());

    for step in steps {
        let output = match runner.exec(&step.command).await {
            Ok(output) => output,
            Err(e) => {
                return (
                    records,
                    Some(format!("step {} failed to execute: {}", step.name, e)),
                )
            }
        };

        if output.succeeded() {
            records.push(record(step, &output, false));
            continue;
        }

        if is_cleanup_command(&step.command) {
            // kill/stop/rm against something that may not exist; carry on.
            warn!(
                "Cleanup step {} exited {}, continuing",
                step.name, output.exit_code
            );
            records.push(record(step, &output, false));
            continue;
        }

        let conflict = conflict_name(&output.stderr)
            .or_else(|| name_argument(&step.command));
        if let Some(resource) = conflict.filter(|_| is_name_conflict(&output.stderr)) {
            warn!(
                "Step {} hit a name conflict on {}, force-removing and retrying once",
                step.name, resource
            );
            if let Err(e) = runner.exec(&format!("docker rm -f {}", resource)).await {
                records.push(record(step, &output, false));
                return (
                    records,
                    Some(format!(
                        "step {} conflict cleanup failed: {}",
                        step.name, e
                    )),
                );
            }

            match runner.exec(&step.command).await {
                Ok(retry) if retry.succeeded() => {
                    records.push(record(step, &retry, true));
                    continue;
                }
                Ok(retry) => {
                    records.push(record(step, &retry, true));
                    return (
                        records,
                        Some(format!(
                            "step {} failed again after conflict cleanup (exit {})",
                            step.name, retry.exit_code
                        )),
                    );
                }
                Err(e) => {
                    records.push(record(step, &output, true));
                    return (
                        records,
                        Some(format!("step {} retry failed to execute: {}", step.name, e)),
                    );
                }
            }
        }

        records.push(record(step, &output, false));
        return (
            records,
            Some(format!(
                "step {} failed with exit code {}",
                step.name, output.exit_code
            )),
        );
    }

    (records, None)
}

fn record(step: &DeployStep, output: &crate::shell::ExecOutput, auto_cleaned: bool) -> StepRecord {
    StepRecord {
        name: step.name.clone(),
        command: step.command.clone(),
        exit_code: output.exit_code,
        stdout: output.stdout.clone(),
        stderr: output.stderr.clone(),
        auto_cleaned,
    }
}

/// Whether the command is a cleanup action (`kill`/`stop`/`rm`).
fn is_cleanup_command(command: &str) -> bool {
    command
        .split_whitespace()
        .any(|token| CLEANUP_VERBS.contains(&token))
}

fn conflict_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"name "?/?([A-Za-z0-9][A-Za-z0-9_.-]*)"? (?:is )?already in use"#)
            .expect("conflict pattern is valid")
    })
}

/// Whether the error text matches the name-already-in-use pattern.
fn is_name_conflict(stderr: &str) -> bool {
    stderr.to_lowercase().contains("already in use")
}

/// Conflicting resource name from the error text, if present.
fn conflict_name(stderr: &str) -> Option<String> {
    conflict_pattern()
        .captures(stderr)
        .map(|caps| caps[1].to_string())
}

/// `--name` argument of the command, the fallback source for the
/// conflicting resource name.
fn name_argument(command: &str) -> Option<String> {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    for (i, token) in tokens.iter().enumerate() {
        if let Some(value) = token.strip_prefix("--name=") {
            return Some(value.to_string());
        }
        if *token == "--name" {
            return tokens.get(i + 1).map(|v| v.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::errors::OrchestratorError;
    use crate::shell::ExecOutput;

    struct ScriptedRunner {
        responses: Mutex<VecDeque<ExecOutput>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(responses: Vec<ExecOutput>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn exec(&self, command: &str) -> Result<ExecOutput, OrchestratorError> {
            self.calls.lock().unwrap().push(command.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| OrchestratorError::ShellError("no scripted response".into()))
        }
    }

    fn ok() -> ExecOutput {
        ExecOutput {
            exit_code: 0,
            stdout: "done".to_string(),
            stderr: String::new(),
        }
    }

    fn fail(exit_code: i32, stderr: &str) -> ExecOutput {
        ExecOutput {
            exit_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    fn step(name: &str, command: &str) -> DeployStep {
        DeployStep {
            name: name.to_string(),
            command: command.to_string(),
        }
    }

    #[tokio::test]
    async fn test_steps_run_in_order() {
        let runner = ScriptedRunner::new(vec![ok(), ok()]);
        let steps = vec![
            step("pull", "docker pull nginx:latest"),
            step("run", "docker run -d --name=web nginx:latest"),
        ];

        let (records, failed) = run_steps(&runner, &steps).await;
        assert!(failed.is_none());
        assert_eq!(records.len(), 2);
        assert_eq!(
            runner.calls(),
            vec![
                "docker pull nginx:latest".to_string(),
                "docker run -d --name=web nginx:latest".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_cleanup_step_tolerates_nonzero_exit() {
        let runner = ScriptedRunner::new(vec![fail(1, "no such container"), ok()]);
        let steps = vec![
            step("stop-old", "docker stop web"),
            step("run", "docker run -d --name=web nginx:latest"),
        ];

        let (records, failed) = run_steps(&runner, &steps).await;
        assert!(failed.is_none());
        assert_eq!(records[0].exit_code, 1);
        assert_eq!(records[1].exit_code, 0);
    }

    #[tokio::test]
    async fn test_nonzero_exit_aborts_remaining_steps() {
        let runner = ScriptedRunner::new(vec![fail(1, "pull access denied")]);
        let steps = vec![
            step("pull", "docker pull private/img:1"),
            step("run", "docker run -d private/img:1"),
        ];

        let (records, failed) = run_steps(&runner, &steps).await;
        assert!(failed.unwrap().contains("pull"));
        assert_eq!(records.len(), 1);
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_name_conflict_is_remediated_once() {
        let runner = ScriptedRunner::new(vec![
            ok(),
            fail(125, r#"docker: Error: container name "/web" already in use"#),
            ok(),
            ok(),
        ]);
        let steps = vec![
            step("pull", "docker pull nginx:latest"),
            step("run", "docker run -d --name=web nginx:latest"),
        ];

        let (records, failed) = run_steps(&runner, &steps).await;
        assert!(failed.is_none());
        assert_eq!(
            runner.calls()[2],
            "docker rm -f web",
            "conflicting container is force-removed"
        );
        assert_eq!(runner.calls()[3], "docker run -d --name=web nginx:latest");
        assert!(records[1].auto_cleaned);
        assert_eq!(records[1].exit_code, 0);
    }

    #[tokio::test]
    async fn test_conflict_retry_failure_aborts() {
        let runner = ScriptedRunner::new(vec![
            fail(125, r#"container name "/web" is already in use by container"#),
            ok(),
            fail(125, r#"container name "/web" is already in use by container"#),
        ]);
        let steps = vec![step("run", "docker run -d --name=web nginx:latest")];

        let (records, failed) = run_steps(&runner, &steps).await;
        assert!(failed.unwrap().contains("after conflict cleanup"));
        assert_eq!(records.len(), 1);
        assert!(records[0].auto_cleaned);
    }

    #[tokio::test]
    async fn test_conflict_name_falls_back_to_name_argument() {
        let runner = ScriptedRunner::new(vec![
            fail(125, "Error response from daemon: that name is already in use"),
            ok(),
            ok(),
        ]);
        let steps = vec![step("run", "docker run -d --name api redis:7")];

        let (_, failed) = run_steps(&runner, &steps).await;
        assert!(failed.is_none());
        assert_eq!(runner.calls()[1], "docker rm -f api");
    }

    #[test]
    fn test_conflict_name_extraction() {
        assert_eq!(
            conflict_name(r#"container name "/web" already in use"#).as_deref(),
            Some("web")
        );
        assert_eq!(
            conflict_name(r#"The container name "/api-1" is already in use by container "abc""#)
                .as_deref(),
            Some("api-1")
        );
        assert_eq!(conflict_name("no conflict here"), None);
    }

    #[test]
    fn test_cleanup_command_detection() {
        assert!(is_cleanup_command("docker rm -f web"));
        assert!(is_cleanup_command("docker stop web"));
        assert!(is_cleanup_command("kill -9 123"));
        assert!(!is_cleanup_command("docker run -d nginx"));
        assert!(!is_cleanup_command("rmdir /tmp/x"));
    }
}
