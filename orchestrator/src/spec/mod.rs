//! Deployment intent parsing, validation and per-target resolution

pub mod command;
pub mod template;

use serde_json::Value;

use crate::errors::OrchestratorError;
use crate::models::host::HostKind;
use crate::models::intent::{
    AppIdentity, DeployDefinition, DeployMode, DeployStep, DeploymentIntent, Target,
    TargetOverrides,
};
use crate::spec::template::{render, RenderContext};

/// Parse a deployment intent document.
///
/// Two shapes are accepted: the canonical multi-target shape with a
/// `targets` array, and the legacy single-target-per-document shape, which
/// is rewritten into the canonical form. Validation failures are raised
/// here, before any remote call is made.
pub fn parse_intent(doc: &Value) -> Result<DeploymentIntent, OrchestratorError> {
    let app = parse_app(doc)?;
    let deploy = parse_deploy(doc)?;
    let targets = match doc.get("targets") {
        Some(Value::Array(entries)) => entries
            .iter()
            .map(parse_target)
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(OrchestratorError::ValidationError(
                "targets must be an array".to_string(),
            ))
        }
        // Legacy shape: host fields live at the document root.
        None => vec![parse_target(doc)?],
    };

    if targets.is_empty() {
        return Err(OrchestratorError::ValidationError(
            "at least one target is required".to_string(),
        ));
    }
    for (i, target) in targets.iter().enumerate() {
        if targets[..i].iter().any(|t| t.name == target.name) {
            return Err(OrchestratorError::ValidationError(format!(
                "duplicate target name: {}",
                target.name
            )));
        }
    }

    Ok(DeploymentIntent {
        app,
        deploy,
        targets,
    })
}

fn parse_app(doc: &Value) -> Result<AppIdentity, OrchestratorError> {
    let app = doc
        .get("app")
        .ok_or_else(|| OrchestratorError::ValidationError("app is required".to_string()))?;
    let name = app
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();
    if name.is_empty() {
        return Err(OrchestratorError::ValidationError(
            "app.name is required".to_string(),
        ));
    }
    Ok(AppIdentity {
        name,
        repo: app
            .get("repo")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn parse_deploy(doc: &Value) -> Result<DeployDefinition, OrchestratorError> {
    let deploy = doc
        .get("deploy")
        .ok_or_else(|| OrchestratorError::ValidationError("deploy is required".to_string()))?;

    match deploy.get("steps") {
        Some(steps_value) => {
            if deploy.get("command").is_some() {
                return Err(OrchestratorError::ValidationError(
                    "deploy.steps and deploy.command are mutually exclusive".to_string(),
                ));
            }
            let steps: Vec<DeployStep> = serde_json::from_value(steps_value.clone())?;
            if steps.is_empty() {
                return Err(OrchestratorError::ValidationError(
                    "deploy.steps must not be empty".to_string(),
                ));
            }
            for step in &steps {
                if step.name.trim().is_empty() || step.command.trim().is_empty() {
                    return Err(OrchestratorError::ValidationError(
                        "every step needs a name and a command".to_string(),
                    ));
                }
            }
            Ok(DeployDefinition::Steps {
                steps,
                redeploy: deploy
                    .get("redeploy")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        }
        None => {
            let command = deploy
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string();
            if command.is_empty() {
                return Err(OrchestratorError::ValidationError(
                    "deploy needs either a command or a step list".to_string(),
                ));
            }
            let mode = match deploy.get("type").and_then(Value::as_str) {
                Some("compose") => DeployMode::Compose,
                Some("container") | None => DeployMode::Container,
                Some(other) => {
                    return Err(OrchestratorError::ValidationError(format!(
                        "unknown deploy type: {}",
                        other
                    )))
                }
            };
            Ok(DeployDefinition::Single {
                mode,
                command,
                compose_content: deploy
                    .get("compose_content")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                redeploy: deploy
                    .get("redeploy")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            })
        }
    }
}

fn parse_target(entry: &Value) -> Result<Target, OrchestratorError> {
    let kind_str = entry
        .get("host_type")
        .or_else(|| entry.get("mode"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            OrchestratorError::ValidationError("target host_type is required".to_string())
        })?;
    let host_kind = parse_host_kind(kind_str)?;

    let host_name = entry
        .get("host_name")
        .and_then(Value::as_str)
        .or_else(|| entry.pointer("/agent/name").and_then(Value::as_str))
        .or_else(|| entry.get("host").and_then(Value::as_str))
        .unwrap_or("")
        .trim()
        .to_string();
    if host_name.is_empty() {
        return Err(OrchestratorError::ValidationError(
            "target host name is required".to_string(),
        ));
    }

    let overrides: Option<TargetOverrides> = match entry.get("overrides") {
        Some(value) => {
            let parsed: TargetOverrides = serde_json::from_value(value.clone())?;
            (!parsed.is_empty()).then_some(parsed)
        }
        None => None,
    };

    Ok(Target {
        name: entry
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(&host_name)
            .to_string(),
        host_kind,
        host_name,
        overrides,
    })
}

fn parse_host_kind(s: &str) -> Result<HostKind, OrchestratorError> {
    match s {
        "agent" => Ok(HostKind::Agent),
        "control-api" | "control_api" | "api" => Ok(HostKind::ControlApi),
        "shell" | "ssh" => Ok(HostKind::Shell),
        other => Err(OrchestratorError::ValidationError(format!(
            "unknown host type: {}",
            other
        ))),
    }
}

/// The deploy definition resolved for one target: overrides applied and
/// templates rendered. This is what executors receive.
#[derive(Debug, Clone)]
pub struct ExecutionSpec {
    pub app: AppIdentity,
    pub definition: DeployDefinition,

    /// Flat render context, echoed to agent peers alongside the config
    pub context: serde_json::Value,
}

/// Apply per-target overrides and render `{{var}}` placeholders.
pub fn resolve_for_target(
    intent: &DeploymentIntent,
    target: &Target,
    ctx: &RenderContext,
) -> ExecutionSpec {
    let mut definition = intent.deploy.clone();

    if let Some(overrides) = &target.overrides {
        if let DeployDefinition::Single {
            command,
            compose_content,
            ..
        } = &mut definition
        {
            if let Some(cmd) = &overrides.command {
                *command = cmd.clone();
            }
            if let Some(compose) = &overrides.compose_content {
                *compose_content = Some(compose.clone());
            }
        }
    }

    match &mut definition {
        DeployDefinition::Single {
            command,
            compose_content,
            ..
        } => {
            *command = render(command, ctx);
            if let Some(compose) = compose_content {
                *compose = render(compose, ctx);
            }
        }
        DeployDefinition::Steps { steps, .. } => {
            for step in steps {
                step.command = render(&step.command, ctx);
            }
        }
    }

    ExecutionSpec {
        app: intent.app.clone(),
        definition,
        context: ctx.to_json(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_parse_canonical_multi_target() {
        let doc = json!({
            "app": {"name": "billing", "repo": "acme/billing"},
            "deploy": {"type": "container", "command": "-d --name=web nginx:latest"},
            "targets": [
                {"name": "t1", "host_type": "agent", "host_name": "edge-1"},
                {"name": "t2", "host_type": "shell", "host": "vm-9",
                 "overrides": {"command": "-d nginx:1.25"}},
            ],
        });

        let intent = parse_intent(&doc).unwrap();
        assert_eq!(intent.app.name, "billing");
        assert_eq!(intent.targets.len(), 2);
        assert_eq!(intent.targets[1].host_kind, HostKind::Shell);
        assert_eq!(intent.targets[1].host_name, "vm-9");
        assert!(intent.targets[1].overrides.is_some());
    }

    #[test]
    fn test_legacy_shape_is_rewritten() {
        let doc = json!({
            "app": {"name": "billing"},
            "deploy": {"command": "-d nginx:latest"},
            "mode": "agent",
            "agent": {"name": "edge-7"},
        });

        let intent = parse_intent(&doc).unwrap();
        assert_eq!(intent.targets.len(), 1);
        assert_eq!(intent.targets[0].host_kind, HostKind::Agent);
        assert_eq!(intent.targets[0].host_name, "edge-7");
        assert_eq!(intent.targets[0].name, "edge-7");
    }

    #[test]
    fn test_steps_and_command_are_mutually_exclusive() {
        let doc = json!({
            "app": {"name": "billing"},
            "deploy": {
                "command": "-d nginx",
                "steps": [{"name": "pull", "command": "docker pull nginx"}],
            },
            "targets": [{"host_type": "shell", "host_name": "vm-1"}],
        });
        assert!(parse_intent(&doc).is_err());
    }

    #[test]
    fn test_missing_app_name_rejected() {
        let doc = json!({
            "app": {},
            "deploy": {"command": "-d nginx"},
            "targets": [{"host_type": "agent", "host_name": "edge-1"}],
        });
        assert!(parse_intent(&doc).is_err());
    }

    #[test]
    fn test_empty_targets_rejected() {
        let doc = json!({
            "app": {"name": "billing"},
            "deploy": {"command": "-d nginx"},
            "targets": [],
        });
        assert!(parse_intent(&doc).is_err());
    }

    #[test]
    fn test_duplicate_target_names_rejected() {
        let doc = json!({
            "app": {"name": "billing"},
            "deploy": {"command": "-d nginx"},
            "targets": [
                {"name": "t1", "host_type": "agent", "host_name": "edge-1"},
                {"name": "t1", "host_type": "shell", "host_name": "vm-1"},
            ],
        });
        assert!(parse_intent(&doc).is_err());
    }

    #[test]
    fn test_resolve_applies_overrides_and_templates() {
        let doc = json!({
            "app": {"name": "billing"},
            "deploy": {"command": "-d --name={{app_name}} {{registry}}/billing:{{tag}}"},
            "targets": [
                {"name": "t1", "host_type": "agent", "host_name": "edge-1"},
                {"name": "t2", "host_type": "shell", "host_name": "vm-1",
                 "overrides": {"command": "-d {{registry}}/billing:canary"}},
            ],
        });
        let intent = parse_intent(&doc).unwrap();
        let ctx = RenderContext::new()
            .with("app_name", "billing")
            .with("registry", "reg.flotilla.dev")
            .with("tag", "2.0");

        let spec = resolve_for_target(&intent, &intent.targets[0], &ctx);
        match &spec.definition {
            DeployDefinition::Single { command, .. } => {
                assert_eq!(command, "-d --name=billing reg.flotilla.dev/billing:2.0");
            }
            other => panic!("unexpected definition: {:?}", other),
        }

        let overridden = resolve_for_target(&intent, &intent.targets[1], &ctx);
        match &overridden.definition {
            DeployDefinition::Single { command, .. } => {
                assert_eq!(command, "-d reg.flotilla.dev/billing:canary");
            }
            other => panic!("unexpected definition: {:?}", other),
        }
    }
}
