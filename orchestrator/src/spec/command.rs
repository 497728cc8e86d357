//! Run-command adapter
//!
//! Turns a transport-neutral `docker run`-style argument string into the
//! structured field set the control API needs, while keeping the literal
//! string for transports that execute it verbatim.

use crate::errors::OrchestratorError;

/// Structured container fields extracted from a run command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Container name, from `--name`
    pub name: Option<String>,

    /// Image reference
    pub image: String,

    /// `host:container` port mappings
    pub ports: Vec<String>,

    /// `KEY=value` environment entries
    pub env: Vec<String>,

    /// Volume bindings
    pub volumes: Vec<String>,

    /// Restart policy, defaulting to `always`
    pub restart_policy: String,
}

/// Flags whose value is the following token when not given as `--flag=value`
const VALUE_FLAGS: &[&str] = &[
    "--name",
    "-p",
    "--publish",
    "-e",
    "--env",
    "-v",
    "--volume",
    "--restart",
    "--network",
    "--net",
    "--entrypoint",
    "--label",
    "-l",
    "-w",
    "--workdir",
    "-u",
    "--user",
    "--hostname",
    "-h",
];

/// Parse a `docker run`-style argument string into structured fields.
///
/// Tolerates line continuations and collapses whitespace before tokenizing.
/// The image, if not explicit, is the last non-flag token; failing that, a
/// trailing `name:tag`-shaped token is accepted. The heuristic cannot tell
/// a trailing entrypoint argument from an image and does not try to.
pub fn parse_run_command(command: &str) -> Result<ContainerSpec, OrchestratorError> {
    let normalized = command.replace("\\\r\n", " ").replace("\\\n", " ");
    let tokens: Vec<&str> = normalized.split_whitespace().collect();

    let mut spec = ContainerSpec {
        name: None,
        image: String::new(),
        ports: Vec::new(),
        env: Vec::new(),
        volumes: Vec::new(),
        restart_policy: "always".to_string(),
    };

    let mut positional: Vec<&str> = Vec::new();
    let mut i = 0;

    // Skip a leading `docker run` prefix if present.
    if tokens.first() == Some(&"docker") {
        i += 1;
        if tokens.get(i) == Some(&"run") {
            i += 1;
        }
    }

    while i < tokens.len() {
        let token = tokens[i];

        if token.starts_with('-') {
            let (flag, inline_value) = match token.split_once('=') {
                Some((f, v)) => (f, Some(v.to_string())),
                None => (token, None),
            };

            let value = if inline_value.is_some() {
                inline_value
            } else if VALUE_FLAGS.contains(&flag) {
                i += 1;
                tokens.get(i).map(|v| v.to_string())
            } else {
                None
            };

            match flag {
                "--name" => spec.name = value,
                "-p" | "--publish" => {
                    if let Some(v) = value {
                        spec.ports.push(v);
                    }
                }
                "-e" | "--env" => {
                    if let Some(v) = value {
                        spec.env.push(v);
                    }
                }
                "-v" | "--volume" => {
                    if let Some(v) = value {
                        spec.volumes.push(v);
                    }
                }
                "--restart" => {
                    if let Some(v) = value {
                        spec.restart_policy = v;
                    }
                }
                // Boolean flags (-d, --rm, ...) and flags we carry no
                // structured field for are skipped.
                _ => {}
            }
        } else {
            positional.push(token);
        }

        i += 1;
    }

    if let Some(image) = positional.last() {
        spec.image = image.to_string();
    } else if let Some(image) = tokens.iter().rev().find(|t| looks_like_image(t)) {
        spec.image = image.to_string();
    }

    if spec.image.is_empty() {
        return Err(OrchestratorError::ValidationError(format!(
            "no image reference found in command: {}",
            command
        )));
    }

    Ok(spec)
}

/// `name:tag`-shaped token check used as the image fallback.
fn looks_like_image(token: &str) -> bool {
    if token.starts_with('-') || token.contains('=') {
        return false;
    }
    match token.rsplit_once(':') {
        Some((name, tag)) => {
            !name.is_empty()
                && !tag.is_empty()
                && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_')
        }
        None => false,
    }
}

/// The literal command for transports that execute it verbatim. A bare
/// argument string gets the `docker run` prefix it was written against.
pub fn to_shell_command(command: &str) -> String {
    let trimmed = command.trim();
    if trimmed.starts_with("docker") || trimmed.contains("&&") || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("docker run {}", trimmed)
    }
}

/// Container name for a deploy, used to pre-clean a prior deployment:
/// explicit `--name` wins, else the app name.
pub fn derive_container_name(spec: &ContainerSpec, app_name: &str) -> String {
    spec.name.clone().unwrap_or_else(|| app_name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_reference_command() {
        let spec = parse_run_command("-d --name=web -p 8080:80 nginx:latest").unwrap();
        assert_eq!(spec.name.as_deref(), Some("web"));
        assert_eq!(spec.ports, vec!["8080:80".to_string()]);
        assert_eq!(spec.image, "nginx:latest");
        assert!(spec.env.is_empty());
        assert!(spec.volumes.is_empty());
        assert_eq!(spec.restart_policy, "always");
    }

    #[test]
    fn test_flag_values_in_space_form() {
        let spec =
            parse_run_command("docker run --name api -e MODE=prod -v /data:/data redis:7").unwrap();
        assert_eq!(spec.name.as_deref(), Some("api"));
        assert_eq!(spec.env, vec!["MODE=prod".to_string()]);
        assert_eq!(spec.volumes, vec!["/data:/data".to_string()]);
        assert_eq!(spec.image, "redis:7");
    }

    #[test]
    fn test_line_continuations_collapse() {
        let spec = parse_run_command("-d --name=web \\\n  -p 8080:80 \\\n  nginx:latest").unwrap();
        assert_eq!(spec.image, "nginx:latest");
        assert_eq!(spec.ports, vec!["8080:80".to_string()]);
    }

    #[test]
    fn test_restart_policy_override() {
        let spec = parse_run_command("--restart unless-stopped nginx:latest").unwrap();
        assert_eq!(spec.restart_policy, "unless-stopped");
    }

    #[test]
    fn test_image_is_last_non_flag_token() {
        let spec = parse_run_command("-d --rm ghcr.io/acme/app:1.2").unwrap();
        assert_eq!(spec.image, "ghcr.io/acme/app:1.2");
    }

    #[test]
    fn test_missing_image_is_an_error() {
        assert!(parse_run_command("-d --rm").is_err());
    }

    #[test]
    fn test_shell_command_passthrough_and_prefix() {
        assert_eq!(
            to_shell_command("-d --name=web nginx:latest"),
            "docker run -d --name=web nginx:latest"
        );
        assert_eq!(
            to_shell_command("docker compose up -d"),
            "docker compose up -d"
        );
    }

    #[test]
    fn test_derive_container_name_fallback() {
        let spec = parse_run_command("-d nginx:latest").unwrap();
        assert_eq!(derive_container_name(&spec, "billing"), "billing");

        let named = parse_run_command("--name=web nginx:latest").unwrap();
        assert_eq!(derive_container_name(&named, "billing"), "web");
    }
}
