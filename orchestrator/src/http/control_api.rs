//! Container control API client
//!
//! REST calls against the remote control API fronting a
//! container runtime. Every call carries the host's API key and environment
//! id. Connection-reset class failures are retried under an explicit
//! policy; all other error classes fail on the first attempt.

use std::future::Future;
use std::time::Duration;

use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::config::ControlApiSettings;
use crate::errors::OrchestratorError;
use crate::models::host::ControlApiCredentials;
use crate::spec::command::ContainerSpec;

/// Error-text patterns treated as transient
const RETRYABLE_PATTERNS: &[&str] = &[
    "connection reset",
    "connection aborted",
    "broken pipe",
    "connection closed before",
];

/// Bounded retry policy for control API requests
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, first try included
    pub max_attempts: u32,

    /// Base wait, multiplied by the attempt number
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &ControlApiSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            backoff_base: Duration::from_secs(settings.backoff_base_secs),
        }
    }

    /// Wait before the attempt after `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }

    /// Only connection-reset class errors are worth another attempt.
    ///
    /// Transport failures are classified structurally: reqwest's `Display`
    /// does not flatten the io-level cause into the message, so the source
    /// chain is walked down to the `io::Error` kind. The text patterns
    /// remain for reset phrasing reported in API error bodies.
    pub fn is_retryable(&self, error: &OrchestratorError) -> bool {
        if let OrchestratorError::HttpError(e) = error {
            if is_reset_chain(e) {
                return true;
            }
        }
        let lower = error.to_string().to_lowercase();
        RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
    }
}

/// Whether any cause in the chain is a connection-reset class io error.
fn is_reset_chain(error: &dyn std::error::Error) -> bool {
    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ) {
                return true;
            }
        }
        source = cause.source();
    }
    false
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

/// Run `op` under the retry policy.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, OrchestratorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, OrchestratorError>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= policy.max_attempts || !policy.is_retryable(&e) {
                    return Err(e);
                }
                debug!(
                    "Transient control API failure (attempt {}/{}): {}",
                    attempt, policy.max_attempts, e
                );
                tokio::time::sleep(policy.backoff(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateContainerResponse {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct StackRecord {
    #[serde(rename = "Id")]
    id: u64,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "EndpointId", default)]
    endpoint_id: u64,
}

/// Client for one control-API host
pub struct ControlApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    environment_id: u64,
    retry: RetryPolicy,
}

impl ControlApiClient {
    pub fn new(
        credentials: &ControlApiCredentials,
        settings: &ControlApiSettings,
    ) -> Result<Self, OrchestratorError> {
        url::Url::parse(&credentials.api_url)
            .map_err(|e| OrchestratorError::ConfigError(format!("bad API base URL: {}", e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: credentials.api_url.trim_end_matches('/').to_string(),
            api_key: credentials.api_key.expose_secret().to_string(),
            environment_id: credentials.environment_id,
            retry: RetryPolicy::from_settings(settings),
        })
    }

    /// Create a container from the structured spec, returning its id.
    pub async fn create_container(&self, spec: &ContainerSpec, name: &str) -> Result<String, OrchestratorError> {
        let url = format!(
            "{}/endpoints/{}/docker/containers/create?name={}",
            self.base_url, self.environment_id, name
        );
        let body = container_body(spec);

        let response: CreateContainerResponse = with_retry(&self.retry, |_| {
            self.post_json(&url, &body)
        })
        .await?;
        Ok(response.id)
    }

    /// Start a created container.
    pub async fn start_container(&self, container_id: &str) -> Result<(), OrchestratorError> {
        let url = format!(
            "{}/endpoints/{}/docker/containers/{}/start",
            self.base_url, self.environment_id, container_id
        );
        with_retry(&self.retry, |_| self.post_empty(&url)).await
    }

    /// Stop a container. Missing containers are an error the caller may
    /// choose to swallow.
    pub async fn stop_container(&self, container_id: &str) -> Result<(), OrchestratorError> {
        let url = format!(
            "{}/endpoints/{}/docker/containers/{}/stop",
            self.base_url, self.environment_id, container_id
        );
        with_retry(&self.retry, |_| self.post_empty(&url)).await
    }

    /// Force-remove a container by id or name.
    pub async fn remove_container(&self, container_id: &str) -> Result<(), OrchestratorError> {
        let url = format!(
            "{}/endpoints/{}/docker/containers/{}?force=true",
            self.base_url, self.environment_id, container_id
        );
        with_retry(&self.retry, |_| self.delete(&url)).await
    }

    /// Create or update the stack named `name` from a compose document,
    /// returning the stack id.
    pub async fn upsert_stack(
        &self,
        name: &str,
        compose_content: &str,
    ) -> Result<u64, OrchestratorError> {
        match self.find_stack(name).await? {
            Some(stack_id) => {
                let url = format!(
                    "{}/stacks/{}?endpointId={}",
                    self.base_url, stack_id, self.environment_id
                );
                let body = json!({"stackFileContent": compose_content, "prune": true});
                let _: Value = with_retry(&self.retry, |_| self.put_json(&url, &body)).await?;
                Ok(stack_id)
            }
            None => {
                let url = format!(
                    "{}/stacks?type=2&method=string&endpointId={}",
                    self.base_url, self.environment_id
                );
                let body = json!({"name": name, "stackFileContent": compose_content});
                let created: StackRecord =
                    with_retry(&self.retry, |_| self.post_json(&url, &body)).await?;
                Ok(created.id)
            }
        }
    }

    /// Remove the stack named `name`, if it exists.
    pub async fn remove_stack(&self, name: &str) -> Result<(), OrchestratorError> {
        if let Some(stack_id) = self.find_stack(name).await? {
            let url = format!(
                "{}/stacks/{}?endpointId={}",
                self.base_url, stack_id, self.environment_id
            );
            with_retry(&self.retry, |_| self.delete(&url)).await?;
        }
        Ok(())
    }

    async fn find_stack(&self, name: &str) -> Result<Option<u64>, OrchestratorError> {
        let url = format!("{}/stacks", self.base_url);
        let stacks: Vec<StackRecord> = with_retry(&self.retry, |_| self.get_json(&url)).await?;
        Ok(stacks
            .iter()
            .find(|s| s.name == name && (s.endpoint_id == 0 || s.endpoint_id == self.environment_id))
            .map(|s| s.id))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<T, OrchestratorError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &Value,
    ) -> Result<T, OrchestratorError> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .header("X-API-Key", &self.api_key)
            .json(body)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn put_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &Value,
    ) -> Result<T, OrchestratorError> {
        debug!("PUT {}", url);
        let response = self
            .client
            .put(url)
            .header("X-API-Key", &self.api_key)
            .json(body)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn post_empty(&self, url: &str) -> Result<(), OrchestratorError> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn delete(&self, url: &str) -> Result<(), OrchestratorError> {
        debug!("DELETE {}", url);
        let response = self
            .client
            .delete(url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await?;
        Self::check_status(response).await
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, OrchestratorError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Control API request failed: {} - {}", status, body);
            return Err(OrchestratorError::ControlApiError(format!(
                "{}: {}",
                status, body
            )));
        }
        Ok(response.json().await?)
    }

    async fn check_status(response: reqwest::Response) -> Result<(), OrchestratorError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Control API request failed: {} - {}", status, body);
            return Err(OrchestratorError::ControlApiError(format!(
                "{}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

/// Docker create-container body built from the structured spec.
pub fn container_body(spec: &ContainerSpec) -> Value {
    let mut port_bindings = serde_json::Map::new();
    let mut exposed_ports = serde_json::Map::new();
    for mapping in &spec.ports {
        if let Some((host_port, container_port)) = mapping.split_once(':') {
            let key = format!("{}/tcp", container_port);
            exposed_ports.insert(key.clone(), json!({}));
            port_bindings.insert(key, json!([{"HostPort": host_port}]));
        }
    }

    json!({
        "Image": spec.image,
        "Env": spec.env,
        "ExposedPorts": exposed_ports,
        "HostConfig": {
            "PortBindings": port_bindings,
            "Binds": spec.volumes,
            "RestartPolicy": {"Name": spec.restart_policy},
        },
    })
}
