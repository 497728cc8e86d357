//! Correlation layer
//!
//! Converts the fire-and-forget push protocol into an awaitable call: a
//! pending result handle is registered under its correlation key before the
//! push goes out, and the matching terminal reply fulfils it. Each handle
//! remembers the host the dispatch was pushed to, so a report from any
//! other host cannot settle it. A reply that finds no handle is logged and
//! dropped, never an error.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::errors::OrchestratorError;
use crate::proto::DeployReply;

/// Composite correlation key for one dispatch
pub fn correlation_key(task_id: &str, target_name: &str) -> String {
    format!("{}:{}", task_id, target_name)
}

/// Awaitable placeholder for a result not yet received
pub struct ResultHandle {
    key: String,
    rx: oneshot::Receiver<DeployReply>,
}

impl ResultHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the terminal reply. Errors if the handle was cancelled.
    pub async fn wait(self) -> Result<DeployReply, OrchestratorError> {
        self.rx
            .await
            .map_err(|_| OrchestratorError::CorrelationError(format!("{} cancelled", self.key)))
    }
}

struct PendingEntry {
    host_name: String,
    tx: oneshot::Sender<DeployReply>,
}

/// Pending result handles, keyed by correlation key
#[derive(Default)]
pub struct PendingDeploys {
    inner: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingDeploys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new handle bound to the host the push goes to. Must be
    /// called before the push is sent so a fast reply cannot be dropped.
    /// At most one handle may exist per key; a key is reusable once its
    /// prior handle resolved or was cancelled.
    pub fn create(&self, key: &str, host_name: &str) -> Result<ResultHandle, OrchestratorError> {
        let mut inner = self.inner.lock().expect("pending map poisoned");
        if inner.contains_key(key) {
            return Err(OrchestratorError::CorrelationError(format!(
                "dispatch {} already in flight",
                key
            )));
        }

        let (tx, rx) = oneshot::channel();
        inner.insert(
            key.to_string(),
            PendingEntry {
                host_name: host_name.to_string(),
                tx,
            },
        );
        Ok(ResultHandle {
            key: key.to_string(),
            rx,
        })
    }

    /// Fulfil the handle for `key` with a terminal reply from `host_name`.
    ///
    /// Non-terminal replies never settle a handle. A reply for an unknown
    /// or already-settled key is logged and ignored, and a reply from a
    /// host other than the one the dispatch was pushed to is dropped with
    /// the handle left waiting.
    pub fn resolve(&self, key: &str, host_name: &str, reply: DeployReply) {
        if !reply.status.is_terminal() {
            debug!(
                "Ignoring non-terminal reply ({}) for dispatch {}",
                reply.status.as_str(),
                key
            );
            return;
        }

        let entry = {
            let mut inner = self.inner.lock().expect("pending map poisoned");
            match inner.get(key) {
                Some(entry) if entry.host_name == host_name => inner.remove(key),
                Some(entry) => {
                    warn!(
                        "Dropping reply for {} from host {}, dispatch was pushed to {}",
                        key, host_name, entry.host_name
                    );
                    None
                }
                None => {
                    debug!("Ignoring reply for unknown or settled dispatch {}", key);
                    None
                }
            }
        };

        if let Some(entry) = entry {
            if entry.tx.send(reply).is_err() {
                // Receiver gave up (timeout) between lookup and send.
                warn!("Reply for {} arrived after the waiter left", key);
            }
        }
    }

    /// Cancel the handle for `key` so a late reply is ignored instead of
    /// resolving a waiter that no longer exists. Used on timeout.
    pub fn cancel(&self, key: &str) {
        let removed = self
            .inner
            .lock()
            .expect("pending map poisoned")
            .remove(key)
            .is_some();
        if removed {
            debug!("Cancelled pending dispatch {}", key);
        }
    }

    /// Number of in-flight handles.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("pending map poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
