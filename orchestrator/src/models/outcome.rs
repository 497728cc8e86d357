//! Per-target results and task outcomes

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::host::HostKind;

/// Ceiling on raw output carried in a result, in bytes
pub const MAX_RAW_OUTPUT: usize = 4096;

/// Result of exactly one executor invocation. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetResult {
    /// Whether the deploy succeeded on this target
    pub success: bool,

    /// Human-readable outcome message
    pub message: String,

    /// Error detail, when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Transport that produced this result
    pub transport: HostKind,

    /// Host the target resolved to
    pub host_name: String,

    /// Raw remote output, truncated to `MAX_RAW_OUTPUT`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl TargetResult {
    pub fn success(transport: HostKind, host_name: &str, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            transport,
            host_name: host_name.to_string(),
            raw_output: None,
        }
    }

    pub fn failure(transport: HostKind, host_name: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: None,
            transport,
            host_name: host_name.to_string(),
            raw_output: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_raw_output(mut self, raw: impl Into<String>) -> Self {
        self.raw_output = Some(truncate_output(&raw.into()));
        self
    }
}

/// Overall task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Completed,
    Failed,
}

/// Aggregated outcome of one deployment task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// `completed` iff every target succeeded
    pub status: TaskStatus,

    /// Per-target results, keyed by target name
    pub results: BTreeMap<String, TargetResult>,

    /// When the task finished
    pub finished_at: DateTime<Utc>,
}

/// Fold per-target results into one task outcome.
pub fn aggregate(results: BTreeMap<String, TargetResult>) -> TaskOutcome {
    let status = if results.values().all(|r| r.success) {
        TaskStatus::Completed
    } else {
        TaskStatus::Failed
    };
    TaskOutcome {
        status,
        results,
        finished_at: Utc::now(),
    }
}

/// Clip remote output for diagnostics
pub fn truncate_output(raw: &str) -> String {
    if raw.len() <= MAX_RAW_OUTPUT {
        return raw.to_string();
    }
    let mut end = MAX_RAW_OUTPUT;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &raw[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_all_success() {
        let mut results = BTreeMap::new();
        results.insert(
            "t1".to_string(),
            TargetResult::success(HostKind::Agent, "h1", "ok"),
        );
        results.insert(
            "t2".to_string(),
            TargetResult::success(HostKind::Shell, "h2", "ok"),
        );

        let outcome = aggregate(results);
        assert_eq!(outcome.status, TaskStatus::Completed);
    }

    #[test]
    fn test_aggregate_any_failure_fails_task() {
        let mut results = BTreeMap::new();
        results.insert(
            "t1".to_string(),
            TargetResult::success(HostKind::Agent, "h1", "ok"),
        );
        results.insert(
            "t2".to_string(),
            TargetResult::failure(HostKind::ControlApi, "h2", "boom"),
        );

        let outcome = aggregate(results);
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert!(outcome.results["t1"].success);
        assert!(!outcome.results["t2"].success);
    }

    #[test]
    fn test_aggregate_empty_is_completed() {
        let outcome = aggregate(BTreeMap::new());
        assert_eq!(outcome.status, TaskStatus::Completed);
    }

    #[test]
    fn test_truncate_output_bounds() {
        let long = "x".repeat(MAX_RAW_OUTPUT + 100);
        let clipped = truncate_output(&long);
        assert!(clipped.len() < long.len());
        assert!(clipped.ends_with("(truncated)"));

        let short = "hello";
        assert_eq!(truncate_output(short), "hello");
    }
}
