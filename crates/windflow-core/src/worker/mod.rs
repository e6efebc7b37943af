//! Compute workers and their invocation
//!
//! A [`Worker`] is an external unit that performs one workflow stage. The
//! core only sees raw JSON; [`invoker::WorkerInvoker`] bounds each call in
//! time, retries transient transport failures and turns whatever comes back
//! into a validated [`WorkerResponse`] or a typed [`WorkerFailure`].

pub mod http;
pub mod invoker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use http::HttpWorker;
pub use invoker::WorkerInvoker;

/// Transport-level failure reported by a worker client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    TimedOut(String),

    #[error("service unavailable (HTTP {status}): {body}")]
    Unavailable { status: u16, body: String },

    #[error("permission denied (HTTP {status}): {body}")]
    PermissionDenied { status: u16, body: String },

    #[error("worker not found: {0}")]
    NotFound(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("undecodable response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Failures worth retrying: the request may not have reached the worker
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_)
                | TransportError::TimedOut(_)
                | TransportError::Unavailable { .. }
        )
    }
}

/// A remote (or in-process) compute unit for one workflow stage
#[async_trait]
pub trait Worker: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Send one request and return the raw JSON response
    async fn invoke(&self, payload: &Value) -> Result<Value, TransportError>;

    /// Cheap reachability check
    async fn ping(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Normalized worker failure, the only error shape the orchestrator inspects
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerFailure {
    #[error("worker '{worker}' not found")]
    NotFound { worker: String },

    #[error("worker '{worker}' timed out after {elapsed_ms}ms")]
    Timeout { worker: String, elapsed_ms: u64 },

    #[error("permission denied invoking worker '{worker}': {detail}")]
    PermissionDenied { worker: String, detail: String },

    #[error("invalid response from worker '{worker}': {reason}")]
    InvalidResponse { worker: String, reason: String },

    #[error("worker '{worker}' failed: {message}")]
    ToolFailure { worker: String, message: String },

    #[error("transport error invoking worker '{worker}': {detail}")]
    Transport { worker: String, detail: String },
}

impl WorkerFailure {
    pub fn worker(&self) -> &str {
        match self {
            WorkerFailure::NotFound { worker }
            | WorkerFailure::Timeout { worker, .. }
            | WorkerFailure::PermissionDenied { worker, .. }
            | WorkerFailure::InvalidResponse { worker, .. }
            | WorkerFailure::ToolFailure { worker, .. }
            | WorkerFailure::Transport { worker, .. } => worker,
        }
    }

    pub(crate) fn from_transport(worker: &str, error: TransportError, elapsed: Duration) -> Self {
        let worker = worker.to_string();
        match error {
            TransportError::NotFound(_) => WorkerFailure::NotFound { worker },
            TransportError::TimedOut(_) => WorkerFailure::Timeout {
                worker,
                elapsed_ms: elapsed.as_millis() as u64,
            },
            TransportError::PermissionDenied { body, .. } => {
                WorkerFailure::PermissionDenied { worker, detail: body }
            }
            TransportError::Decode(reason) => WorkerFailure::InvalidResponse { worker, reason },
            other => WorkerFailure::Transport {
                worker,
                detail: other.to_string(),
            },
        }
    }
}

/// One output of a worker. The payload is opaque to the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    #[serde(default)]
    pub timings: BTreeMap<String, f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    /// Numeric results worth keeping on the project record
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// Validated worker response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub success: bool,
    pub message: String,
    pub artifacts: Vec<Artifact>,
    pub metadata: ResponseMetadata,
}

/// Record of one call through the invoker
#[derive(Debug, Clone)]
pub struct WorkerInvocation {
    pub worker_name: String,
    pub payload: Value,
    pub outcome: Result<WorkerResponse, WorkerFailure>,
    pub duration: Duration,

    /// Transport attempts made, including retries
    pub attempts: u32,
}

impl WorkerInvocation {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Workers available to this process, built once at startup
#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: HashMap<String, Arc<dyn Worker>>,
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.names())
            .finish()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker under its own name, replacing any previous one
    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.name().to_string(), worker);
    }

    pub fn with(mut self, worker: Arc<dyn Worker>) -> Self {
        self.register(worker);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workers.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

/// Project identifiers that indicate a worker ignored the request context
const PLACEHOLDER_PROJECT_NAMES: &[&str] = &[
    "",
    "default",
    "default-project",
    "unknown",
    "undefined",
    "null",
    "none",
    "project",
];

const PROJECT_ID_KEYS: &[&str] = &["projectName", "project_name", "projectId", "project_id"];

/// Check the shape of a raw worker response.
///
/// `success: false` with a readable message is reported as a tool failure
/// rather than a shape violation.
pub fn validate_response(worker: &str, raw: &Value) -> Result<WorkerResponse, WorkerFailure> {
    let invalid = |reason: String| WorkerFailure::InvalidResponse {
        worker: worker.to_string(),
        reason,
    };

    let object = raw
        .as_object()
        .ok_or_else(|| invalid(format!("expected a JSON object, got {}", json_kind(raw))))?;

    let success = match object.get("success") {
        Some(Value::Bool(success)) => *success,
        Some(other) => return Err(invalid(format!("'success' must be a boolean, got {}", json_kind(other)))),
        None => return Err(invalid("missing 'success'".to_string())),
    };

    let message = match object.get("message") {
        Some(Value::String(message)) => message.clone(),
        Some(other) => return Err(invalid(format!("'message' must be a string, got {}", json_kind(other)))),
        None => return Err(invalid("missing 'message'".to_string())),
    };

    if !success {
        return Err(WorkerFailure::ToolFailure {
            worker: worker.to_string(),
            message,
        });
    }

    let artifacts = match object.get("artifacts") {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value::<Artifact>(item.clone())
                    .map_err(|e| invalid(format!("artifact {} is malformed: {}", i, e)))
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => return Err(invalid(format!("'artifacts' must be a list, got {}", json_kind(other)))),
        None => return Err(invalid("missing 'artifacts'".to_string())),
    };

    let metadata_value = object.get("metadata").cloned().unwrap_or(Value::Null);
    for scope in [Some(raw), metadata_value.as_object().map(|_| &metadata_value)]
        .into_iter()
        .flatten()
    {
        for key in PROJECT_ID_KEYS {
            match scope.get(*key) {
                Some(Value::String(id))
                    if PLACEHOLDER_PROJECT_NAMES.contains(&id.trim().to_lowercase().as_str()) =>
                {
                    return Err(invalid(format!("placeholder project identifier '{}'", id)));
                }
                Some(Value::Null) => {
                    return Err(invalid(format!("null project identifier '{}'", key)));
                }
                _ => {}
            }
        }
    }

    Ok(WorkerResponse {
        success,
        message,
        artifacts,
        metadata: parse_metadata(&metadata_value),
    })
}

/// Metadata is best-effort: non-numeric timings and metrics are dropped
fn parse_metadata(value: &Value) -> ResponseMetadata {
    let numbers = |key: &str| -> BTreeMap<String, f64> {
        value
            .get(key)
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_f64().map(|n| (k.clone(), n)))
                    .collect()
            })
            .unwrap_or_default()
    };
    let text = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|key| value.get(*key).and_then(Value::as_str))
            .map(str::to_string)
    };

    ResponseMetadata {
        timings: numbers("timings"),
        tool_name: text(&["toolName", "tool_name"]),
        project_name: text(PROJECT_ID_KEYS),
        metrics: numbers("metrics"),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_response() {
        let raw = json!({
            "success": true,
            "message": "Terrain analysis complete",
            "artifacts": [{"type": "terrain_map", "id": "t-1", "payload": {"cells": 42}}],
            "metadata": {
                "toolName": "terrain-analysis",
                "projectName": "amarillo-wind-farm",
                "timings": {"computeMs": 812},
                "metrics": {"suitable_area_km2": 12.5, "note": "ignored"}
            }
        });

        let response = validate_response("terrain-analysis", &raw).unwrap();
        assert_eq!(response.artifacts.len(), 1);
        assert_eq!(response.artifacts[0].id.as_deref(), Some("t-1"));
        assert_eq!(response.metadata.tool_name.as_deref(), Some("terrain-analysis"));
        assert_eq!(response.metadata.metrics.len(), 1);
        assert_eq!(response.metadata.timings.get("computeMs"), Some(&812.0));
    }

    #[test]
    fn test_empty_artifacts_are_valid() {
        let raw = json!({"success": true, "message": "ok", "artifacts": []});
        assert!(validate_response("w", &raw).unwrap().artifacts.is_empty());
    }

    #[test]
    fn test_shape_violations() {
        let cases = [
            json!("not an object"),
            json!({"success": "yes", "message": "ok", "artifacts": []}),
            json!({"success": true, "message": 7, "artifacts": []}),
            json!({"success": true, "message": "ok"}),
            json!({"success": true, "message": "ok", "artifacts": {"type": "map"}}),
            json!({"success": true, "message": "ok", "artifacts": [{"payload": 1}]}),
        ];
        for raw in cases {
            let err = validate_response("w", &raw).unwrap_err();
            assert!(matches!(err, WorkerFailure::InvalidResponse { .. }), "{:?}", raw);
        }
    }

    #[test]
    fn test_placeholder_project_rejected() {
        for id in ["default", "Default-Project", "unknown", " "] {
            let raw = json!({
                "success": true, "message": "ok", "artifacts": [],
                "metadata": {"projectName": id}
            });
            assert!(matches!(
                validate_response("w", &raw),
                Err(WorkerFailure::InvalidResponse { .. })
            ));
        }
        let raw = json!({"success": true, "message": "ok", "artifacts": [], "projectId": null});
        assert!(validate_response("w", &raw).is_err());
    }

    #[test]
    fn test_application_failure_is_tool_failure() {
        let raw = json!({"success": false, "message": "Layout solver diverged"});
        assert_eq!(
            validate_response("layout-optimization", &raw).unwrap_err(),
            WorkerFailure::ToolFailure {
                worker: "layout-optimization".to_string(),
                message: "Layout solver diverged".to_string()
            }
        );
    }

    #[test]
    fn test_transport_error_mapping() {
        let elapsed = Duration::from_millis(1500);
        assert!(TransportError::Connect("refused".into()).is_transient());
        assert!(!TransportError::NotFound("x".into()).is_transient());
        assert!(matches!(
            WorkerFailure::from_transport("w", TransportError::TimedOut("t".into()), elapsed),
            WorkerFailure::Timeout { elapsed_ms: 1500, .. }
        ));
        assert!(matches!(
            WorkerFailure::from_transport("w", TransportError::Decode("eof".into()), elapsed),
            WorkerFailure::InvalidResponse { .. }
        ));
    }
}
