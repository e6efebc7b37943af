//! Error categorization
//!
//! Every failure that reaches a caller goes through [`categorize`], which maps
//! it to one kind of a fixed taxonomy with a user-safe message and ordered
//! remediation steps. A failure may carry several signals at once (a typed
//! kind plus whatever its text mentions); the kind earliest in
//! [`ErrorKind::PRECEDENCE`] wins.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::advisor::capitalize;
use crate::types::RequestId;
use crate::worker::WorkerFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Timeout,
    PermissionDenied,
    InvalidResponse,
    ToolFailure,
    Unknown,
}

impl ErrorKind {
    /// Highest precedence first
    pub const PRECEDENCE: [ErrorKind; 6] = [
        ErrorKind::NotFound,
        ErrorKind::Timeout,
        ErrorKind::PermissionDenied,
        ErrorKind::InvalidResponse,
        ErrorKind::ToolFailure,
        ErrorKind::Unknown,
    ];
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::PermissionDenied => "PermissionDenied",
            ErrorKind::InvalidResponse => "InvalidResponse",
            ErrorKind::ToolFailure => "ToolFailure",
            ErrorKind::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// Anything that can go wrong below the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub enum RawError {
    Worker(WorkerFailure),
    Text(String),
}

impl RawError {
    fn details(&self) -> String {
        match self {
            RawError::Worker(failure) => failure.to_string(),
            RawError::Text(text) => text.clone(),
        }
    }
}

impl From<WorkerFailure> for RawError {
    fn from(failure: WorkerFailure) -> Self {
        RawError::Worker(failure)
    }
}

/// Failure as shown to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorizedError {
    pub kind: ErrorKind,
    pub message: String,
    pub remediation: Vec<String>,
    pub request_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,

    /// Original error text, for logs only
    #[serde(skip_serializing)]
    pub raw_details: String,
}

lazy_static! {
    static ref SIGNALS: Vec<(ErrorKind, Regex)> = vec![
        (
            ErrorKind::NotFound,
            Regex::new(r"(?i)not\s+found|does\s+not\s+exist|no\s+such|not\s+registered|resourcenotfound|\b404\b|missing\s+(?:worker|configuration|endpoint)").unwrap(),
        ),
        (
            ErrorKind::Timeout,
            Regex::new(r"(?i)timed?\s*-?\s*out|deadline\s+exceeded|took\s+too\s+long|\b504\b").unwrap(),
        ),
        (
            ErrorKind::PermissionDenied,
            Regex::new(r"(?i)permission\s+denied|access\s*denied|unauthori[sz]ed|not\s+authori[sz]ed|forbidden|\b40[13]\b").unwrap(),
        ),
        (
            ErrorKind::InvalidResponse,
            Regex::new(r"(?i)invalid\s+response|malformed|unexpected\s+(?:token|format|shape)|invalid\s+json|failed\s+to\s+parse|undecodable|must\s+be\s+a|placeholder").unwrap(),
        ),
        (
            ErrorKind::ToolFailure,
            Regex::new(r"(?i)(?:worker|tool|function)\s+\S+\s+failed|failed|exception|traceback|internal\s+(?:server\s+)?error|crash(?:ed)?|\b500\b").unwrap(),
        ),
    ];
    static ref WORKER_NAME: Regex = Regex::new(
        r#"(?i)(?:worker|tool|function|lambda)\s+['"`]?([a-z][a-z0-9]*(?:[_\-][a-z0-9]+)+|[a-z][a-z0-9]{2,})['"`]?"#
    )
    .unwrap();
}

const NOT_WORKER_NAMES: &[&str] = &["failed", "error", "raised", "crashed", "returned", "call", "not"];

/// Classify a failure. Never panics; unrecognized input is `Unknown`.
pub fn categorize(raw: &RawError, request_id: &RequestId) -> CategorizedError {
    let details = raw.details();

    let mut signals = BTreeSet::new();
    if let RawError::Worker(failure) = raw {
        if let Some(kind) = typed_kind(failure) {
            signals.insert(kind);
        }
    }
    for (kind, pattern) in SIGNALS.iter() {
        if pattern.is_match(&details) {
            signals.insert(*kind);
        }
    }

    let kind = ErrorKind::PRECEDENCE
        .into_iter()
        .find(|kind| signals.contains(kind))
        .unwrap_or(ErrorKind::Unknown);

    let worker = match raw {
        RawError::Worker(failure) => Some(failure.worker().to_string()),
        RawError::Text(text) => worker_name(text),
    };

    let (message, remediation) = template(kind, worker.as_deref(), request_id);

    tracing::error!(
        request_id = %request_id,
        kind = %kind,
        worker = worker.as_deref().unwrap_or("-"),
        raw = %details,
        "Request failed"
    );

    CategorizedError {
        kind,
        message,
        remediation,
        request_id: request_id.to_string(),
        worker,
        raw_details: details,
    }
}

fn typed_kind(failure: &WorkerFailure) -> Option<ErrorKind> {
    match failure {
        WorkerFailure::NotFound { .. } => Some(ErrorKind::NotFound),
        WorkerFailure::Timeout { .. } => Some(ErrorKind::Timeout),
        WorkerFailure::PermissionDenied { .. } => Some(ErrorKind::PermissionDenied),
        WorkerFailure::InvalidResponse { .. } => Some(ErrorKind::InvalidResponse),
        WorkerFailure::ToolFailure { .. } => Some(ErrorKind::ToolFailure),
        // Connection problems carry no taxonomy kind of their own
        WorkerFailure::Transport { .. } => None,
    }
}

/// Worker name mentioned in free-form error text
fn worker_name(text: &str) -> Option<String> {
    WORKER_NAME
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .find(|name| !NOT_WORKER_NAMES.contains(&name.to_lowercase().as_str()))
}

fn template(kind: ErrorKind, worker: Option<&str>, request_id: &RequestId) -> (String, Vec<String>) {
    let service = worker
        .map(|w| format!("the '{}' worker", w))
        .unwrap_or_else(|| "the analysis worker".to_string());

    match kind {
        ErrorKind::NotFound => (
            "The analysis service needed for this request could not be found.".to_string(),
            vec![
                format!("Check that {} is deployed and registered", service),
                "Verify the worker endpoints in the configuration".to_string(),
                "Run diagnostics to confirm worker configuration and reachability".to_string(),
            ],
        ),
        ErrorKind::Timeout => (
            "The analysis took longer than allowed and was stopped.".to_string(),
            vec![
                "Retry the request; temporary load often clears within a minute".to_string(),
                "Reduce the scope of the analysis, for example fewer turbines or a smaller area"
                    .to_string(),
                format!("Check whether {} is overloaded", service),
            ],
        ),
        ErrorKind::PermissionDenied => (
            "The orchestrator is not permitted to call the analysis service.".to_string(),
            vec![
                format!("Check the credentials used to call {}", service),
                "Verify the worker's access policy allows the orchestrator".to_string(),
                "Contact an administrator if the problem persists".to_string(),
            ],
        ),
        ErrorKind::InvalidResponse => (
            "The analysis service returned a response in an unexpected format.".to_string(),
            vec![
                "Retry shortly".to_string(),
                format!("Check that {} runs a compatible version", service),
                format!("Report request {} to the operators", request_id),
            ],
        ),
        ErrorKind::ToolFailure => (
            format!("{} reported an error while processing the request.", capitalize(&service)),
            vec![
                format!("Check the logs of {} for request {}", service, request_id),
                "Verify the request parameters: coordinates, turbine count and capacity"
                    .to_string(),
                "Retry after correcting the input".to_string(),
            ],
        ),
        ErrorKind::Unknown => (
            "An unexpected error occurred while processing the request.".to_string(),
            vec![
                "Retry shortly".to_string(),
                "Check the operational status of the analysis services".to_string(),
            ],
        ),
    }
}
