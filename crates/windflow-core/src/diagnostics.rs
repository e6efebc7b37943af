//! Operational diagnostics
//!
//! Read-only health checks over configuration and worker reachability. Not
//! used on the request path.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::config::WindflowConfig;
use crate::worker::{WorkerFailure, WorkerInvoker, WorkerRegistry};

/// Outcome of one diagnostic step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticResult {
    pub step: String,
    pub success: bool,
    pub details: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

impl DiagnosticResult {
    fn pass(step: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            success: true,
            details: details.into(),
            error: None,
            recommendations: Vec::new(),
        }
    }

    fn fail(
        step: impl Into<String>,
        details: impl Into<String>,
        error: impl Into<String>,
        recommendations: Vec<String>,
    ) -> Self {
        Self {
            step: step.into(),
            success: false,
            details: details.into(),
            error: Some(error.into()),
            recommendations,
        }
    }
}

pub struct Diagnostics {
    config: WindflowConfig,
    registry: Arc<WorkerRegistry>,
    invoker: WorkerInvoker,
}

impl std::fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Diagnostics")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Diagnostics {
    pub fn new(config: &WindflowConfig, registry: Arc<WorkerRegistry>) -> Self {
        Self {
            config: config.clone(),
            invoker: WorkerInvoker::new(registry.clone(), &config.invoker),
            registry,
        }
    }

    /// Configuration is complete and every configured worker is registered
    pub fn check_config(&self) -> DiagnosticResult {
        let mut problems = self.config.validate();
        for (stage, endpoint) in &self.config.workers {
            if !self.registry.contains(&endpoint.name) {
                problems.push(format!(
                    "worker '{}' for {} is not registered",
                    endpoint.name, stage
                ));
            }
        }

        if problems.is_empty() {
            return DiagnosticResult::pass(
                "config",
                format!(
                    "{} worker(s) configured, hard timeout {}ms",
                    self.config.workers.len(),
                    self.config.invoker.hard_timeout_ms
                ),
            );
        }

        let mut recommendations: Vec<String> = problems
            .iter()
            .filter(|p| p.contains("not registered"))
            .map(|p| format!("Register or configure an endpoint: {}", p))
            .collect();
        recommendations.push("Set WINDFLOW_WORKER_<STAGE>_URL or edit the configuration file".to_string());

        DiagnosticResult::fail(
            "config",
            format!("{} configuration problem(s)", problems.len()),
            problems.join("; "),
            recommendations,
        )
    }

    /// The worker answers at the transport level
    pub async fn check_worker_reachable(&self, name: &str) -> DiagnosticResult {
        let step = format!("reachability:{}", name);
        let Some(worker) = self.registry.get(name) else {
            return DiagnosticResult::fail(
                step,
                "worker is not registered",
                format!("worker '{}' not found", name),
                vec![format!("Check that '{}' is listed in the worker configuration", name)],
            );
        };

        let timeout = self.config.invoker.probe_timeout();
        match tokio::time::timeout(timeout, worker.ping()).await {
            Ok(Ok(())) => DiagnosticResult::pass(step, "worker is reachable"),
            Ok(Err(e)) => DiagnosticResult::fail(
                step,
                "worker did not accept a connection",
                e.to_string(),
                vec![
                    "Check the worker URL and that the service is running".to_string(),
                    "Check network access from the orchestrator host".to_string(),
                ],
            ),
            Err(_) => DiagnosticResult::fail(
                step,
                format!("no answer within {}ms", timeout.as_millis()),
                "ping timed out",
                vec!["Check whether the worker is overloaded or cold-starting".to_string()],
            ),
        }
    }

    /// Send the reserved health-check payload through the normal invoker
    pub async fn probe_worker(&self, name: &str) -> DiagnosticResult {
        let step = format!("probe:{}", name);
        let invocation = self
            .invoker
            .invoke(name, json!({ "healthCheck": true }), self.config.invoker.probe_timeout())
            .await;

        match invocation.outcome {
            Ok(response) => DiagnosticResult::pass(
                step,
                format!(
                    "valid response in {}ms: {}",
                    invocation.duration.as_millis(),
                    response.message
                ),
            ),
            Err(failure) => {
                let recommendations = match &failure {
                    WorkerFailure::InvalidResponse { .. } => vec![
                        "Check that the worker returns success, message and artifacts".to_string(),
                        "Check that the worker handles the healthCheck payload".to_string(),
                    ],
                    WorkerFailure::Timeout { .. } => vec![
                        "Check the worker's cold start time and resource limits".to_string(),
                    ],
                    WorkerFailure::PermissionDenied { .. } => vec![
                        "Check the credentials used to call the worker".to_string(),
                    ],
                    _ => vec!["Check the worker logs".to_string()],
                };
                DiagnosticResult::fail(step, "health check failed", failure.to_string(), recommendations)
            }
        }
    }

    /// Run config, reachability and probe checks, skipping steps an earlier
    /// failure makes meaningless
    pub async fn run_full(&self) -> Vec<DiagnosticResult> {
        let config = self.check_config();
        let config_ok = config.success;
        let mut results = vec![config];
        if !config_ok {
            tracing::warn!("Configuration incomplete, skipping worker checks");
            return results;
        }

        let names: Vec<String> = self
            .config
            .workers
            .values()
            .map(|endpoint| endpoint.name.clone())
            .collect();

        for name in names {
            let reachable = self.check_worker_reachable(&name).await;
            let reachable_ok = reachable.success;
            results.push(reachable);
            if reachable_ok {
                results.push(self.probe_worker(&name).await);
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedWorker;
    use crate::types::WorkflowStage;

    fn full_registry() -> WorkerRegistry {
        let mut registry = WorkerRegistry::new();
        for stage in WorkflowStage::ALL {
            registry.register(Arc::new(ScriptedWorker::succeeding(stage.key().replace('_', "-"))));
        }
        registry
    }

    #[tokio::test]
    async fn test_full_run_passes() {
        let diagnostics = Diagnostics::new(&WindflowConfig::default(), Arc::new(full_registry()));
        let results = diagnostics.run_full().await;
        assert_eq!(results.len(), 1 + 2 * WorkflowStage::ALL.len());
        assert!(results.iter().all(|r| r.success), "{:?}", results);
    }

    #[tokio::test]
    async fn test_missing_worker_stops_early() {
        let diagnostics = Diagnostics::new(&WindflowConfig::default(), Arc::new(WorkerRegistry::new()));
        let results = diagnostics.run_full().await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(!results[0].recommendations.is_empty());
    }

    #[tokio::test]
    async fn test_probe_reports_invalid_shape() {
        let registry = WorkerRegistry::new().with(Arc::new(ScriptedWorker::responding(
            "wake-simulation",
            json!({"ok": true}),
        )));
        let diagnostics = Diagnostics::new(&WindflowConfig::default(), Arc::new(registry));

        let result = diagnostics.probe_worker("wake-simulation").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("invalid response"));

        let unknown = diagnostics.check_worker_reachable("nope").await;
        assert!(!unknown.success);
    }
}
