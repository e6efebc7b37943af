//! Bounded, retrying worker calls
//!
//! The hard timeout covers every attempt and every backoff sleep, so
//! [`WorkerInvoker::invoke`] returns within that bound whatever the worker
//! does.

use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{
    validate_response, TransportError, Worker, WorkerFailure, WorkerInvocation, WorkerRegistry,
    WorkerResponse,
};
use crate::config::InvokerSettings;

/// Calls registered workers with timeout and retry discipline
#[derive(Debug, Clone)]
pub struct WorkerInvoker {
    registry: Arc<WorkerRegistry>,
    soft_timeout: Duration,
    max_retries: u32,
    backoff: Duration,
}

impl WorkerInvoker {
    pub fn new(registry: Arc<WorkerRegistry>, settings: &InvokerSettings) -> Self {
        Self {
            registry,
            soft_timeout: settings.soft_timeout(),
            max_retries: settings.max_retries,
            backoff: settings.backoff(),
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Invoke `worker_name` with `payload`, giving up after `hard_timeout`
    pub async fn invoke(
        &self,
        worker_name: &str,
        payload: Value,
        hard_timeout: Duration,
    ) -> WorkerInvocation {
        let started = Instant::now();
        let attempts = AtomicU32::new(0);

        let outcome = match self.registry.get(worker_name) {
            None => {
                tracing::warn!(worker = worker_name, "Worker is not registered");
                Err(WorkerFailure::NotFound {
                    worker: worker_name.to_string(),
                })
            }
            Some(worker) => {
                let deadline = tokio::time::Instant::now() + hard_timeout;
                let attempt_loop = self.call_with_retries(worker.as_ref(), &payload, &attempts, started);
                match tokio::time::timeout_at(deadline, attempt_loop).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!(
                            worker = worker_name,
                            hard_timeout_ms = hard_timeout.as_millis() as u64,
                            attempts = attempts.load(Ordering::SeqCst),
                            "Worker call abandoned at hard timeout"
                        );
                        Err(WorkerFailure::Timeout {
                            worker: worker_name.to_string(),
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        })
                    }
                }
            }
        };

        let duration = started.elapsed();
        match &outcome {
            Ok(response) => tracing::info!(
                worker = worker_name,
                duration_ms = duration.as_millis() as u64,
                artifacts = response.artifacts.len(),
                "Worker completed"
            ),
            Err(failure) => tracing::debug!(
                worker = worker_name,
                duration_ms = duration.as_millis() as u64,
                error = %failure,
                "Worker failed"
            ),
        }

        WorkerInvocation {
            worker_name: worker_name.to_string(),
            payload,
            outcome,
            duration,
            attempts: attempts.load(Ordering::SeqCst),
        }
    }

    async fn call_with_retries(
        &self,
        worker: &dyn Worker,
        payload: &Value,
        attempts: &AtomicU32,
        started: Instant,
    ) -> Result<WorkerResponse, WorkerFailure> {
        loop {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;

            match self.call_once(worker, payload, attempt).await {
                // Application failures and malformed responses are final
                Ok(raw) => return validate_response(worker.name(), &raw),
                Err(e) if e.is_transient() && attempt <= self.max_retries => {
                    let backoff = self.backoff * attempt;
                    tracing::warn!(
                        worker = worker.name(),
                        attempt,
                        error = %e,
                        "Transient worker failure, retrying in {:?}",
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    return Err(WorkerFailure::from_transport(worker.name(), e, started.elapsed()));
                }
            }
        }
    }

    /// One transport attempt, warning once if it outlives the soft timeout
    async fn call_once(
        &self,
        worker: &dyn Worker,
        payload: &Value,
        attempt: u32,
    ) -> Result<Value, TransportError> {
        let call = worker.invoke(payload);
        tokio::pin!(call);

        tokio::select! {
            result = &mut call => return result,
            _ = tokio::time::sleep(self.soft_timeout) => {
                tracing::warn!(
                    worker = worker.name(),
                    attempt,
                    soft_timeout_ms = self.soft_timeout.as_millis() as u64,
                    "Worker call still pending"
                );
            }
        }

        call.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedWorker;
    use serde_json::json;

    fn settings() -> InvokerSettings {
        InvokerSettings {
            soft_timeout_ms: 20,
            hard_timeout_ms: 200,
            max_retries: 2,
            backoff_ms: 5,
            probe_timeout_ms: 100,
        }
    }

    fn invoker_with(worker: Arc<ScriptedWorker>) -> WorkerInvoker {
        let registry = WorkerRegistry::new().with(worker);
        WorkerInvoker::new(Arc::new(registry), &settings())
    }

    #[tokio::test]
    async fn test_unknown_worker_is_not_found() {
        let invoker = WorkerInvoker::new(Arc::new(WorkerRegistry::new()), &settings());
        let invocation = invoker.invoke("missing", json!({}), Duration::from_millis(100)).await;
        assert!(matches!(invocation.outcome, Err(WorkerFailure::NotFound { .. })));
        assert_eq!(invocation.attempts, 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let worker = Arc::new(ScriptedWorker::succeeding("terrain-analysis").fail_transport(2));
        let invoker = invoker_with(worker.clone());

        let invocation = invoker
            .invoke("terrain-analysis", json!({}), Duration::from_millis(500))
            .await;
        assert!(invocation.is_success());
        assert_eq!(invocation.attempts, 3);
        assert_eq!(worker.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let worker = Arc::new(ScriptedWorker::succeeding("terrain-analysis").fail_transport(10));
        let invoker = invoker_with(worker.clone());

        let invocation = invoker
            .invoke("terrain-analysis", json!({}), Duration::from_millis(500))
            .await;
        assert!(matches!(invocation.outcome, Err(WorkerFailure::Transport { .. })));
        assert_eq!(worker.calls(), 3);
    }

    #[tokio::test]
    async fn test_application_failure_not_retried() {
        let worker = Arc::new(ScriptedWorker::responding(
            "layout-optimization",
            json!({"success": false, "message": "solver diverged"}),
        ));
        let invoker = invoker_with(worker.clone());

        let invocation = invoker
            .invoke("layout-optimization", json!({}), Duration::from_millis(500))
            .await;
        assert!(matches!(invocation.outcome, Err(WorkerFailure::ToolFailure { .. })));
        assert_eq!(worker.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_response_not_retried() {
        let worker = Arc::new(ScriptedWorker::responding(
            "wake-simulation",
            json!({"success": true, "message": "ok", "artifacts": "none"}),
        ));
        let invoker = invoker_with(worker.clone());

        let invocation = invoker
            .invoke("wake-simulation", json!({}), Duration::from_millis(500))
            .await;
        assert!(matches!(invocation.outcome, Err(WorkerFailure::InvalidResponse { .. })));
        assert_eq!(worker.calls(), 1);
    }

    #[tokio::test]
    async fn test_hung_worker_times_out_near_bound() {
        let worker = Arc::new(ScriptedWorker::succeeding("wake-simulation").hang());
        let invoker = invoker_with(worker);
        let hard = Duration::from_millis(120);

        let invocation = invoker.invoke("wake-simulation", json!({}), hard).await;
        assert!(matches!(invocation.outcome, Err(WorkerFailure::Timeout { .. })));
        assert!(invocation.duration >= hard);
        assert!(invocation.duration < hard + Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_slow_worker_within_bound_succeeds() {
        // Slower than the soft timeout, faster than the hard one
        let worker = Arc::new(ScriptedWorker::succeeding("report-generation").delay(Duration::from_millis(50)));
        let invoker = invoker_with(worker);

        let invocation = invoker
            .invoke("report-generation", json!({}), Duration::from_millis(300))
            .await;
        assert!(invocation.is_success());
        assert_eq!(invocation.attempts, 1);
    }
}
