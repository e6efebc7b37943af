//! Scripted collaborators for tests and local runs

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::geocoding::Geocoder;
use crate::types::Coordinates;
use crate::worker::{TransportError, Worker};

/// Worker with a fixed script: optional transport failures, then a response
#[derive(Debug)]
pub struct ScriptedWorker {
    name: String,
    response: Option<Value>,
    transport_failures: u32,
    delay: Option<Duration>,
    hang: bool,
    calls: AtomicU32,
    payloads: Mutex<Vec<Value>>,
}

impl ScriptedWorker {
    /// Succeeds with one artifact, echoing the requested project name
    pub fn succeeding(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response: None,
            transport_failures: 0,
            delay: None,
            hang: false,
            calls: AtomicU32::new(0),
            payloads: Mutex::new(Vec::new()),
        }
    }

    /// Always returns `response` verbatim
    pub fn responding(name: impl Into<String>, response: Value) -> Self {
        Self {
            response: Some(response),
            ..Self::succeeding(name)
        }
    }

    /// Fail the first `n` calls with a connection error
    pub fn fail_transport(mut self, n: u32) -> Self {
        self.transport_failures = n;
        self
    }

    /// Never respond
    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_payload(&self) -> Option<Value> {
        self.payloads.lock().last().cloned()
    }

    fn default_response(&self, payload: &Value) -> Value {
        let project = payload
            .get("projectName")
            .and_then(Value::as_str)
            .unwrap_or("scripted-project");
        json!({
            "success": true,
            "message": format!("{} finished for {}", self.name, project),
            "artifacts": [{
                "type": format!("{}_result", self.name.replace('-', "_")),
                "id": format!("{}-{}", self.name, self.calls()),
                "payload": {}
            }],
            "metadata": {
                "toolName": self.name,
                "projectName": project,
                "timings": {"computeMs": 1}
            }
        })
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, payload: &Value) -> Result<Value, TransportError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.payloads.lock().push(payload.clone());

        if self.hang {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if call <= self.transport_failures {
            return Err(TransportError::Connect(format!(
                "connection refused (scripted failure {})",
                call
            )));
        }

        Ok(self
            .response
            .clone()
            .unwrap_or_else(|| self.default_response(payload)))
    }
}

/// Geocoder returning a fixed label
#[derive(Debug, Clone, Default)]
pub struct StaticGeocoder {
    label: Option<String>,
}

impl StaticGeocoder {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
        }
    }

    /// A geocoder whose lookups always fail
    pub fn unavailable() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn reverse_geocode(&self, _coords: Coordinates) -> Option<String> {
        self.label.clone()
    }
}
