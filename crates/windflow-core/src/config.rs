//! Orchestrator configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::types::WorkflowStage;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindflowConfig {
    /// Session state settings
    pub session: SessionSettings,

    /// Worker invocation policy
    pub invoker: InvokerSettings,

    /// Worker endpoint per workflow stage
    pub workers: BTreeMap<WorkflowStage, WorkerEndpoint>,

    /// Reverse geocoding collaborator
    pub geocoding: GeocodingSettings,

    /// Durable storage
    pub storage: StorageSettings,
}

impl Default for WindflowConfig {
    fn default() -> Self {
        let workers = WorkflowStage::ALL
            .into_iter()
            .map(|stage| (stage, WorkerEndpoint::named(stage.key().replace('_', "-"))))
            .collect();

        Self {
            session: SessionSettings::default(),
            invoker: InvokerSettings::default(),
            workers,
            geocoding: GeocodingSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl WindflowConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hard and soft worker timeouts
    pub fn with_timeouts(mut self, soft: Duration, hard: Duration) -> Self {
        self.invoker.soft_timeout_ms = soft.as_millis() as u64;
        self.invoker.hard_timeout_ms = hard.as_millis() as u64;
        self
    }

    /// Set the transient retry budget
    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.invoker.max_retries = max_retries;
        self.invoker.backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Set the worker endpoint for a stage
    pub fn with_worker(mut self, stage: WorkflowStage, endpoint: WorkerEndpoint) -> Self {
        self.workers.insert(stage, endpoint);
        self
    }

    /// Set the database path
    pub fn with_database_path(mut self, path: impl Into<String>) -> Self {
        self.storage.database_path = path.into();
        self
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn to_file(&self, path: &str) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `WINDFLOW_*` environment overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(value) = number("WINDFLOW_SOFT_TIMEOUT_MS") {
            self.invoker.soft_timeout_ms = value;
        }
        if let Some(value) = number("WINDFLOW_HARD_TIMEOUT_MS") {
            self.invoker.hard_timeout_ms = value;
        }
        if let Some(value) = number("WINDFLOW_MAX_RETRIES") {
            self.invoker.max_retries = value as u32;
        }
        if let Some(value) = number("WINDFLOW_SESSION_TTL_SECS") {
            self.session.ttl_secs = value;
        }
        if let Some(path) = lookup("WINDFLOW_DATABASE_PATH") {
            self.storage.database_path = path;
        }
        if let Some(url) = lookup("WINDFLOW_GEOCODER_URL") {
            self.geocoding.base_url = url;
            self.geocoding.enabled = true;
        }
        for stage in WorkflowStage::ALL {
            let key = format!("WINDFLOW_WORKER_{}_URL", stage.key().to_uppercase());
            if let Some(url) = lookup(&key) {
                let name = stage.key().replace('_', "-");
                self.workers
                    .entry(stage)
                    .or_insert_with(|| WorkerEndpoint::named(name))
                    .url = Some(url);
            }
        }
        self
    }

    /// List every problem that makes this configuration unusable
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        for stage in WorkflowStage::ALL {
            match self.workers.get(&stage) {
                None => problems.push(format!("no worker configured for {}", stage)),
                Some(endpoint) if endpoint.name.trim().is_empty() => {
                    problems.push(format!("worker for {} has an empty name", stage))
                }
                Some(_) => {}
            }
        }
        if self.invoker.hard_timeout_ms == 0 {
            problems.push("invoker.hard_timeout_ms must be greater than zero".to_string());
        }
        if self.invoker.soft_timeout_ms >= self.invoker.hard_timeout_ms {
            problems.push(format!(
                "invoker.soft_timeout_ms ({}) must be below hard_timeout_ms ({})",
                self.invoker.soft_timeout_ms, self.invoker.hard_timeout_ms
            ));
        }
        if self.session.ttl_secs == 0 {
            problems.push("session.ttl_secs must be greater than zero".to_string());
        }
        if self.session.history_cap == 0 {
            problems.push("session.history_cap must be greater than zero".to_string());
        }
        if self.geocoding.enabled && self.geocoding.base_url.trim().is_empty() {
            problems.push("geocoding is enabled but geocoding.base_url is empty".to_string());
        }

        problems
    }
}

/// Session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Durable record lifetime, extended on every write
    pub ttl_secs: u64,

    /// Freshness window of the in-process cache
    pub cache_freshness_secs: u64,

    /// Maximum entries kept in a session's project history
    pub history_cap: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 7200,            // 2 hours
            cache_freshness_secs: 300, // 5 minutes
            history_cap: 10,
        }
    }
}

impl SessionSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn cache_freshness(&self) -> Duration {
        Duration::from_secs(self.cache_freshness_secs)
    }
}

/// Worker invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InvokerSettings {
    /// Log a warning when a call is still pending after this long
    pub soft_timeout_ms: u64,

    /// Abandon the call after this long
    pub hard_timeout_ms: u64,

    /// Retries for transient transport failures
    pub max_retries: u32,

    /// Base backoff between retries, multiplied by the attempt number
    pub backoff_ms: u64,

    /// Hard timeout used by diagnostic probes
    pub probe_timeout_ms: u64,
}

impl Default for InvokerSettings {
    fn default() -> Self {
        Self {
            soft_timeout_ms: 30_000,
            hard_timeout_ms: 60_000,
            max_retries: 2,
            backoff_ms: 500,
            probe_timeout_ms: 10_000,
        }
    }
}

impl InvokerSettings {
    pub fn soft_timeout(&self) -> Duration {
        Duration::from_millis(self.soft_timeout_ms)
    }

    pub fn hard_timeout(&self) -> Duration {
        Duration::from_millis(self.hard_timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Worker endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    /// Registry name of the worker
    pub name: String,

    /// HTTP endpoint (None for in-process workers)
    #[serde(default)]
    pub url: Option<String>,
}

impl WorkerEndpoint {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Geocoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocodingSettings {
    pub enabled: bool,

    /// Base URL of a Nominatim-compatible reverse geocoding service
    pub base_url: String,

    /// User agent sent with lookups
    pub user_agent: String,

    pub timeout_ms: u64,
}

impl Default for GeocodingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: format!("windflow/{}", crate::VERSION),
            timeout_ms: 3_000,
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database backing both session and project records
    pub database_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: ".windflow/windflow.db".to_string(),
        }
    }
}
