//! In-memory stores, used by tests and single-process deployments.
//!
//! Both stores can be switched into an unavailable state to exercise the
//! degraded paths of the session adapter and the resolver.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{ProjectStore, SessionStore};
use crate::project::Project;
use crate::{Result, WindflowError};

#[derive(Debug, Clone)]
struct StoredRecord {
    value: Value,
    expires_at: DateTime<Utc>,
}

/// TTL-aware session record store
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    records: RwLock<HashMap<String, StoredRecord>>,
    unavailable: AtomicBool,
    puts: AtomicUsize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful writes
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Read a record bypassing availability checks
    pub fn peek(&self, key: &str) -> Option<Value> {
        let records = self.records.read();
        records
            .get(key)
            .filter(|r| r.expires_at > Utc::now())
            .map(|r| r.value.clone())
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(WindflowError::StoreUnavailable(
                "session store is unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.check_available()?;
        let now = Utc::now();
        let mut records = self.records.write();
        match records.get(key) {
            Some(record) if record.expires_at > now => Ok(Some(record.value.clone())),
            Some(_) => {
                records.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, record: Value, ttl: Duration) -> Result<()> {
        self.check_available()?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| WindflowError::Internal(format!("invalid ttl: {}", e)))?;
        self.records.write().insert(
            key.to_string(),
            StoredRecord {
                value: record,
                expires_at: Utc::now() + ttl,
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Project record store
#[derive(Debug, Default)]
pub struct MemoryProjectStore {
    projects: RwLock<BTreeMap<String, Project>>,
    unavailable: AtomicBool,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing projects
    pub fn with_projects(projects: impl IntoIterator<Item = Project>) -> Self {
        let store = Self::new();
        {
            let mut map = store.projects.write();
            for project in projects {
                map.insert(project.name.clone(), project);
            }
        }
        store
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.projects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(WindflowError::StoreUnavailable(
                "project store is unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for MemoryProjectStore {
    async fn get(&self, name: &str) -> Result<Option<Project>> {
        self.check_available()?;
        Ok(self.projects.read().get(name).cloned())
    }

    async fn put(&self, project: &Project) -> Result<()> {
        self.check_available()?;
        self.projects
            .write()
            .insert(project.name.clone(), project.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Project>> {
        self.check_available()?;
        Ok(self.projects.read().values().cloned().collect())
    }
}
