//! Session context and the cache-aside session adapter
//!
//! The durable [`SessionStore`] is authoritative. [`SessionCache`] keeps a
//! per-instance copy of recently read contexts to cut read latency and to keep
//! a session usable when the durable store is down. It never returns an error.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SessionSettings;
use crate::store::SessionStore;

/// Per-conversation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub session_id: String,

    pub user_id: String,

    pub active_project: Option<String>,

    /// Most-recent-first, no duplicates
    #[serde(default)]
    pub project_history: Vec<String>,

    pub last_updated: DateTime<Utc>,

    pub ttl_secs: u64,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>, ttl: Duration) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            active_project: None,
            project_history: Vec::new(),
            last_updated: Utc::now(),
            ttl_secs: ttl.as_secs(),
        }
    }

    /// Move `name` to the front of the history, keeping at most `cap` entries
    pub fn push_history(&mut self, name: &str, cap: usize) {
        self.project_history.retain(|existing| existing != name);
        self.project_history.insert(0, name.to_string());
        self.project_history.truncate(cap);
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }
}

fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

#[derive(Debug, Clone)]
struct CacheEntry {
    context: SessionContext,
    cached_at: Instant,
    record_expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.record_expires_at
    }

    fn is_fresh(&self, freshness: Duration, now: DateTime<Utc>) -> bool {
        !self.is_expired(now) && self.cached_at.elapsed() < freshness
    }
}

/// Cache-aside adapter over a durable session store
pub struct SessionCache {
    store: Arc<dyn SessionStore>,
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    freshness: Duration,
    history_cap: usize,
}

impl std::fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCache")
            .field("ttl", &self.ttl)
            .field("freshness", &self.freshness)
            .field("history_cap", &self.history_cap)
            .finish_non_exhaustive()
    }
}

impl SessionCache {
    pub fn new(
        store: Arc<dyn SessionStore>,
        ttl: Duration,
        freshness: Duration,
        history_cap: usize,
    ) -> Self {
        Self {
            store,
            entries: RwLock::new(HashMap::new()),
            ttl,
            freshness,
            history_cap: history_cap.max(1),
        }
    }

    pub fn from_settings(store: Arc<dyn SessionStore>, settings: &SessionSettings) -> Self {
        Self::new(
            store,
            settings.ttl(),
            settings.cache_freshness(),
            settings.history_cap,
        )
    }

    pub fn history_cap(&self) -> usize {
        self.history_cap
    }

    /// Read a session, creating an empty context when none exists
    pub async fn get(&self, session_id: &str, user_id: &str) -> SessionContext {
        let now = Utc::now();
        if let Some(context) = self.cached(session_id, |entry| entry.is_fresh(self.freshness, now)) {
            return context;
        }

        match self.store.get(&session_key(session_id)).await {
            Ok(Some(value)) => match serde_json::from_value::<SessionContext>(value) {
                Ok(context) if self.record_expiry(&context) > now => {
                    self.remember(context.clone());
                    context
                }
                Ok(_) => {
                    self.invalidate(session_id);
                    self.empty(session_id, user_id)
                }
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "Discarding unreadable session record");
                    self.invalidate(session_id);
                    self.empty(session_id, user_id)
                }
            },
            Ok(None) => {
                self.invalidate(session_id);
                self.empty(session_id, user_id)
            }
            Err(e) => {
                // Stale entries beyond the freshness window are still served,
                // but never past the record's own TTL.
                match self.cached(session_id, |entry| !entry.is_expired(now)) {
                    Some(context) => {
                        tracing::warn!(
                            session_id,
                            error = %e,
                            "Session store unavailable, serving cached session"
                        );
                        context
                    }
                    None => {
                        tracing::warn!(
                            session_id,
                            error = %e,
                            "Session store unavailable, using ephemeral session"
                        );
                        self.empty(session_id, user_id)
                    }
                }
            }
        }
    }

    /// Make `name` the session's active project
    pub async fn set_active_project(
        &self,
        session_id: &str,
        user_id: &str,
        name: &str,
    ) -> SessionContext {
        let mut context = self.get(session_id, user_id).await;
        context.active_project = Some(name.to_string());
        self.write_through(context).await
    }

    /// Move `name` to the front of the session's project history
    pub async fn add_to_history(&self, session_id: &str, user_id: &str, name: &str) -> SessionContext {
        let mut context = self.get(session_id, user_id).await;
        context.push_history(name, self.history_cap);
        self.write_through(context).await
    }

    async fn write_through(&self, mut context: SessionContext) -> SessionContext {
        context.touch();
        context.ttl_secs = self.ttl.as_secs();
        let session_id = context.session_id.clone();

        let persisted = match serde_json::to_value(&context) {
            Ok(value) => self
                .store
                .put(&session_key(&session_id), value, self.ttl)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match persisted {
            Ok(()) => self.invalidate(&session_id),
            Err(error) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %error,
                    "Session write not durable, keeping change in local cache only"
                );
                self.remember(context.clone());
            }
        }

        context
    }

    /// Drop any cached copy of a session
    pub fn invalidate(&self, session_id: &str) {
        self.entries.write().remove(session_id);
    }

    fn cached(
        &self,
        session_id: &str,
        usable: impl Fn(&CacheEntry) -> bool,
    ) -> Option<SessionContext> {
        let entries = self.entries.read();
        entries
            .get(session_id)
            .filter(|entry| usable(entry))
            .map(|entry| entry.context.clone())
    }

    fn remember(&self, context: SessionContext) {
        let entry = CacheEntry {
            record_expires_at: self.record_expiry(&context),
            cached_at: Instant::now(),
            context,
        };
        let now = Utc::now();
        let mut entries = self.entries.write();
        entries.retain(|_, cached| !cached.is_expired(now));
        entries.insert(entry.context.session_id.clone(), entry);
    }

    fn record_expiry(&self, context: &SessionContext) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        context.last_updated + ttl
    }

    fn empty(&self, session_id: &str, user_id: &str) -> SessionContext {
        SessionContext::new(session_id, user_id, self.ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemorySessionStore;

    fn cache_with(store: Arc<MemorySessionStore>, ttl: Duration) -> SessionCache {
        SessionCache::new(store, ttl, Duration::from_secs(300), 3)
    }

    #[test]
    fn test_history_moves_to_front_and_caps() {
        let mut context = SessionContext::new("s", "u", Duration::from_secs(60));
        for name in ["a", "b", "c", "a", "d"] {
            context.push_history(name, 3);
        }
        assert_eq!(context.project_history, vec!["d", "a", "c"]);
    }

    #[tokio::test]
    async fn test_get_creates_empty_context() {
        let store = Arc::new(MemorySessionStore::new());
        let cache = cache_with(store.clone(), Duration::from_secs(60));

        let context = cache.get("s1", "u1").await;
        assert_eq!(context.session_id, "s1");
        assert!(context.active_project.is_none());
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_writes_are_durable_and_invalidate_cache() {
        let store = Arc::new(MemorySessionStore::new());
        let cache = cache_with(store.clone(), Duration::from_secs(60));

        cache.set_active_project("s1", "u1", "site-9").await;
        cache.add_to_history("s1", "u1", "site-9").await;

        assert_eq!(store.put_count(), 2);
        assert!(cache.entries.read().get("s1").is_none());

        let context = cache.get("s1", "u1").await;
        assert_eq!(context.active_project.as_deref(), Some("site-9"));
        assert_eq!(context.project_history, vec!["site-9"]);
        assert!(store.peek("session:s1").is_some());
    }

    #[tokio::test]
    async fn test_durable_failure_keeps_local_state() {
        let store = Arc::new(MemorySessionStore::new());
        let cache = cache_with(store.clone(), Duration::from_secs(60));
        store.set_unavailable(true);

        cache.set_active_project("s1", "u1", "site-9").await;
        let context = cache.get("s1", "u1").await;

        assert_eq!(context.active_project.as_deref(), Some("site-9"));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_store_outage_serves_stale_cache() {
        let store = Arc::new(MemorySessionStore::new());
        let cache = SessionCache::new(store.clone(), Duration::from_secs(60), Duration::ZERO, 3);

        cache.set_active_project("s1", "u1", "site-9").await;
        // Populate the cache from the durable record, then lose the store.
        cache.get("s1", "u1").await;
        store.set_unavailable(true);

        let context = cache.get("s1", "u1").await;
        assert_eq!(context.active_project.as_deref(), Some("site-9"));
    }

    #[tokio::test]
    async fn test_expired_entries_are_purged() {
        let store = Arc::new(MemorySessionStore::new());
        let cache = cache_with(store.clone(), Duration::from_millis(80));

        for session in ["s1", "s2", "s3"] {
            cache.set_active_project(session, "u1", "site-9").await;
            cache.get(session, "u1").await;
        }
        assert_eq!(cache.entries.read().len(), 3);

        tokio::time::sleep(Duration::from_millis(150)).await;
        cache.set_active_project("s4", "u1", "site-9").await;
        cache.get("s4", "u1").await;

        let entries = cache.entries.read();
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("s4"));
    }

    #[tokio::test]
    async fn test_expired_record_is_absent_even_when_cached() {
        let store = Arc::new(MemorySessionStore::new());
        let cache = cache_with(store.clone(), Duration::from_millis(80));

        cache.set_active_project("s1", "u1", "site-9").await;
        assert!(cache.get("s1", "u1").await.active_project.is_some());
        assert!(cache.entries.read().get("s1").is_some());

        tokio::time::sleep(Duration::from_millis(150)).await;
        store.set_unavailable(true);

        let context = cache.get("s1", "u1").await;
        assert!(context.active_project.is_none());
    }
}
