//! SQLite storage for session and project records
//!
//! One database backs both collaborators:
//! - `sessions`: opaque JSON per key with an absolute expiry timestamp
//! - `projects`: one JSON document per normalized project name

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use super::{ProjectStore, SessionStore};
use crate::project::Project;
use crate::{Result, WindflowError};

/// SQLite-backed session and project store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database in WAL mode.
    ///
    /// ```no_run
    /// use windflow_core::store::SqliteStore;
    /// let store = SqliteStore::open(".windflow/windflow.db").unwrap();
    /// ```
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.lock().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                key            TEXT PRIMARY KEY,
                record_json    TEXT NOT NULL,
                expires_at_ms  INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS projects (
                name           TEXT PRIMARY KEY,
                record_json    TEXT NOT NULL,
                updated_at_ms  INTEGER NOT NULL
            );
            ",
        )?;
        Ok(())
    }

    /// Delete expired session rows, returning how many were removed
    pub fn purge_expired_sessions(&self) -> Result<usize> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let removed = self
            .conn
            .lock()
            .execute("DELETE FROM sessions WHERE expires_at_ms <= ?1", params![now_ms])?;
        Ok(removed)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT record_json FROM sessions WHERE key = ?1 AND expires_at_ms > ?2",
                params![key, now_ms],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, record: Value, ttl: Duration) -> Result<()> {
        let ttl_ms = i64::try_from(ttl.as_millis())
            .map_err(|_| WindflowError::Internal("session ttl out of range".to_string()))?;
        let expires_at_ms = chrono::Utc::now().timestamp_millis() + ttl_ms;
        let json = serde_json::to_string(&record)?;

        self.conn.lock().execute(
            "INSERT INTO sessions (key, record_json, expires_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                record_json = excluded.record_json,
                expires_at_ms = excluded.expires_at_ms",
            params![key, json, expires_at_ms],
        )?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for SqliteStore {
    async fn get(&self, name: &str) -> Result<Option<Project>> {
        let raw: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT record_json FROM projects WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, project: &Project) -> Result<()> {
        let json = serde_json::to_string(project)?;
        let updated_at_ms = project.last_accessed_at.timestamp_millis();

        self.conn.lock().execute(
            "INSERT INTO projects (name, record_json, updated_at_ms) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
                record_json = excluded.record_json,
                updated_at_ms = excluded.updated_at_ms",
            params![project.name, json, updated_at_ms],
        )?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Project>> {
        let rows: Vec<String> = {
            let conn = self.conn.lock();
            let mut stmt = conn.prepare("SELECT record_json FROM projects ORDER BY name ASC")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        rows.iter()
            .map(|json| serde_json::from_str(json).map_err(WindflowError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Coordinates, WorkflowStage};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteStore::open(dir.path().join("windflow.db")).expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn test_session_roundtrip_and_expiry() {
        let (_dir, store) = temp_store();
        SessionStore::put(&store, "session:s1", json!({"activeProject": "a"}), Duration::from_millis(40))
            .await
            .unwrap();

        let value = SessionStore::get(&store, "session:s1").await.unwrap();
        assert_eq!(value, Some(json!({"activeProject": "a"})));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(SessionStore::get(&store, "session:s1").await.unwrap().is_none());
        assert_eq!(store.purge_expired_sessions().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_project_upsert() {
        let (_dir, store) = temp_store();
        let mut project = Project::new("Site 9", Coordinates::new(35.5, -101.4));
        ProjectStore::put(&store, &project).await.unwrap();

        project.record_stage(WorkflowStage::TerrainAnalysis, vec!["t-1".into()], &BTreeMap::new());
        ProjectStore::put(&store, &project).await.unwrap();

        let loaded = ProjectStore::get(&store, "site-9").await.unwrap().expect("stored");
        assert!(loaded.workflow_status.terrain_analysis);
        assert_eq!(ProjectStore::list(&store).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(ProjectStore::list(&store).await.unwrap().is_empty());
        assert!(ProjectStore::get(&store, "missing").await.unwrap().is_none());
    }
}
