//! Durable store collaborators
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │ SessionStore │   │ ProjectStore │
//! │ key → JSON   │   │ name → Project│
//! │ TTL per put  │   │ no TTL        │
//! └──────┬───────┘   └──────┬───────┘
//!        └────────┬─────────┘
//!       MemoryStores │ SqliteStore
//! ```
//!
//! Session records are opaque JSON blobs; the adapter in [`crate::session`]
//! owns their shape. A record whose TTL elapsed reads as absent.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::project::Project;
use crate::Result;

pub mod memory;
pub mod sqlite;

pub use memory::{MemoryProjectStore, MemorySessionStore};
pub use sqlite::SqliteStore;

/// Key-value store with per-record TTL
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Write a record; the TTL restarts on every put
    async fn put(&self, key: &str, record: Value, ttl: Duration) -> Result<()>;
}

/// Object store for project records keyed by normalized name
#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<Project>>;

    async fn put(&self, project: &Project) -> Result<()>;

    /// All stored projects, ordered by name
    async fn list(&self) -> Result<Vec<Project>>;
}
