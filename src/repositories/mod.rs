//! Presence storage: one capability trait, one implementation per backend.
//!
//! Every backend answers the same sliding-window questions with its own
//! primitives: timestamp predicates (Postgres, see [`crate::db`]), an append-only
//! log with TTLs (Cassandra), sorted-set score ranges (Redis), or a map in memory.

pub mod cassandra_repo;
pub mod memory_repo;
pub mod redis_repo;

pub use cassandra_repo::CassandraPresenceStore;
pub use memory_repo::MemoryPresenceStore;
pub use redis_repo::RedisPresenceStore;

use crate::error::AppResult;
use crate::models::{Identity, Presence};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Record a sighting of `identity`. Repeated sightings never inflate [`count`](Self::count).
    async fn upsert(&self, identity: &Identity) -> AppResult<Presence>;

    /// Number of distinct identities seen within `window` of now.
    async fn count(&self, window: Duration) -> AppResult<i64>;

    /// Delete records last seen more than `retention` ago. Returns how many went away.
    async fn prune(&self, retention: Duration) -> AppResult<u64>;

    /// Latest presence for a key, or `NotFound`.
    async fn fetch(&self, key: &[u8]) -> AppResult<Presence>;
}
