//! Redis presence store: a sorted set of identity keys scored by last sighting.

use crate::error::{AppError, AppResult};
use crate::models::identity::validate_key;
use crate::models::presence::to_chrono;
use crate::models::{Identity, Presence};
use crate::repositories::PresenceStore;
use crate::services::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_NAMESPACE: &str = "televise";

/// Sorted set `<ns>:presence:seen` (member = hex key, score = unix nanos of last sighting)
/// plus hash `<ns>:presence:first` (member -> unix nanos of first sighting).
#[derive(Clone)]
pub struct RedisPresenceStore {
    conn: ConnectionManager,
    clock: Arc<dyn Clock>,
    seen_key: String,
    first_key: String,
}

/// Sorted-set scores are doubles, so these are exact only to a few hundred ns today.
fn nanos(t: DateTime<Utc>) -> i64 {
    t.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn from_nanos(n: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(n)
}

impl RedisPresenceStore {
    /// Connect to Redis. The connection manager reconnects on its own and is shared by clones.
    pub async fn connect(redis_url: &str, clock: Arc<dyn Clock>) -> Result<Self, AppError> {
        Self::connect_with_namespace(redis_url, DEFAULT_NAMESPACE, clock).await
    }

    pub async fn connect_with_namespace(
        redis_url: &str,
        namespace: &str,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        info!(namespace = %namespace, "connected to redis");
        Ok(Self {
            conn,
            clock,
            seen_key: format!("{}:presence:seen", namespace),
            first_key: format!("{}:presence:first", namespace),
        })
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn upsert(&self, identity: &Identity) -> AppResult<Presence> {
        identity.validate()?;
        let now = self.clock.now();
        let score = nanos(now);
        let member = identity.key_hex();
        let mut conn = self.conn.clone();
        let (first,): (Option<i64>,) = redis::pipe()
            .atomic()
            .hset_nx(&self.first_key, &member, score)
            .ignore()
            .zadd(&self.seen_key, &member, score)
            .ignore()
            .hget(&self.first_key, &member)
            .query_async(&mut conn)
            .await?;
        let first_seen = first.map(from_nanos).unwrap_or(now);
        Ok(Presence::new(identity.key.clone(), first_seen, now))
    }

    async fn count(&self, window: Duration) -> AppResult<i64> {
        let min = nanos(self.clock.now() - to_chrono(window));
        let mut conn = self.conn.clone();
        let n: i64 = conn.zcount(&self.seen_key, min, "+inf").await?;
        Ok(n)
    }

    async fn prune(&self, retention: Duration) -> AppResult<u64> {
        let max = format!("({}", nanos(self.clock.now() - to_chrono(retention)));
        let mut conn = self.conn.clone();
        let stale: Vec<String> = conn.zrangebyscore(&self.seen_key, "-inf", &max).await?;
        if stale.is_empty() {
            return Ok(0);
        }
        // A member refreshed between the read and this pipeline keeps its score;
        // it only loses its first-seen entry, which the next sighting re-creates.
        let (removed,): (u64,) = redis::pipe()
            .atomic()
            .zrembyscore(&self.seen_key, "-inf", &max)
            .hdel(&self.first_key, &stale)
            .ignore()
            .query_async(&mut conn)
            .await?;
        debug!(removed, "pruned redis presence");
        Ok(removed)
    }

    async fn fetch(&self, key: &[u8]) -> AppResult<Presence> {
        validate_key(key)?;
        let member = hex::encode(key);
        let mut conn = self.conn.clone();
        let (score, first): (Option<f64>, Option<i64>) = redis::pipe()
            .zscore(&self.seen_key, &member)
            .hget(&self.first_key, &member)
            .query_async(&mut conn)
            .await?;
        let last_seen = score
            .map(|s| from_nanos(s as i64))
            .ok_or_else(|| AppError::NotFound(format!("presence {}", member)))?;
        let first_seen = first.map(from_nanos).unwrap_or(last_seen);
        Ok(Presence::new(key.to_vec(), first_seen, last_seen))
    }
}
