//! Cassandra/Scylla presence store: an append-only visit log per identity.
//!
//! Every sighting appends one row with a TTL equal to the retention horizon, so the
//! log bounds itself even if pruning never runs. Counting scans the recent tail of
//! every partition and deduplicates keys on the client.

use crate::error::{AppError, AppResult};
use crate::models::identity::validate_key;
use crate::models::presence::to_chrono;
use crate::models::{Identity, Presence};
use crate::repositories::PresenceStore;
use crate::services::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use scylla::{Session, SessionBuilder};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const PRUNE_CONCURRENCY: usize = 16;

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS presence_log (
        key blob,
        seen_at bigint,
        addr text,
        user_agent text,
        PRIMARY KEY ((key), seen_at)
    ) WITH CLUSTERING ORDER BY (seen_at DESC)
"#;

const INSERT_VISIT: &str =
    "INSERT INTO presence_log (key, seen_at, addr, user_agent) VALUES (?, ?, ?, ?) USING TTL ?";
const SELECT_RECENT_KEYS: &str = "SELECT key FROM presence_log WHERE seen_at > ? ALLOW FILTERING";
const SELECT_STALE_KEYS: &str = "SELECT key FROM presence_log WHERE seen_at < ? ALLOW FILTERING";
const DELETE_STALE: &str = "DELETE FROM presence_log WHERE key = ? AND seen_at < ?";
const SELECT_SPAN: &str = "SELECT MIN(seen_at), MAX(seen_at) FROM presence_log WHERE key = ?";

fn millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> AppResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| AppError::CqlRows(format!("seen_at out of range: {}", ms)))
}

fn row_error(e: impl std::fmt::Display) -> AppError {
    AppError::CqlRows(e.to_string())
}

#[derive(Clone)]
pub struct CassandraPresenceStore {
    session: Arc<Session>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl CassandraPresenceStore {
    /// Connect, create the keyspace/table if needed, and switch to the keyspace.
    /// `ttl` should match the pruning retention.
    pub async fn connect(
        nodes: &[String],
        keyspace: &str,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        if keyspace.is_empty()
            || !keyspace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(AppError::Config(format!("invalid keyspace {:?}", keyspace)));
        }

        let mut builder = SessionBuilder::new();
        for node in nodes {
            builder = builder.known_node(node);
        }
        let session = builder.build().await?;

        session
            .query(
                format!(
                    "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
                     {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
                    keyspace
                ),
                (),
            )
            .await?;
        session.use_keyspace(keyspace, false).await?;
        session.query(CREATE_TABLE, ()).await?;
        info!(keyspace = %keyspace, nodes = nodes.len(), "connected to cassandra");

        Ok(Self {
            session: Arc::new(session),
            clock,
            ttl,
        })
    }

    fn ttl_secs(&self) -> i32 {
        self.ttl.as_secs().clamp(1, i32::MAX as u64) as i32
    }

    async fn keys_where(&self, query: &'static str, cutoff: i64) -> AppResult<HashSet<Vec<u8>>> {
        self.session
            .query_iter(query, (cutoff,))
            .await?
            .into_typed::<(Vec<u8>,)>()
            .map_ok(|(key,)| key)
            .try_collect()
            .await
            .map_err(row_error)
    }

    async fn span(&self, key: &[u8]) -> AppResult<(Option<i64>, Option<i64>)> {
        self.session
            .query(SELECT_SPAN, (key.to_vec(),))
            .await?
            .single_row_typed::<(Option<i64>, Option<i64>)>()
            .map_err(row_error)
    }
}

#[async_trait]
impl PresenceStore for CassandraPresenceStore {
    fn name(&self) -> &'static str {
        "cassandra"
    }

    async fn upsert(&self, identity: &Identity) -> AppResult<Presence> {
        identity.validate()?;
        let now = self.clock.now();
        self.session
            .query(
                INSERT_VISIT,
                (
                    identity.key.clone(),
                    millis(now),
                    identity.address.clone(),
                    identity.user_agent.clone(),
                    self.ttl_secs(),
                ),
            )
            .await?;
        let first_seen = match self.span(&identity.key).await? {
            (Some(first), _) => from_millis(first)?,
            (None, _) => now,
        };
        Ok(Presence::new(identity.key.clone(), first_seen, now))
    }

    async fn count(&self, window: Duration) -> AppResult<i64> {
        let cutoff = millis(self.clock.now() - to_chrono(window));
        let keys = self.keys_where(SELECT_RECENT_KEYS, cutoff).await?;
        Ok(keys.len() as i64)
    }

    async fn prune(&self, retention: Duration) -> AppResult<u64> {
        let cutoff = millis(self.clock.now() - to_chrono(retention));
        let stale = self.keys_where(SELECT_STALE_KEYS, cutoff).await?;
        let partitions = stale.len() as u64;
        let session = &self.session;
        let _: Vec<_> = stream::iter(stale)
            .map(|key| async move { session.query(DELETE_STALE, (key, cutoff)).await })
            .buffer_unordered(PRUNE_CONCURRENCY)
            .try_collect()
            .await?;
        debug!(partitions, "pruned cassandra presence log");
        Ok(partitions)
    }

    async fn fetch(&self, key: &[u8]) -> AppResult<Presence> {
        validate_key(key)?;
        match self.span(key).await? {
            (Some(first), Some(last)) => Ok(Presence::new(
                key.to_vec(),
                from_millis(first)?,
                from_millis(last)?,
            )),
            _ => Err(AppError::NotFound(format!("presence {}", hex::encode(key)))),
        }
    }
}
