//! PostgreSQL implementations of the presence store and title source.

use crate::error::AppResult;
use crate::models::{Identity, Presence};
use crate::repositories::PresenceStore;
use crate::services::poller::TitleSource;
use crate::services::snowflake::SnowflakeGenerator;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{repositories as repo, DbPool, SessionRow};

impl From<SessionRow> for Presence {
    fn from(row: SessionRow) -> Self {
        Presence::new(row.key, row.first_seen, row.last_seen)
    }
}

/// One row per session; a session stays open while sightings keep arriving within
/// `inactive_limit`. Windows are evaluated against the database server clock.
#[derive(Clone)]
pub struct PgPresenceStore {
    pool: DbPool,
    ids: Arc<SnowflakeGenerator>,
    inactive_limit: Duration,
}

impl PgPresenceStore {
    pub fn new(pool: DbPool, ids: Arc<SnowflakeGenerator>, inactive_limit: Duration) -> Self {
        Self {
            pool,
            ids,
            inactive_limit,
        }
    }
}

#[async_trait]
impl PresenceStore for PgPresenceStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn upsert(&self, identity: &Identity) -> AppResult<Presence> {
        identity.validate()?;
        let row = repo::session_upsert(&self.pool, &self.ids, identity, self.inactive_limit).await?;
        Ok(row.into())
    }

    async fn count(&self, window: Duration) -> AppResult<i64> {
        repo::session_count(&self.pool, window).await
    }

    async fn prune(&self, retention: Duration) -> AppResult<u64> {
        repo::session_prune(&self.pool, retention).await
    }

    async fn fetch(&self, key: &[u8]) -> AppResult<Presence> {
        crate::models::identity::validate_key(key)?;
        Ok(repo::session_fetch(&self.pool, key).await?.into())
    }
}

/// Reads the display title from the `metadata` table.
#[derive(Clone)]
pub struct PgTitleSource {
    pool: DbPool,
}

impl PgTitleSource {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TitleSource for PgTitleSource {
    async fn display_title(&self) -> AppResult<Option<String>> {
        repo::metadata_display_title(&self.pool).await
    }
}
