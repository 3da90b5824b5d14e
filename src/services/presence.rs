//! Viewer presence: record sightings and answer "how many are watching".

use crate::error::AppResult;
use crate::models::{Identity, Presence};
use crate::repositories::PresenceStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Presence operations over whichever store was selected at startup.
#[derive(Clone)]
pub struct PresenceService {
    store: Arc<dyn PresenceStore>,
    window: Duration,
}

impl PresenceService {
    pub fn new(store: Arc<dyn PresenceStore>, window: Duration) -> Self {
        Self { store, window }
    }

    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    /// The configured "active viewer" window.
    pub fn window(&self) -> Duration {
        self.window
    }

    #[instrument(skip(self, identity), fields(backend = self.store.name(), key = %identity.key_hex()))]
    pub async fn record(&self, identity: &Identity) -> AppResult<Presence> {
        identity.validate()?;
        let presence = self.store.upsert(identity).await?;
        debug!(first_seen = %presence.first_seen, "presence recorded");
        Ok(presence)
    }

    /// Viewers active within the configured window.
    pub async fn active_count(&self) -> AppResult<i64> {
        self.count(self.window).await
    }

    #[instrument(skip(self), fields(backend = self.store.name()))]
    pub async fn count(&self, window: Duration) -> AppResult<i64> {
        let viewers = self.store.count(window).await?;
        debug!(viewers, "counted viewers");
        Ok(viewers)
    }

    #[instrument(skip(self), fields(backend = self.store.name()))]
    pub async fn prune(&self, retention: Duration) -> AppResult<u64> {
        let removed = self.store.prune(retention).await?;
        if removed > 0 {
            info!(removed, "pruned stale presence");
        }
        Ok(removed)
    }

    pub async fn fetch(&self, key: &[u8]) -> AppResult<Presence> {
        self.store.fetch(key).await
    }
}
