//! In-process presence store with the same semantics as the Redis sorted set.

use crate::error::{AppError, AppResult};
use crate::models::identity::validate_key;
use crate::models::presence::to_chrono;
use crate::models::{Identity, Presence};
use crate::repositories::PresenceStore;
use crate::services::clock::Clock;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Holds at most one entry per key, so repeated sightings deduplicate naturally.
#[derive(Debug)]
pub struct MemoryPresenceStore {
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<Vec<u8>, Presence>>,
}

impl MemoryPresenceStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, identity: &Identity) -> AppResult<Presence> {
        identity.validate()?;
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let entry = entries
            .entry(identity.key.clone())
            .and_modify(|p| p.last_seen = now.max(p.last_seen))
            .or_insert_with(|| Presence::new(identity.key.clone(), now, now));
        Ok(entry.clone())
    }

    async fn count(&self, window: Duration) -> AppResult<i64> {
        let now = self.clock.now();
        let n = self
            .entries
            .read()
            .values()
            .filter(|p| p.is_active(now, window))
            .count();
        Ok(n as i64)
    }

    async fn prune(&self, retention: Duration) -> AppResult<u64> {
        let cutoff = self.clock.now() - to_chrono(retention);
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, p| p.last_seen >= cutoff);
        Ok((before - entries.len()) as u64)
    }

    async fn fetch(&self, key: &[u8]) -> AppResult<Presence> {
        validate_key(key)?;
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("presence {}", hex::encode(key))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::ManualClock;
    use chrono::{TimeZone, Utc};

    fn store() -> (Arc<ManualClock>, MemoryPresenceStore) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 20, 0, 0).unwrap(),
        ));
        let store = MemoryPresenceStore::new(clock.clone());
        (clock, store)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test]
    async fn empty_store_counts_zero() {
        let (_, store) = store();
        assert_eq!(store.count(secs(60)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn repeated_sightings_count_once() {
        let (clock, store) = store();
        let a = Identity::fingerprint("10.0.0.1", "ua-a");
        let b = Identity::fingerprint("10.0.0.2", "ua-b");
        store.upsert(&a).await.unwrap();
        clock.advance(secs(3));
        store.upsert(&b).await.unwrap();
        clock.advance(secs(3));
        store.upsert(&a).await.unwrap();
        assert_eq!(store.count(secs(60)).await.unwrap(), 2);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn upsert_keeps_first_seen_and_moves_last_seen() {
        let (clock, store) = store();
        let a = Identity::fingerprint("10.0.0.1", "ua");
        let first = store.upsert(&a).await.unwrap();
        clock.advance(secs(10));
        let second = store.upsert(&a).await.unwrap();
        assert_eq!(second.first_seen, first.first_seen);
        assert_eq!(second.last_seen, clock.now());
        assert_eq!(store.fetch(&a.key).await.unwrap(), second);
    }

    #[tokio::test]
    async fn window_slides_with_the_clock() {
        let (clock, store) = store();
        let a = Identity::fingerprint("10.0.0.1", "ua");
        store.upsert(&a).await.unwrap();
        clock.advance(secs(5));
        assert_eq!(store.count(secs(30)).await.unwrap(), 1);
        clock.advance(secs(30));
        assert_eq!(store.count(secs(30)).await.unwrap(), 0);
        assert_eq!(store.count(secs(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn prune_then_count_scenario() {
        let (clock, store) = store();
        let a = Identity::fingerprint("10.0.0.1", "ua");
        store.upsert(&a).await.unwrap();
        clock.advance(secs(5));
        assert_eq!(store.count(secs(30)).await.unwrap(), 1);
        clock.advance(secs(35));
        assert_eq!(store.prune(secs(30)).await.unwrap(), 1);
        clock.advance(secs(1));
        assert_eq!(store.count(secs(30)).await.unwrap(), 0);
        assert!(matches!(store.fetch(&a.key).await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn prune_keeps_recent_records() {
        let (clock, store) = store();
        let old = Identity::fingerprint("10.0.0.1", "old");
        let fresh = Identity::fingerprint("10.0.0.2", "fresh");
        store.upsert(&old).await.unwrap();
        clock.advance(secs(100));
        store.upsert(&fresh).await.unwrap();
        clock.advance(secs(10));
        assert_eq!(store.prune(secs(60)).await.unwrap(), 1);
        assert_eq!(store.count(secs(30)).await.unwrap(), 1);
        assert!(store.fetch(&fresh.key).await.is_ok());
        assert_eq!(store.prune(secs(60)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn invalid_identity_is_rejected() {
        let (_, store) = store();
        let mut id = Identity::fingerprint("10.0.0.1", "ua");
        id.key.clear();
        assert!(matches!(
            store.upsert(&id).await,
            Err(AppError::InvalidIdentity(_))
        ));
        assert!(store.is_empty());
    }
}
