//! Periodic eviction of presence records older than the retention horizon.

use crate::services::presence::PresenceService;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Pruner {
    service: PresenceService,
    retention: Duration,
    interval: Duration,
}

impl Pruner {
    pub fn new(service: PresenceService, retention: Duration, interval: Duration) -> Self {
        Self {
            service,
            retention,
            interval,
        }
    }

    /// One pass. Errors are logged; the next tick tries again.
    pub async fn prune_once(&self) -> Option<u64> {
        match self.service.prune(self.retention).await {
            Ok(removed) => Some(removed),
            Err(e) => {
                warn!(error = %e, "prune failed, retrying next cycle");
                None
            }
        }
    }

    pub async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            retention_secs = self.retention.as_secs(),
            interval_secs = self.interval.as_secs(),
            "pruner started"
        );
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    self.prune_once().await;
                }
            }
        }
        info!("pruner stopped");
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identity;
    use crate::repositories::{MemoryPresenceStore, PresenceStore};
    use crate::services::clock::ManualClock;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    #[tokio::test]
    async fn prune_once_evicts_only_stale_records() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(MemoryPresenceStore::new(clock.clone()));
        store.upsert(&Identity::fingerprint("10.0.0.1", "old")).await.unwrap();
        clock.advance(Duration::from_secs(90));
        store.upsert(&Identity::fingerprint("10.0.0.2", "new")).await.unwrap();

        let svc = PresenceService::new(store.clone(), Duration::from_secs(25));
        let pruner = Pruner::new(svc, Duration::from_secs(60), Duration::from_secs(60));
        assert_eq!(pruner.prune_once().await, Some(1));
        assert_eq!(store.len(), 1);
        assert_eq!(pruner.prune_once().await, Some(0));
    }

    #[tokio::test]
    async fn run_exits_on_cancel() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = Arc::new(MemoryPresenceStore::new(clock));
        let svc = PresenceService::new(store, Duration::from_secs(25));
        let token = CancellationToken::new();
        let handle = Pruner::new(svc, Duration::from_secs(60), Duration::from_millis(10))
            .spawn(token.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("pruner did not stop")
            .unwrap();
    }
}
