//! Background refresh of the cached viewer count (and display title).
//!
//! Request handlers read the latest [`ViewerSnapshot`] from a single-slot
//! `watch` channel instead of hitting storage. A failed refresh keeps the
//! previous values, so readers see at most one interval of staleness while the
//! backend is healthy and a frozen value while it is not.

use crate::error::{AppError, AppResult};
use crate::services::clock::Clock;
use crate::services::presence::PresenceService;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the display title comes from (the operator-managed metadata store).
#[async_trait]
pub trait TitleSource: Send + Sync {
    /// `Ok(None)` when the entry exists without a value, `NotFound` when it does not exist.
    /// Only `Ok(None)` clears the cached title.
    async fn display_title(&self) -> AppResult<Option<String>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewerSnapshot {
    pub viewers: i64,
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Cheap, cloneable read handle on the latest snapshot.
#[derive(Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<ViewerSnapshot>,
}

impl SnapshotReader {
    pub fn current(&self) -> ViewerSnapshot {
        self.rx.borrow().clone()
    }
}

pub struct PresencePoller {
    service: PresenceService,
    titles: Option<Arc<dyn TitleSource>>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    tx: watch::Sender<ViewerSnapshot>,
}

impl PresencePoller {
    pub fn new(
        service: PresenceService,
        titles: Option<Arc<dyn TitleSource>>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> (Self, SnapshotReader) {
        let (tx, rx) = watch::channel(ViewerSnapshot::default());
        (
            Self {
                service,
                titles,
                clock,
                interval,
                tx,
            },
            SnapshotReader { rx },
        )
    }

    /// One refresh cycle.
    pub async fn refresh(&self) {
        let viewers = match self.service.active_count().await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(error = %e, "viewer count refresh failed, keeping previous value");
                None
            }
        };

        let title = match &self.titles {
            None => None,
            Some(source) => match source.display_title().await {
                Ok(t) => Some(t),
                Err(AppError::NotFound(what)) => {
                    debug!(missing = %what, "no display title entry, keeping previous value");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "title refresh failed, keeping previous value");
                    None
                }
            },
        };

        let refreshed = viewers.map(|_| self.clock.now());
        self.tx.send_modify(|snap| {
            if let Some(n) = viewers {
                snap.viewers = n;
            }
            if let Some(t) = title {
                snap.title = t;
            }
            if let Some(at) = refreshed {
                snap.refreshed_at = Some(at);
            }
        });
        debug!(viewers = ?viewers, "snapshot refreshed");
    }

    /// Refresh immediately, then every interval, until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "presence poller started");
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => self.refresh().await,
            }
        }
        info!("presence poller stopped");
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Identity, Presence};
    use crate::repositories::{MemoryPresenceStore, PresenceStore};
    use crate::services::clock::ManualClock;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose reads can be switched to fail.
    struct FlakyStore {
        inner: MemoryPresenceStore,
        down: AtomicBool,
    }

    #[async_trait]
    impl PresenceStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }
        async fn upsert(&self, identity: &Identity) -> AppResult<Presence> {
            self.inner.upsert(identity).await
        }
        async fn count(&self, window: Duration) -> AppResult<i64> {
            if self.down.load(Ordering::SeqCst) {
                return Err(AppError::Db(sqlx::Error::PoolTimedOut));
            }
            self.inner.count(window).await
        }
        async fn prune(&self, retention: Duration) -> AppResult<u64> {
            self.inner.prune(retention).await
        }
        async fn fetch(&self, key: &[u8]) -> AppResult<Presence> {
            self.inner.fetch(key).await
        }
    }

    /// `None` behaves like a missing metadata entry.
    struct SwitchableTitle(parking_lot::Mutex<Option<Option<String>>>);

    impl SwitchableTitle {
        fn new(entry: Option<Option<&str>>) -> Arc<Self> {
            let title = Arc::new(Self(parking_lot::Mutex::new(None)));
            title.set(entry);
            title
        }

        fn set(&self, entry: Option<Option<&str>>) {
            *self.0.lock() = entry.map(|t| t.map(str::to_string));
        }
    }

    #[async_trait]
    impl TitleSource for SwitchableTitle {
        async fn display_title(&self) -> AppResult<Option<String>> {
            self.0
                .lock()
                .clone()
                .ok_or_else(|| AppError::NotFound("metadata movie".to_string()))
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 21, 0, 0).unwrap(),
        ))
    }

    fn flaky(clock: Arc<ManualClock>) -> Arc<FlakyStore> {
        Arc::new(FlakyStore {
            inner: MemoryPresenceStore::new(clock),
            down: AtomicBool::new(false),
        })
    }

    fn poller(
        store: Arc<FlakyStore>,
        titles: Option<Arc<SwitchableTitle>>,
        clock: Arc<ManualClock>,
        interval: Duration,
    ) -> (PresencePoller, SnapshotReader) {
        let svc = PresenceService::new(store, Duration::from_secs(25));
        let titles = titles.map(|t| t as Arc<dyn TitleSource>);
        PresencePoller::new(svc, titles, clock, interval)
    }

    #[tokio::test]
    async fn refresh_publishes_count_and_title() {
        let clock = clock();
        let store = flaky(clock.clone());
        store.upsert(&Identity::fingerprint("10.0.0.1", "a")).await.unwrap();
        store.upsert(&Identity::fingerprint("10.0.0.2", "b")).await.unwrap();
        let titles = SwitchableTitle::new(Some(Some("Metropolis")));
        let (poller, reader) = poller(store, Some(titles), clock.clone(), Duration::from_secs(10));

        assert_eq!(reader.current(), ViewerSnapshot::default());
        poller.refresh().await;
        let snap = reader.current();
        assert_eq!(snap.viewers, 2);
        assert_eq!(snap.title.as_deref(), Some("Metropolis"));
        assert_eq!(snap.refreshed_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn refreshed_at_follows_the_clock() {
        let clock = clock();
        let start = clock.now();
        let store = flaky(clock.clone());
        let (poller, reader) = poller(store, None, clock.clone(), Duration::from_secs(10));

        poller.refresh().await;
        assert_eq!(reader.current().refreshed_at, Some(start));

        clock.advance(Duration::from_secs(10));
        poller.refresh().await;
        assert_eq!(
            reader.current().refreshed_at,
            Some(start + chrono::Duration::seconds(10))
        );
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_values() {
        let clock = clock();
        let store = flaky(clock.clone());
        store.upsert(&Identity::fingerprint("10.0.0.1", "a")).await.unwrap();
        let (poller, reader) = poller(store.clone(), None, clock.clone(), Duration::from_secs(10));

        poller.refresh().await;
        let before = reader.current();
        assert_eq!(before.viewers, 1);

        store.down.store(true, Ordering::SeqCst);
        store.upsert(&Identity::fingerprint("10.0.0.2", "b")).await.unwrap();
        clock.advance(Duration::from_secs(10));
        poller.refresh().await;
        assert_eq!(reader.current(), before);

        store.down.store(false, Ordering::SeqCst);
        poller.refresh().await;
        assert_eq!(reader.current().viewers, 2);
    }

    #[tokio::test]
    async fn missing_title_entry_keeps_cached_title() {
        let clock = clock();
        let titles = SwitchableTitle::new(Some(Some("Metropolis")));
        let (poller, reader) = poller(
            flaky(clock.clone()),
            Some(titles.clone()),
            clock,
            Duration::from_secs(10),
        );

        poller.refresh().await;
        assert_eq!(reader.current().title.as_deref(), Some("Metropolis"));

        titles.set(None);
        poller.refresh().await;
        assert_eq!(reader.current().title.as_deref(), Some("Metropolis"));
    }

    #[tokio::test]
    async fn empty_title_entry_clears_cached_title() {
        let clock = clock();
        let titles = SwitchableTitle::new(Some(Some("Metropolis")));
        let (poller, reader) = poller(
            flaky(clock.clone()),
            Some(titles.clone()),
            clock,
            Duration::from_secs(10),
        );

        poller.refresh().await;
        assert_eq!(reader.current().title.as_deref(), Some("Metropolis"));

        titles.set(Some(None));
        poller.refresh().await;
        assert_eq!(reader.current().title, None);
    }

    #[tokio::test]
    async fn run_refreshes_then_stops_on_cancel() {
        let clock = clock();
        let store = flaky(clock.clone());
        store.upsert(&Identity::fingerprint("10.0.0.1", "a")).await.unwrap();
        let (poller, mut reader) = poller(store, None, clock, Duration::from_secs(3600));
        let token = CancellationToken::new();
        let handle = poller.spawn(token.clone());

        tokio::time::timeout(Duration::from_secs(5), reader.rx.changed())
            .await
            .expect("first refresh")
            .unwrap();
        assert_eq!(reader.current().viewers, 1);

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
    }
}
