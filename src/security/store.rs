//! Fixed-window counter storage.
//!
//! # Responsibilities
//! - Hold one counter per key with its window start
//! - Reset a window lazily once it has elapsed
//! - Evict expired windows (periodic sweep and opportunistic purge)
//!
//! # Design Decisions
//! - Injected through the [`WindowStore`] trait; the in-memory store is the
//!   single-node default and a shared backend can replace it
//! - Callers pass `now` explicitly so windows are testable without sleeping

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::time;

use crate::lifecycle::shutdown::{Shutdown, ShutdownSignal};

/// Counter state after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub count: u32,
    pub resets_at: Instant,
}

impl WindowSnapshot {
    /// Whole seconds until the window resets, at least 1.
    pub fn retry_after_secs(&self, now: Instant) -> u64 {
        let remaining = self.resets_at.saturating_duration_since(now);
        let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        secs.max(1)
    }
}

/// Storage for fixed-window counters.
pub trait WindowStore: Send + Sync {
    /// Count one hit for `key`, starting a new window when none is active.
    fn increment(&self, key: &str, window: Duration, now: Instant) -> WindowSnapshot;

    /// Take back one hit from an active window.
    fn decrement(&self, key: &str, now: Instant);

    /// Current state of an active window, without counting.
    fn get(&self, key: &str, now: Instant) -> Option<WindowSnapshot>;

    /// Drop every window that has elapsed; returns how many were removed.
    fn purge_expired(&self, now: Instant) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u32,
    started_at: Instant,
    window: Duration,
}

impl RateWindow {
    fn expired(&self, now: Instant) -> bool {
        now >= self.started_at + self.window
    }

    fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            count: self.count,
            resets_at: self.started_at + self.window,
        }
    }
}

/// In-process store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryWindowStore {
    windows: DashMap<String, RateWindow>,
}

impl MemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WindowStore for MemoryWindowStore {
    fn increment(&self, key: &str, window: Duration, now: Instant) -> WindowSnapshot {
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(RateWindow {
                count: 0,
                started_at: now,
                window,
            });

        if entry.expired(now) {
            *entry = RateWindow {
                count: 0,
                started_at: now,
                window,
            };
        }
        entry.count = entry.count.saturating_add(1);
        entry.snapshot()
    }

    fn decrement(&self, key: &str, now: Instant) {
        if let Some(mut window) = self.windows.get_mut(key) {
            if !window.expired(now) {
                window.count = window.count.saturating_sub(1);
            }
        }
    }

    fn get(&self, key: &str, now: Instant) -> Option<WindowSnapshot> {
        self.windows
            .get(key)
            .filter(|w| !w.expired(now))
            .map(|w| w.snapshot())
    }

    fn purge_expired(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| !w.expired(now));
        before.saturating_sub(self.windows.len())
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}

/// Background task evicting expired windows.
pub struct WindowSweeper {
    store: Arc<dyn WindowStore>,
    interval: Duration,
}

impl WindowSweeper {
    pub fn new(store: Arc<dyn WindowStore>, interval: Duration) -> Self {
        Self { store, interval }
    }

    pub async fn run(self, shutdown: ShutdownSignal) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Window sweeper starting");

        let mut ticker = time::interval(self.interval);
        let stop = Shutdown::wait(shutdown);
        tokio::pin!(stop);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.store.purge_expired(Instant::now());
                    if removed > 0 {
                        tracing::debug!(removed, remaining = self.store.len(), "Purged expired rate windows");
                    }
                }
                _ = &mut stop => {
                    tracing::info!("Window sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(900);

    #[test]
    fn test_counts_within_window() {
        let store = MemoryWindowStore::new();
        let now = Instant::now();

        assert_eq!(store.increment("global:a", WINDOW, now).count, 1);
        assert_eq!(store.increment("global:a", WINDOW, now).count, 2);
        assert_eq!(store.increment("global:b", WINDOW, now).count, 1);
        assert_eq!(store.get("global:a", now).unwrap().count, 2);
        assert!(store.get("global:c", now).is_none());
    }

    #[test]
    fn test_window_resets_after_elapsing() {
        let store = MemoryWindowStore::new();
        let start = Instant::now();
        store.increment("k", WINDOW, start);
        store.increment("k", WINDOW, start);

        let later = start + WINDOW;
        assert!(store.get("k", later).is_none());
        let snap = store.increment("k", WINDOW, later);
        assert_eq!(snap.count, 1);
        assert_eq!(snap.resets_at, later + WINDOW);
    }

    #[test]
    fn test_decrement_stays_in_window() {
        let store = MemoryWindowStore::new();
        let start = Instant::now();
        store.increment("auth:a", WINDOW, start);
        store.increment("auth:a", WINDOW, start);

        store.decrement("auth:a", start);
        assert_eq!(store.get("auth:a", start).unwrap().count, 1);
        store.decrement("auth:a", start);
        store.decrement("auth:a", start);
        assert_eq!(store.get("auth:a", start).unwrap().count, 0);

        // Unknown keys and elapsed windows are left alone.
        store.decrement("auth:b", start);
        assert!(store.get("auth:b", start).is_none());
        store.increment("auth:a", WINDOW, start);
        store.decrement("auth:a", start + WINDOW);
        assert_eq!(store.increment("auth:a", WINDOW, start + WINDOW).count, 1);
    }

    #[test]
    fn test_purge_expired() {
        let store = MemoryWindowStore::new();
        let start = Instant::now();
        store.increment("short", Duration::from_secs(60), start);
        store.increment("long", Duration::from_secs(3600), start);

        assert_eq!(store.purge_expired(start + Duration::from_secs(61)), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let now = Instant::now();
        let snap = WindowSnapshot {
            count: 1,
            resets_at: now + Duration::from_millis(1500),
        };
        assert_eq!(snap.retry_after_secs(now), 2);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let store: Arc<dyn WindowStore> = Arc::new(MemoryWindowStore::new());
        let shutdown = Shutdown::new();
        let handle = tokio::spawn(
            WindowSweeper::new(store, Duration::from_millis(10)).run(shutdown.subscribe()),
        );

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
