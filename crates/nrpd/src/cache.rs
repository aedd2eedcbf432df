//! Thread-safe "seen recently" cache with TTL eviction.
//!
//! Used for the server's per-client rate limit (keyed by IP) and for the
//! registry's ban list. Every call checks whether a TTL has passed since the
//! last sweep and, if so, wakes a background thread to run [`ExpiringCache::clean`].
//! The sweep is best-effort; expiry itself is always decided against the
//! stored timestamp, so a late sweep never makes a stale entry look present.

use crate::clock::{Clock, SystemClock};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

#[derive(Debug)]
struct Inner<K> {
    entries: Mutex<HashMap<K, Instant>>,
    last_clean: Mutex<Instant>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K: Eq + Hash> Inner<K> {
    fn expired(&self, stamp: Instant, now: Instant) -> bool {
        now.saturating_duration_since(stamp) >= self.ttl
    }

    fn clean(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, stamp| now.saturating_duration_since(*stamp) < self.ttl);
        before - entries.len()
    }
}

/// A set of keys that each expire `ttl` after they were last added.
#[derive(Debug)]
pub struct ExpiringCache<K> {
    inner: Arc<Inner<K>>,
    wake: Option<SyncSender<()>>,
}

impl<K> ExpiringCache<K>
where
    K: Eq + Hash + Send + 'static,
{
    /// Creates a cache on the system clock.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    /// Creates a cache reading time from `clock`.
    #[must_use]
    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let inner = Arc::new(Inner {
            entries: Mutex::new(HashMap::new()),
            last_clean: Mutex::new(clock.now()),
            ttl,
            clock,
        });

        let (tx, rx) = sync_channel(1);
        let weak = Arc::downgrade(&inner);
        let wake = match std::thread::Builder::new()
            .name("cache-clean".into())
            .spawn(move || sweeper(&rx, &weak))
        {
            Ok(_) => Some(tx),
            Err(e) => {
                warn!("failed to spawn cache sweeper, cleaning inline: {}", e);
                None
            }
        };

        Self { inner, wake }
    }

    /// Time-to-live of every entry.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Inserts `key` unless it is already present and unexpired.
    ///
    /// Returns `true` if the key was present and unexpired (a recent
    /// duplicate), `false` if it was absent or expired and has now been
    /// recorded with the current time.
    pub fn is_present_add(&self, key: K) -> bool {
        let now = self.inner.clock.now();
        let present = {
            let mut entries = self.lock();
            match entries.get_mut(&key) {
                Some(stamp) if !self.inner.expired(*stamp, now) => true,
                Some(stamp) => {
                    *stamp = now;
                    false
                }
                None => {
                    entries.insert(key, now);
                    false
                }
            }
        };
        self.maybe_schedule(now);
        present
    }

    /// Returns `true` if `key` is present and unexpired. Never inserts.
    pub fn is_present(&self, key: &K) -> bool {
        let now = self.inner.clock.now();
        let present = self
            .lock()
            .get(key)
            .is_some_and(|stamp| !self.inner.expired(*stamp, now));
        self.maybe_schedule(now);
        present
    }

    /// Inserts `key`, or refreshes its timestamp if already present.
    pub fn add(&self, key: K) {
        let now = self.inner.clock.now();
        self.lock().insert(key, now);
        self.maybe_schedule(now);
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn clean(&self) -> usize {
        self.inner.clean()
    }

    /// Number of stored entries, expired ones not yet swept included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, Instant>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn maybe_schedule(&self, now: Instant) {
        {
            let mut last = self
                .inner
                .last_clean
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if now.saturating_duration_since(*last) < self.inner.ttl {
                return;
            }
            *last = now;
        }

        match &self.wake {
            Some(tx) => match tx.try_send(()) {
                // A full channel means a sweep is already pending.
                Ok(()) | Err(TrySendError::Full(())) => {}
                Err(TrySendError::Disconnected(())) => {
                    self.inner.clean();
                }
            },
            None => {
                self.inner.clean();
            }
        }
    }
}

fn sweeper<K: Eq + Hash>(rx: &Receiver<()>, inner: &Weak<Inner<K>>) {
    while rx.recv().is_ok() {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let removed = inner.clean();
        trace!(removed, "cache sweep");
    }
}
