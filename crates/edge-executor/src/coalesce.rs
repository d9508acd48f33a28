//! Per-key single-flight locks.
//!
//! Concurrent misses for the same cache key serialize on one lock: the
//! first caller fetches and populates, later callers wait, then re-check
//! the cache before deciding to fetch again. Lock slots are kept only as
//! long as someone holds or waits on them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Slot count above which dead entries are pruned on insert.
const PRUNE_THRESHOLD: usize = 1024;

/// Exclusive hold on one key, released on drop.
///
/// Guards are `Send + 'static`, so a guard can ride along with a response
/// body until population finishes.
#[derive(Debug)]
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyGuard {
    _guard: Option<OwnedMutexGuard<()>>,
}

impl KeyGuard {
    fn unlocked() -> Self {
        Self { _guard: None }
    }
}

/// Statistics for monitoring lock contention.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LockStats {
    /// Locks taken.
    pub acquired: u64,
    /// Acquisitions that had to wait for another holder.
    pub contended: u64,
    /// `try_acquire` calls that found the key busy.
    pub busy: u64,
    /// `acquire_within` calls that gave up waiting.
    pub timed_out: u64,
}

/// Table of async locks keyed by cache key.
#[derive(Debug)]
pub struct KeyedLocks {
    enabled: bool,
    slots: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
    acquired: AtomicU64,
    contended: AtomicU64,
    busy: AtomicU64,
    timed_out: AtomicU64,
}

impl KeyedLocks {
    /// Locks that serialize work per key.
    pub fn new() -> Self {
        Self::with_enabled(true)
    }

    /// Locks that never block; every acquisition succeeds immediately.
    pub fn disabled() -> Self {
        Self::with_enabled(false)
    }

    fn with_enabled(enabled: bool) -> Self {
        Self {
            enabled,
            slots: Mutex::new(HashMap::new()),
            acquired: AtomicU64::new(0),
            contended: AtomicU64::new(0),
            busy: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    /// Whether acquisitions actually exclude each other.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = slots.get(key).and_then(Weak::upgrade) {
            return existing;
        }

        if slots.len() >= PRUNE_THRESHOLD {
            slots.retain(|_, slot| slot.strong_count() > 0);
        }

        let slot = Arc::new(AsyncMutex::new(()));
        slots.insert(key.to_string(), Arc::downgrade(&slot));
        slot
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: &str) -> KeyGuard {
        if !self.enabled {
            return KeyGuard::unlocked();
        }

        let slot = self.slot(key);
        let guard = match Arc::clone(&slot).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                self.contended.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, "waiting for in-flight work on key");
                slot.lock_owned().await
            }
        };

        self.acquired.fetch_add(1, Ordering::Relaxed);
        KeyGuard {
            _guard: Some(guard),
        }
    }

    /// Like [`acquire`](Self::acquire), but give up after `wait`.
    ///
    /// A holder may keep its guard for as long as its client takes to read
    /// a body, so waiters must not depend on it letting go.
    pub async fn acquire_within(&self, key: &str, wait: Duration) -> Option<KeyGuard> {
        match tokio::time::timeout(wait, self.acquire(key)).await {
            Ok(guard) => Some(guard),
            Err(_) => {
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key, wait_ms = wait.as_millis() as u64, "gave up waiting for key");
                None
            }
        }
    }

    /// Take `key` only if nobody holds it.
    pub fn try_acquire(&self, key: &str) -> Option<KeyGuard> {
        if !self.enabled {
            return Some(KeyGuard::unlocked());
        }

        match self.slot(key).try_lock_owned() {
            Ok(guard) => {
                self.acquired.fetch_add(1, Ordering::Relaxed);
                Some(KeyGuard {
                    _guard: Some(guard),
                })
            }
            Err(_) => {
                self.busy.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Keys currently held or waited on.
    pub fn in_flight(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|slot| slot.strong_count() > 0).count()
    }

    /// Snapshot of contention counters.
    pub fn stats(&self) -> LockStats {
        LockStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            contended: self.contended.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new()
    }
}
