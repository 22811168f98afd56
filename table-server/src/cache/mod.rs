//! Versioned keyed cache with expiry.
//!
//! Backs the cart store and the idempotency/rate-limit guard. Every entry
//! carries a version number; writers that read-modify-write must pass the
//! version they read back into [`TtlCache::compare_swap`], so two
//! concurrent mutations of the same key cannot silently lose an update.
//!
//! Lock granularity is per key via DashMap shards; all conditional writes
//! go through the entry API and are atomic with respect to other writers
//! of the same key.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    version: u64,
    expires_at: Instant,
}

impl<V> Slot<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// A value read from the cache together with the version to CAS against.
#[derive(Debug, Clone)]
pub struct Versioned<V> {
    pub value: V,
    pub version: u64,
}

/// Outcome of a failed conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CasError {
    /// Another writer got there first; re-read and retry.
    #[error("version conflict")]
    VersionConflict,
}

/// Keyed TTL cache with per-entry versions.
///
/// `insert` resets the TTL (sliding expiry); expired entries read as
/// absent and are reclaimed by [`TtlCache::sweep`].
pub struct TtlCache<V> {
    map: DashMap<String, Slot<V>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// Read a live entry; expired entries are treated as absent.
    pub fn get(&self, key: &str) -> Option<Versioned<V>> {
        let now = Instant::now();
        let slot = self.map.get(key)?;
        if slot.is_expired(now) {
            return None;
        }
        Some(Versioned {
            value: slot.value.clone(),
            version: slot.version,
        })
    }

    /// Unconditional write. Bumps the version and resets the TTL.
    pub fn insert(&self, key: &str, value: V, ttl: Duration) -> u64 {
        let now = Instant::now();
        match self.map.entry(key.to_string()) {
            MapEntry::Occupied(mut e) => {
                let next = if e.get().is_expired(now) { 1 } else { e.get().version + 1 };
                e.insert(Slot {
                    value,
                    version: next,
                    expires_at: now + ttl,
                });
                next
            }
            MapEntry::Vacant(e) => {
                e.insert(Slot {
                    value,
                    version: 1,
                    expires_at: now + ttl,
                });
                1
            }
        }
    }

    /// Conditional write: succeeds only if the entry still has
    /// `expected_version` (0 = expect absent/expired). Resets the TTL on
    /// success and returns the new version.
    pub fn compare_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: V,
        ttl: Duration,
    ) -> Result<u64, CasError> {
        let now = Instant::now();
        match self.map.entry(key.to_string()) {
            MapEntry::Occupied(mut e) => {
                let current = if e.get().is_expired(now) { 0 } else { e.get().version };
                if current != expected_version {
                    return Err(CasError::VersionConflict);
                }
                let next = current + 1;
                e.insert(Slot {
                    value,
                    version: next,
                    expires_at: now + ttl,
                });
                Ok(next)
            }
            MapEntry::Vacant(e) => {
                if expected_version != 0 {
                    return Err(CasError::VersionConflict);
                }
                e.insert(Slot {
                    value,
                    version: 1,
                    expires_at: now + ttl,
                });
                Ok(1)
            }
        }
    }

    /// Create-if-absent. Returns false when a live entry already exists.
    pub fn set_if_absent(&self, key: &str, value: V, ttl: Duration) -> bool {
        self.compare_swap(key, 0, value, ttl).is_ok()
    }

    pub fn remove(&self, key: &str) {
        self.map.remove(key);
    }

    /// Drop expired entries; returns how many were reclaimed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, slot| !slot.is_expired(now));
        before - self.map.len()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-window counters for rate limiting.
///
/// The TTL is armed on the first hit of a window; later hits within the
/// window only increment.
pub struct WindowCounters {
    map: DashMap<String, Slot<u64>>,
}

impl WindowCounters {
    pub fn new() -> Self {
        Self { map: DashMap::new() }
    }

    /// Increment and return the count within the current window.
    pub fn incr(&self, key: &str, window: Duration) -> u64 {
        let now = Instant::now();
        match self.map.entry(key.to_string()) {
            MapEntry::Occupied(mut e) => {
                if e.get().is_expired(now) {
                    // New window
                    e.insert(Slot {
                        value: 1,
                        version: e.get().version + 1,
                        expires_at: now + window,
                    });
                    1
                } else {
                    let slot = e.get_mut();
                    slot.value += 1;
                    slot.value
                }
            }
            MapEntry::Vacant(e) => {
                e.insert(Slot {
                    value: 1,
                    version: 1,
                    expires_at: now + window,
                });
                1
            }
        }
    }

    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.map.len();
        self.map.retain(|_, slot| !slot.is_expired(now));
        before - self.map.len()
    }
}

impl Default for WindowCounters {
    fn default() -> Self {
        Self::new()
    }
}
