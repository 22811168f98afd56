//! Idempotency and rate-limit guard.
//!
//! Wraps money-moving and resource-limited operations. Rate limiting is a
//! fixed-window counter keyed by (action, actor). Idempotency is a
//! caller-supplied key: a `processing` marker is created with a conditional
//! write before business logic runs, flipped to `done` on success, and
//! released on a clean business failure so the caller may retry with the
//! same key. Replays inside the marker TTL are rejected.
//!
//! When the backing store is unavailable the guard follows the call site's
//! [`FailMode`]: `Open` lets the call through (UX-level throttling),
//! `Closed` rejects it (money-moving paths).

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::cache::{TtlCache, WindowCounters};
use crate::common::{AppError, AppResult};

/// Behavior when the guard's backing store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// Treat the check as passed.
    Open,
    /// Reject the call with an infrastructure error.
    Closed,
}

/// The guard's backing store could not serve the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("guard store unavailable")]
pub struct StoreUnavailable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Processing,
    Done,
}

/// Marker and counter storage behind the guard.
///
/// The in-memory implementation cannot fail; the trait keeps the
/// unavailable path honest for an external cache and lets tests drive it.
pub trait GuardStore: Send + Sync {
    fn incr_window(&self, key: &str, window: Duration) -> Result<u64, StoreUnavailable>;
    /// Create a `processing` marker if no live marker exists. Returns
    /// false when one does.
    fn try_mark_processing(&self, key: &str, ttl: Duration) -> Result<bool, StoreUnavailable>;
    fn mark_done(&self, key: &str, ttl: Duration) -> Result<(), StoreUnavailable>;
    fn release(&self, key: &str) -> Result<(), StoreUnavailable>;
    /// Drop expired markers and counters.
    fn sweep(&self) -> usize;
}

pub struct MemoryGuardStore {
    markers: TtlCache<Marker>,
    counters: WindowCounters,
}

impl MemoryGuardStore {
    pub fn new() -> Self {
        Self {
            markers: TtlCache::new(),
            counters: WindowCounters::new(),
        }
    }
}

impl Default for MemoryGuardStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardStore for MemoryGuardStore {
    fn incr_window(&self, key: &str, window: Duration) -> Result<u64, StoreUnavailable> {
        Ok(self.counters.incr(key, window))
    }

    fn try_mark_processing(&self, key: &str, ttl: Duration) -> Result<bool, StoreUnavailable> {
        Ok(self.markers.set_if_absent(key, Marker::Processing, ttl))
    }

    fn mark_done(&self, key: &str, ttl: Duration) -> Result<(), StoreUnavailable> {
        self.markers.insert(key, Marker::Done, ttl);
        Ok(())
    }

    fn release(&self, key: &str) -> Result<(), StoreUnavailable> {
        self.markers.remove(key);
        Ok(())
    }

    fn sweep(&self) -> usize {
        self.markers.sweep() + self.counters.sweep()
    }
}

/// A rate-limit rule for one action class.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub limit: u64,
    pub window: Duration,
}

impl RateLimit {
    pub const fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }
}

/// An accepted idempotent call. Finish with [`IdemTicket::commit`] on
/// success or [`IdemTicket::release`] on a business-rule failure; dropping
/// the ticket leaves the `processing` marker to expire with its TTL.
#[must_use = "commit or release the ticket, or replays stay blocked until the TTL"]
pub struct IdemTicket {
    key: Option<String>,
    store: Arc<dyn GuardStore>,
    ttl: Duration,
}

impl IdemTicket {
    /// Flip the marker to `done`; replays with this key are rejected until
    /// the TTL expires.
    pub fn commit(self) {
        if let Some(key) = &self.key {
            if self.store.mark_done(key, self.ttl).is_err() {
                warn!(key, "failed to finalize idempotency marker");
            }
        }
    }

    /// Clear the marker so the caller can retry with the same key.
    pub fn release(self) {
        if let Some(key) = &self.key {
            if self.store.release(key).is_err() {
                warn!(key, "failed to release idempotency marker");
            }
        }
    }
}

impl std::fmt::Debug for IdemTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdemTicket")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

pub struct Guard {
    store: Arc<dyn GuardStore>,
    marker_ttl: Duration,
}

impl Guard {
    pub fn new(store: Arc<dyn GuardStore>, marker_ttl: Duration) -> Self {
        Self { store, marker_ttl }
    }

    pub fn in_memory(marker_ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryGuardStore::new()), marker_ttl)
    }

    /// Count this call against the fixed window for (action, actor) and
    /// reject once the limit is exceeded.
    pub fn check_rate(
        &self,
        action: &str,
        actor: &str,
        rule: RateLimit,
        mode: FailMode,
    ) -> AppResult<()> {
        let key = format!("rl:{action}:{actor}");
        match self.store.incr_window(&key, rule.window) {
            Ok(count) if count > rule.limit => Err(AppError::rate_limited(format!(
                "too many {action} requests, try again later"
            ))),
            Ok(_) => Ok(()),
            Err(_) => self.on_unavailable(action, mode),
        }
    }

    /// Begin an idempotent call. `key` is the caller-supplied idempotency
    /// key; `None` disables duplicate protection for this call.
    pub fn begin(&self, action: &str, key: Option<&str>, mode: FailMode) -> AppResult<IdemTicket> {
        let Some(key) = key else {
            return Ok(IdemTicket {
                key: None,
                store: self.store.clone(),
                ttl: self.marker_ttl,
            });
        };

        let marker_key = format!("idem:{action}:{key}");
        match self.store.try_mark_processing(&marker_key, self.marker_ttl) {
            Ok(true) => Ok(IdemTicket {
                key: Some(marker_key),
                store: self.store.clone(),
                ttl: self.marker_ttl,
            }),
            Ok(false) => Err(AppError::conflict(format!(
                "duplicate request: {key} already processed or in flight"
            ))),
            Err(_) => {
                self.on_unavailable(action, mode)?;
                // Fail-open: proceed without a marker
                Ok(IdemTicket {
                    key: None,
                    store: self.store.clone(),
                    ttl: self.marker_ttl,
                })
            }
        }
    }

    pub fn sweep(&self) -> usize {
        self.store.sweep()
    }

    fn on_unavailable(&self, action: &str, mode: FailMode) -> AppResult<()> {
        match mode {
            FailMode::Open => {
                warn!(action, "guard store unavailable, failing open");
                Ok(())
            }
            FailMode::Closed => Err(AppError::infra(format!(
                "guard store unavailable for {action}"
            ))),
        }
    }
}
