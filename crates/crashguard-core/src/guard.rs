//! Crash-loop debounce.
//!
//! A single persisted timestamp is enough to notice that the process crashed
//! moments ago and is crashing again, e.g. because the diagnostic path itself
//! faults. Within [`DEBOUNCE_WINDOW_MS`] of the last recorded crash the
//! handler skips diagnostic capture and delegates to the previous handler.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::StoreError;
use crate::store::{KEY_LAST_CRASH, KeyValueStore};

/// Debounce window in milliseconds.
pub const DEBOUNCE_WINDOW_MS: i64 = 3_000;

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// [`Clock`] backed by [`SystemTime`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as i64)
    }
}

/// Persists and checks the last crash timestamp.
pub struct CrashLoopGuard {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CrashLoopGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashLoopGuard").finish_non_exhaustive()
    }
}

impl CrashLoopGuard {
    /// Guard using the system clock.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Guard with an explicit clock (for deterministic tests).
    #[must_use]
    pub fn with_clock(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Last persisted crash timestamp, if any.
    pub fn last_crash_timestamp(&self) -> Result<Option<i64>, StoreError> {
        self.store.get_i64(KEY_LAST_CRASH)
    }

    /// Whether a crash was recorded less than [`DEBOUNCE_WINDOW_MS`] ago.
    ///
    /// A store that cannot be read counts as "no prior crash".
    #[must_use]
    pub fn has_crashed_recently(&self) -> bool {
        match self.last_crash_timestamp() {
            Ok(Some(last)) => is_within_window(last, self.clock.now_ms()),
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read last crash timestamp; assuming none");
                false
            }
        }
    }

    /// Record "now" as the last crash with a blocking, durable write.
    ///
    /// Returns the timestamp written.
    pub fn save_crash_timestamp(&self) -> Result<i64, StoreError> {
        let now = self.clock.now_ms();
        self.store.put_i64(KEY_LAST_CRASH, now)?;
        Ok(now)
    }

    /// Forget the last crash.
    pub fn reset(&self) -> Result<(), StoreError> {
        self.store.remove(KEY_LAST_CRASH)
    }
}

/// `now - last < window`. A timestamp from the future (clock stepped back)
/// also counts as recent.
#[must_use]
pub fn is_within_window(last_ms: i64, now_ms: i64) -> bool {
    now_ms.saturating_sub(last_ms) < DEBOUNCE_WINDOW_MS
}
