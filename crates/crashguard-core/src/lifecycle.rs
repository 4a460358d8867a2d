//! Screen lifecycle tracking.
//!
//! The host translates its own lifecycle callbacks into [`LifecycleEvent`]s
//! and feeds them to [`LifecycleTracker::record`]. From that stream the
//! tracker derives three things the fault handler needs:
//!
//! - whether the application is in the foreground (started minus stopped),
//! - a bounded history of formatted transitions ([`LifecycleHistory`]),
//! - the most recently created application screen ([`ActiveScreenRef`]).
//!
//! # Usage
//!
//! ```rust
//! use crashguard_core::lifecycle::{LifecycleEvent, LifecycleKind, LifecycleTracker, ScreenId, ScreenInfo};
//!
//! let tracker = LifecycleTracker::new(true);
//! let main = ScreenInfo::new(ScreenId(1), "MainScreen");
//!
//! tracker.record(&LifecycleEvent::now(main.clone(), LifecycleKind::Created));
//! tracker.record(&LifecycleEvent::now(main, LifecycleKind::Started));
//!
//! assert!(tracker.is_foreground());
//! assert_eq!(tracker.active_screen(), Some(ScreenId(1)));
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Maximum number of formatted transitions kept in the history.
pub const MAX_ACTIVITIES_IN_LOG: usize = 50;

/// Timestamp format used in history lines.
const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How many times the fault path retries a contended tracker lock.
const FAULT_LOCK_ATTEMPTS: u32 = 50;

/// Identity of a host screen. A lookup key only; never owns the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScreenId(pub u64);

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "screen#{}", self.0)
    }
}

/// What a screen is to the crash handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenRole {
    /// Regular application screen.
    #[default]
    Application,
    /// The diagnostic presenter itself; never becomes the active screen.
    Diagnostic,
}

/// Screen descriptor carried by every lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenInfo {
    pub id: ScreenId,
    /// Short display name (a type name, route name, ...).
    pub name: String,
    #[serde(default)]
    pub role: ScreenRole,
}

impl ScreenInfo {
    /// Application screen.
    #[must_use]
    pub fn new(id: ScreenId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            role: ScreenRole::Application,
        }
    }

    /// The diagnostic presenter screen.
    #[must_use]
    pub fn diagnostic(id: ScreenId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            role: ScreenRole::Diagnostic,
        }
    }

    #[must_use]
    pub fn is_diagnostic(&self) -> bool {
        self.role == ScreenRole::Diagnostic
    }
}

/// Lifecycle transition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleKind {
    Created,
    Started,
    Resumed,
    Paused,
    Stopped,
    Destroyed,
}

impl LifecycleKind {
    /// All kinds, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Created,
        Self::Started,
        Self::Resumed,
        Self::Paused,
        Self::Stopped,
        Self::Destroyed,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Resumed => "resumed",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for LifecycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single lifecycle transition reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Local wall-clock time of the transition.
    pub timestamp: NaiveDateTime,
    pub screen: ScreenInfo,
    pub kind: LifecycleKind,
}

impl LifecycleEvent {
    /// Event stamped with an explicit time (for deterministic tests).
    #[must_use]
    pub fn at(timestamp: NaiveDateTime, screen: ScreenInfo, kind: LifecycleKind) -> Self {
        Self {
            timestamp,
            screen,
            kind,
        }
    }

    /// Event stamped with the current local time.
    #[must_use]
    pub fn now(screen: ScreenInfo, kind: LifecycleKind) -> Self {
        Self::at(Local::now().naive_local(), screen, kind)
    }

    /// `"<yyyy-MM-dd HH:mm:ss>: <screenName> <eventKind>"`
    #[must_use]
    pub fn log_line(&self) -> String {
        format!(
            "{}: {} {}",
            self.timestamp.format(LOG_TIMESTAMP_FORMAT),
            self.screen.name,
            self.kind
        )
    }
}

// ---------------------------------------------------------------------------
// History ring buffer
// ---------------------------------------------------------------------------

/// Fixed-capacity FIFO of formatted transitions.
#[derive(Debug, Clone)]
pub struct LifecycleHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl Default for LifecycleHistory {
    fn default() -> Self {
        Self::with_capacity(MAX_ACTIVITIES_IN_LOG)
    }
}

impl LifecycleHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// History with a custom capacity (at least 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a line, evicting the oldest entry first when full.
    pub fn push(&mut self, line: String) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(line);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// All entries, oldest first, each terminated by a newline.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.entries.iter().map(|e| e.len() + 1).sum());
        for entry in &self.entries {
            out.push_str(entry);
            out.push('\n');
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Active screen reference
// ---------------------------------------------------------------------------

/// Non-owning reference to the most recently created application screen.
///
/// Holds an identity only. The owning screen invalidates it from its own
/// teardown path (its `destroyed` event), so the reference can never outlive
/// the screen it names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActiveScreenRef {
    id: Option<ScreenId>,
}

impl ActiveScreenRef {
    /// Point at `id`, overwriting any previous screen.
    pub fn set(&mut self, id: ScreenId) {
        self.id = Some(id);
    }

    /// Clear the reference if it currently names `id`.
    pub fn invalidate(&mut self, id: ScreenId) -> bool {
        if self.id == Some(id) {
            self.id = None;
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn get(&self) -> Option<ScreenId> {
        self.id
    }

    /// Take the current screen, leaving the reference unset.
    pub fn take(&mut self) -> Option<ScreenId> {
        self.id.take()
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TrackerState {
    started: i64,
    history: LifecycleHistory,
    active: ActiveScreenRef,
}

/// What the fault path reads from the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSnapshot {
    pub foreground: bool,
    /// Rendered history; `None` when tracking is disabled.
    pub activity_log: Option<String>,
    pub active_screen: Option<ScreenId>,
}

/// Consumes lifecycle events; never panics and never fails.
#[derive(Debug)]
pub struct LifecycleTracker {
    track_activities: AtomicBool,
    state: Mutex<TrackerState>,
}

impl Default for LifecycleTracker {
    fn default() -> Self {
        Self::new(false)
    }
}

impl LifecycleTracker {
    /// Create a tracker; `track_activities` controls history recording.
    #[must_use]
    pub fn new(track_activities: bool) -> Self {
        Self {
            track_activities: AtomicBool::new(track_activities),
            state: Mutex::new(TrackerState::default()),
        }
    }

    #[must_use]
    pub fn tracks_activities(&self) -> bool {
        self.track_activities.load(Ordering::SeqCst)
    }

    /// Turn history recording on or off. Lines already recorded are kept.
    pub fn set_track_activities(&self, track_activities: bool) {
        self.track_activities.store(track_activities, Ordering::SeqCst);
    }

    /// Apply one lifecycle event.
    pub fn record(&self, event: &LifecycleEvent) {
        let mut state = self.lock();

        match event.kind {
            LifecycleKind::Created => {
                if !event.screen.is_diagnostic() {
                    state.active.set(event.screen.id);
                }
            }
            LifecycleKind::Started => state.started += 1,
            LifecycleKind::Stopped => state.started -= 1,
            LifecycleKind::Destroyed => {
                if state.active.invalidate(event.screen.id) {
                    tracing::trace!(screen = %event.screen.id, "Active screen destroyed by owner");
                }
            }
            LifecycleKind::Resumed | LifecycleKind::Paused => {}
        }

        if self.tracks_activities() {
            state.history.push(event.log_line());
        }
    }

    /// Foreground iff more screens were started than stopped.
    #[must_use]
    pub fn is_foreground(&self) -> bool {
        self.lock().started > 0
    }

    /// Raw started-minus-stopped counter.
    #[must_use]
    pub fn started_count(&self) -> i64 {
        self.lock().started
    }

    /// Rendered history, or `None` when tracking is disabled.
    #[must_use]
    pub fn activity_log(&self) -> Option<String> {
        if !self.tracks_activities() {
            return None;
        }
        Some(self.lock().history.render())
    }

    /// Copy of the history lines, oldest first.
    #[must_use]
    pub fn history_lines(&self) -> Vec<String> {
        self.lock().history.iter().map(str::to_string).collect()
    }

    /// The screen the active reference currently resolves to.
    #[must_use]
    pub fn active_screen(&self) -> Option<ScreenId> {
        self.lock().active.get()
    }

    /// Take and clear the active reference.
    pub fn take_active_screen(&self) -> Option<ScreenId> {
        self.lock().active.take()
    }

    /// Snapshot for the fault path.
    ///
    /// Unlike the other accessors this never blocks indefinitely: if the
    /// lock stays contended (e.g. the fault was raised while this very thread
    /// held it) it gives up and returns `None`.
    #[must_use]
    pub fn snapshot_for_fault(&self) -> Option<TrackerSnapshot> {
        let state = self.lock_for_fault()?;
        Some(TrackerSnapshot {
            foreground: state.started > 0,
            activity_log: self.tracks_activities().then(|| state.history.render()),
            active_screen: state.active.get(),
        })
    }

    /// Take the active reference from the fault path; see [`Self::snapshot_for_fault`].
    pub fn take_active_screen_for_fault(&self) -> Option<ScreenId> {
        self.lock_for_fault()?.active.take()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_for_fault(&self) -> Option<MutexGuard<'_, TrackerState>> {
        for _ in 0..FAULT_LOCK_ATTEMPTS {
            match self.state.try_lock() {
                Ok(guard) => return Some(guard),
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => std::thread::sleep(Duration::from_millis(1)),
            }
        }
        tracing::warn!("Lifecycle tracker lock unavailable during fault handling");
        None
    }
}
