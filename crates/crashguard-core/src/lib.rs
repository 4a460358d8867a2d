//! crashguard-core: panic interception and crash diagnostics
//!
//! This crate turns an unhandled panic into a diagnostic report a human can
//! read, copy, share, save or mail, and then terminates the process with a
//! known exit status. Repeated panics in quick succession are debounced so a
//! crash loop does not spin the process.
//!
//! # Architecture
//!
//! ```text
//! host lifecycle events → LifecycleTracker (counter, history, active screen)
//!                                 ↓
//! panic → panic_hook → CrashHandler → CrashLoopGuard (persisted timestamp)
//!                                 ↓
//!                        DiagnosticEpisode → DiagnosticPresenter → actions
//!                                 ↓
//!                         finish screen, exit(10)
//! ```
//!
//! # Modules
//!
//! - `config`: Settings, validation and the frozen configuration
//! - `context`: The owned state of one installed handler
//! - `handler`: Handler composition and the fault path
//! - `panic_hook`: Adapter onto the process panic hook
//! - `guard`: Crash-loop debounce
//! - `lifecycle`: Screen lifecycle tracking and history
//! - `report`: Report assembly, truncation and memoization
//! - `presenter`: Presenter seam and process handoff
//! - `actions`: Copy, share, e-mail, export and close
//! - `store`: Persisted key-value store
//! - `logging`: Tracing subscriber setup
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod actions;
pub mod config;
pub mod context;
pub mod error;
pub mod guard;
pub mod handler;
pub mod lifecycle;
pub mod logging;
pub mod panic_hook;
pub mod presenter;
pub mod report;
pub mod store;

pub use config::{AppContext, CrashConfig, CrashSettings};
pub use context::CrashContext;
pub use error::{ConfigError, ExportError, LoggingError, PresentationError, StoreError};
pub use handler::{
    CrashHandler, ExecutionContext, FAULT_EXIT_CODE, Fault, FaultHandler, ProcessExit, ScreenHost,
    install,
};
pub use lifecycle::{LifecycleEvent, LifecycleKind, LifecycleTracker, ScreenId, ScreenInfo};
pub use panic_hook::install_panic_hook;
pub use presenter::{DiagnosticPresenter, HandoffPresenter, LaunchMode, PresenterPayload};
pub use report::{AppInfo, DeviceInfo, DiagnosticEpisode, InfoProvider};
pub use store::{FileStore, KeyValueStore, MemoryStore};

/// Version of crashguard-core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
