//! The owned state of one installed crash handler.
//!
//! Everything the fault path touches hangs off a [`CrashContext`]: the frozen
//! configuration, the persisted store and debounce guard, the lifecycle
//! tracker, and the host collaborators (presenter, screen host, info
//! provider, process exit). Hosts construct one, feed lifecycle events into
//! [`CrashContext::tracker`], and pass it to the installer.

use std::sync::Arc;

use crate::config::{AppContext, CrashConfig, CrashSettings};
use crate::error::ConfigError;
use crate::guard::{Clock, CrashLoopGuard};
use crate::handler::{NoScreenHost, ProcessExit, ScreenHost, StdExit};
use crate::lifecycle::LifecycleTracker;
use crate::presenter::DiagnosticPresenter;
use crate::report::{HostInfoProvider, InfoProvider};
use crate::store::{FileStore, KeyValueStore};

pub struct CrashContext {
    app: AppContext,
    config: CrashConfig,
    store: Arc<dyn KeyValueStore>,
    guard: CrashLoopGuard,
    tracker: Arc<LifecycleTracker>,
    info: Arc<dyn InfoProvider>,
    presenter: Option<Arc<dyn DiagnosticPresenter>>,
    screen_host: Arc<dyn ScreenHost>,
    exit: Arc<dyn ProcessExit>,
}

impl std::fmt::Debug for CrashContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashContext")
            .field("app", &self.app)
            .field("config", &self.config)
            .field("has_presenter", &self.presenter.is_some())
            .finish_non_exhaustive()
    }
}

impl CrashContext {
    /// Context with default collaborators: system clock, host info probe,
    /// no presenter, no screens, real process exit.
    #[must_use]
    pub fn new(app: AppContext, config: CrashConfig, store: Arc<dyn KeyValueStore>) -> Self {
        let tracker = Arc::new(LifecycleTracker::new(config.track_activities()));
        let info = Arc::new(HostInfoProvider::new(
            app.app().clone().with_executable_times(),
        ));
        Self {
            guard: CrashLoopGuard::new(store.clone()),
            app,
            config,
            store,
            tracker,
            info,
            presenter: None,
            screen_host: Arc::new(NoScreenHost),
            exit: Arc::new(StdExit),
        }
    }

    /// Build the configuration from `settings` over a [`FileStore`] in the
    /// app's storage directory.
    pub fn from_settings(app: AppContext, settings: &CrashSettings) -> Result<Self, ConfigError> {
        settings.validate(&app)?;
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(app.storage_dir()));
        let config = settings.build(&app, store.as_ref())?;
        Ok(Self::new(app, config, store))
    }

    #[must_use]
    pub fn with_presenter(mut self, presenter: Arc<dyn DiagnosticPresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    #[must_use]
    pub fn with_screen_host(mut self, screen_host: Arc<dyn ScreenHost>) -> Self {
        self.screen_host = screen_host;
        self
    }

    #[must_use]
    pub fn with_info_provider(mut self, info: Arc<dyn InfoProvider>) -> Self {
        self.info = info;
        self
    }

    #[must_use]
    pub fn with_exit(mut self, exit: Arc<dyn ProcessExit>) -> Self {
        self.exit = exit;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.guard = CrashLoopGuard::with_clock(self.store.clone(), clock);
        self
    }

    /// Reuse a tracker from an earlier context so lifecycle state survives a
    /// reconfiguration. The tracker's recording flag follows this context's
    /// configuration.
    #[must_use]
    pub fn with_tracker(mut self, tracker: Arc<LifecycleTracker>) -> Self {
        tracker.set_track_activities(self.config.track_activities());
        self.tracker = tracker;
        self
    }

    #[must_use]
    pub fn app(&self) -> &AppContext {
        &self.app
    }

    #[must_use]
    pub fn config(&self) -> &CrashConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    #[must_use]
    pub fn guard(&self) -> &CrashLoopGuard {
        &self.guard
    }

    /// Feed host lifecycle events here.
    #[must_use]
    pub fn tracker(&self) -> &Arc<LifecycleTracker> {
        &self.tracker
    }

    #[must_use]
    pub fn info_provider(&self) -> &Arc<dyn InfoProvider> {
        &self.info
    }

    #[must_use]
    pub fn presenter(&self) -> Option<&Arc<dyn DiagnosticPresenter>> {
        self.presenter.as_ref()
    }

    #[must_use]
    pub fn screen_host(&self) -> &Arc<dyn ScreenHost> {
        &self.screen_host
    }

    #[must_use]
    pub fn exit(&self) -> &Arc<dyn ProcessExit> {
        &self.exit
    }
}
