//! Fault handler composition.
//!
//! [`install`] wraps whatever handler was active before into a
//! [`CrashHandler`]. On a fault the crash handler either delegates to that
//! previous handler (disabled, or crash loop detected) or runs the diagnostic
//! path and terminates the process with [`FAULT_EXIT_CODE`]:
//!
//! 1. persist the crash timestamp
//! 2. if foregrounded (or background presentation is allowed), build a
//!    [`DiagnosticEpisode`] and hand it to the presenter
//! 3. tear down the active screen, if still alive
//! 4. exit
//!
//! Failures along the way are logged and never stop the path to exit.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::context::CrashContext;
use crate::error::PresentationError;
use crate::lifecycle::ScreenId;
use crate::presenter::{LaunchMode, PresenterPayload};
use crate::report::DiagnosticEpisode;

/// Exit status used after a handled fault and by "close application".
pub const FAULT_EXIT_CODE: i32 = 10;

/// Where a fault was raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    pub thread_name: Option<String>,
    pub thread_id: String,
}

impl ExecutionContext {
    /// Describe the calling thread.
    #[must_use]
    pub fn current() -> Self {
        let thread = std::thread::current();
        Self {
            thread_name: thread.name().map(String::from),
            thread_id: format!("{:?}", thread.id()),
        }
    }
}

type TraceRenderer = Box<dyn Fn() -> String + Send + Sync>;

/// An unhandled fault.
///
/// The stack trace may be deferred: a renderer set with
/// [`Fault::with_deferred_stack_trace`] runs on the first call to
/// [`Fault::stack_trace`], so paths that only delegate never pay for it.
pub struct Fault {
    pub message: String,
    /// `file:line:column`, when known.
    pub location: Option<String>,
    stack_trace: OnceLock<String>,
    render_trace: Option<TraceRenderer>,
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fault")
            .field("message", &self.message)
            .field("location", &self.location)
            .field("stack_trace", &self.stack_trace.get())
            .finish_non_exhaustive()
    }
}

impl Fault {
    /// A fault whose stack trace is just its message.
    #[must_use]
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            stack_trace: OnceLock::new(),
            render_trace: None,
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = OnceLock::from(stack_trace.into());
        self.render_trace = None;
        self
    }

    /// Render the stack trace on first use instead of now.
    #[must_use]
    pub fn with_deferred_stack_trace(
        mut self,
        render: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        self.stack_trace = OnceLock::new();
        self.render_trace = Some(Box::new(render));
        self
    }

    /// Full trace handed to the report verbatim.
    #[must_use]
    pub fn stack_trace(&self) -> &str {
        self.stack_trace.get_or_init(|| match &self.render_trace {
            Some(render) => render(),
            None => self.message.clone(),
        })
    }

    #[must_use]
    pub fn is_stack_trace_rendered(&self) -> bool {
        self.stack_trace.get().is_some()
    }
}

/// Something that reacts to a fault.
pub trait FaultHandler: Send + Sync {
    fn handle(&self, execution: &ExecutionContext, fault: &Fault);
}

impl<F> FaultHandler for F
where
    F: Fn(&ExecutionContext, &Fault) + Send + Sync,
{
    fn handle(&self, execution: &ExecutionContext, fault: &Fault) {
        self(execution, fault);
    }
}

/// The host's screen manager.
pub trait ScreenHost: Send + Sync {
    fn is_alive(&self, screen: ScreenId) -> bool;

    /// Request teardown of a screen.
    fn finish(&self, screen: ScreenId);
}

/// Host without screens: nothing is ever alive.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScreenHost;

impl ScreenHost for NoScreenHost {
    fn is_alive(&self, _screen: ScreenId) -> bool {
        false
    }

    fn finish(&self, _screen: ScreenId) {}
}

/// Process termination.
///
/// Real implementations do not return; test doubles may.
pub trait ProcessExit: Send + Sync {
    fn exit(&self, code: i32);
}

/// [`ProcessExit`] via [`std::process::exit`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdExit;

impl ProcessExit for StdExit {
    fn exit(&self, code: i32) {
        std::process::exit(code);
    }
}

/// The diagnostic fault handler, chained in front of a previous handler.
pub struct CrashHandler {
    context: Arc<CrashContext>,
    previous: Option<Arc<dyn FaultHandler>>,
}

impl std::fmt::Debug for CrashHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrashHandler")
            .field("context", &self.context)
            .field("has_previous", &self.previous.is_some())
            .finish()
    }
}

/// Compose a crash handler over `previous`.
#[must_use]
pub fn install(
    context: Arc<CrashContext>,
    previous: Option<Arc<dyn FaultHandler>>,
) -> CrashHandler {
    tracing::debug!(
        enabled = context.config().enabled(),
        chained = previous.is_some(),
        "Installing crash handler"
    );
    CrashHandler { context, previous }
}

impl CrashHandler {
    #[must_use]
    pub fn context(&self) -> &Arc<CrashContext> {
        &self.context
    }

    fn delegate(&self, execution: &ExecutionContext, fault: &Fault) {
        match &self.previous {
            Some(previous) => previous.handle(execution, fault),
            None => tracing::trace!("No previous fault handler to delegate to"),
        }
    }

    fn present(&self, fault: &Fault, activity_log: Option<String>) {
        let ctx = &self.context;
        let payload = PresenterPayload::new(fault.stack_trace(), activity_log)
            .with_app(ctx.info_provider().app_info());
        let episode = Arc::new(DiagnosticEpisode::new(payload, ctx.info_provider().clone()));

        let result = match ctx.presenter() {
            Some(presenter) => presenter.present(episode, LaunchMode::NewTaskClearTask),
            None => Err(PresentationError::Unavailable),
        };
        match result {
            Ok(()) => tracing::debug!("Diagnostic presenter launched"),
            Err(e) => tracing::error!(error = %e, "Failed to present crash diagnostics"),
        }
    }

    fn release_active_screen(&self) {
        let ctx = &self.context;
        let Some(screen) = ctx.tracker().take_active_screen_for_fault() else {
            return;
        };
        if ctx.screen_host().is_alive(screen) {
            tracing::debug!(%screen, "Finishing active screen");
            ctx.screen_host().finish(screen);
        }
    }
}

impl FaultHandler for CrashHandler {
    fn handle(&self, execution: &ExecutionContext, fault: &Fault) {
        let ctx = &self.context;

        if !ctx.config().enabled() {
            self.delegate(execution, fault);
            return;
        }

        if ctx.guard().has_crashed_recently() {
            tracing::warn!(
                message = %fault.message,
                "Crash loop detected; skipping diagnostics"
            );
            self.delegate(execution, fault);
            return;
        }

        tracing::error!(
            message = %fault.message,
            location = fault.location.as_deref().unwrap_or("unknown"),
            thread = execution.thread_name.as_deref().unwrap_or("<unnamed>"),
            "Unhandled fault"
        );

        if let Err(e) = ctx.guard().save_crash_timestamp() {
            tracing::error!(error = %e, "Failed to persist crash timestamp");
        }

        // An unreadable tracker counts as background with no history.
        let snapshot = ctx.tracker().snapshot_for_fault();
        let foreground = snapshot.as_ref().is_some_and(|s| s.foreground);

        if foreground || ctx.config().background_mode_enabled() {
            let activity_log = if ctx.config().track_activities() {
                snapshot.and_then(|s| s.activity_log)
            } else {
                None
            };
            self.present(fault, activity_log);
        } else {
            tracing::info!("Application in background; not presenting diagnostics");
        }

        self.release_active_screen();

        tracing::info!(code = FAULT_EXIT_CODE, "Terminating after unhandled fault");
        ctx.exit().exit(FAULT_EXIT_CODE);
    }
}
