//! Panic hook adapter.
//!
//! This is the only module that touches the process-global panic hook. The
//! hook that was registered before the first install is captured once and
//! kept for the life of the process; every install chains in front of that
//! original hook, so installing twice replaces the crash handler instead of
//! nesting it.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use crashguard_core::{AppContext, AppInfo, CrashContext, CrashSettings, install_panic_hook};
//!
//! let app = AppContext::new("/var/lib/demo", AppInfo::new("Demo"));
//! let ctx = CrashContext::from_settings(app, &CrashSettings::default())?;
//! install_panic_hook(Arc::new(ctx));
//! # Ok::<(), crashguard_core::ConfigError>(())
//! ```

use std::backtrace::Backtrace;
use std::cell::Cell;
use std::panic::{self, PanicHookInfo};
use std::sync::{Arc, OnceLock};

use crate::context::CrashContext;
use crate::handler::{CrashHandler, ExecutionContext, Fault, FaultHandler, install};

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

static ORIGINAL_HOOK: OnceLock<PanicHook> = OnceLock::new();

thread_local! {
    static DELEGATE_TO_ORIGINAL: Cell<bool> = const { Cell::new(false) };
}

/// Previous-handler stand-in for the original panic hook.
///
/// The original hook needs the live [`PanicHookInfo`], which only exists
/// inside the hook invocation, so delegation is recorded here and carried out
/// by the hook once the crash handler returns.
#[derive(Debug, Clone, Copy, Default)]
struct OriginalHookDelegate;

impl FaultHandler for OriginalHookDelegate {
    fn handle(&self, _execution: &ExecutionContext, _fault: &Fault) {
        DELEGATE_TO_ORIGINAL.with(|d| d.set(true));
    }
}

/// Install a crash handler for `context` as the process panic hook.
///
/// The previous handler is always the hook that was registered before the
/// first call in this process. A hook set by other code between two calls is
/// replaced and never invoked; install such hooks before the first call, or
/// not at all once crashguard owns the hook.
///
/// Must not be called from a panicking thread.
pub fn install_panic_hook(context: Arc<CrashContext>) -> Arc<CrashHandler> {
    ORIGINAL_HOOK.get_or_init(panic::take_hook);

    let previous: Arc<dyn FaultHandler> = Arc::new(OriginalHookDelegate);
    let handler = Arc::new(install(context, Some(previous)));

    let hook_handler = Arc::clone(&handler);
    panic::set_hook(Box::new(move |info| {
        let fault = fault_from_panic(info);
        let execution = ExecutionContext::current();

        DELEGATE_TO_ORIGINAL.with(|d| d.set(false));
        hook_handler.handle(&execution, &fault);

        if DELEGATE_TO_ORIGINAL.with(|d| d.replace(false)) {
            if let Some(original) = ORIGINAL_HOOK.get() {
                original(info);
            }
        }
    }));

    tracing::info!("Crash handler installed as panic hook");
    handler
}

/// Turn panic hook info into a [`Fault`].
///
/// Message and location are read eagerly. The stack trace mirrors the default
/// hook's output followed by a forced backtrace, and is only captured when
/// the fault path asks for it, which happens inside the hook on the
/// panicking thread.
#[must_use]
pub fn fault_from_panic(info: &PanicHookInfo<'_>) -> Fault {
    let message = if let Some(s) = info.payload().downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = info.payload().downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    };

    let location = info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()));

    let header = format!(
        "thread '{}' panicked at {}:\n{message}",
        std::thread::current().name().unwrap_or("<unnamed>"),
        location.as_deref().unwrap_or("<unknown>"),
    );

    let fault = Fault::from_message(message).with_deferred_stack_trace(move || {
        let backtrace = Backtrace::force_capture();
        format!("{header}\n\nstack backtrace:\n{backtrace}")
    });
    match location {
        Some(location) => fault.with_location(location),
        None => fault,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn fault_from_panic_captures_message_and_location() {
        let captured: Arc<Mutex<Option<Fault>>> = Arc::new(Mutex::new(None));
        let sink = captured.clone();

        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            *sink.lock().unwrap() = Some(fault_from_panic(info));
        }));
        let result = std::thread::Builder::new()
            .name("faulty".to_string())
            .spawn(|| panic!("NullPointer at X"))
            .unwrap()
            .join();
        panic::set_hook(previous);

        assert!(result.is_err());
        let fault = captured.lock().unwrap().take().unwrap();
        assert_eq!(fault.message, "NullPointer at X");
        assert!(fault.location.as_deref().unwrap().contains("panic_hook.rs"));
        assert!(!fault.is_stack_trace_rendered());
        assert!(fault.stack_trace().starts_with("thread 'faulty' panicked at "));
        assert!(
            fault
                .stack_trace()
                .contains("NullPointer at X\n\nstack backtrace:\n")
        );
    }

    #[test]
    fn delegate_sets_thread_local_flag() {
        DELEGATE_TO_ORIGINAL.with(|d| d.set(false));
        OriginalHookDelegate.handle(&ExecutionContext::current(), &Fault::from_message("x"));
        assert!(DELEGATE_TO_ORIGINAL.with(|d| d.replace(false)));
    }
}
