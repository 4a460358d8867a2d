//! Integration tests for the panic hook adapter
//!
//! The panic hook is process-global, so everything that installs one lives in
//! this binary and runs as a single sequential test.

use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use crashguard_core::error::PresentationError;
use crashguard_core::report::StaticInfoProvider;
use crashguard_core::{
    AppContext, AppInfo, CrashContext, CrashSettings, DiagnosticEpisode, DiagnosticPresenter,
    FAULT_EXIT_CODE, LaunchMode, ProcessExit, install_panic_hook,
};

#[derive(Default)]
struct RecordingExit(Mutex<Vec<i32>>);

impl ProcessExit for RecordingExit {
    fn exit(&self, code: i32) {
        self.0.lock().unwrap().push(code);
    }
}

#[derive(Default)]
struct RecordingPresenter(Mutex<Vec<Arc<DiagnosticEpisode>>>);

impl DiagnosticPresenter for RecordingPresenter {
    fn present(
        &self,
        episode: Arc<DiagnosticEpisode>,
        _mode: LaunchMode,
    ) -> Result<(), PresentationError> {
        self.0.lock().unwrap().push(episode);
        Ok(())
    }
}

fn context(
    dir: &TempDir,
    settings: &CrashSettings,
    presenter: Arc<RecordingPresenter>,
    exit: Arc<RecordingExit>,
) -> Arc<CrashContext> {
    let app = AppContext::new(dir.path(), AppInfo::new("HookDemo"));
    Arc::new(
        CrashContext::from_settings(app, settings)
            .unwrap()
            .with_info_provider(Arc::new(StaticInfoProvider::default()))
            .with_presenter(presenter)
            .with_exit(exit),
    )
}

fn panic_on_thread(message: &'static str) {
    let result = std::thread::Builder::new()
        .name("worker".to_string())
        .spawn(move || panic!("{message}"))
        .unwrap()
        .join();
    assert!(result.is_err());
}

#[test]
fn panic_hook_chain() {
    // ── First install: a panic runs the diagnostic path ──
    let dir = TempDir::new().unwrap();
    let presenter = Arc::new(RecordingPresenter::default());
    let exit = Arc::new(RecordingExit::default());
    install_panic_hook(context(
        &dir,
        &CrashSettings::default(),
        presenter.clone(),
        exit.clone(),
    ));

    panic_on_thread("NullPointer at X");

    {
        let episodes = presenter.0.lock().unwrap();
        assert_eq!(episodes.len(), 1);
        let trace = &episodes[0].payload().stack_trace;
        assert!(trace.starts_with("thread 'worker' panicked at "), "{trace}");
        assert!(trace.contains("NullPointer at X"));
    }
    assert_eq!(*exit.0.lock().unwrap(), vec![FAULT_EXIT_CODE]);

    // ── Second panic inside the debounce window delegates ──
    panic_on_thread("again");
    assert_eq!(presenter.0.lock().unwrap().len(), 1);
    assert_eq!(exit.0.lock().unwrap().len(), 1);

    // ── Reinstall replaces rather than nests ──
    let other_dir = TempDir::new().unwrap();
    let replacement = Arc::new(RecordingPresenter::default());
    let replacement_exit = Arc::new(RecordingExit::default());
    install_panic_hook(context(
        &other_dir,
        &CrashSettings::default(),
        replacement.clone(),
        replacement_exit.clone(),
    ));

    panic_on_thread("third");
    assert_eq!(replacement.0.lock().unwrap().len(), 1);
    assert_eq!(*replacement_exit.0.lock().unwrap(), vec![FAULT_EXIT_CODE]);
    assert_eq!(presenter.0.lock().unwrap().len(), 1);

    // ── Disabled handler only delegates to the original hook ──
    let disabled_dir = TempDir::new().unwrap();
    let silent = Arc::new(RecordingPresenter::default());
    let silent_exit = Arc::new(RecordingExit::default());
    install_panic_hook(context(
        &disabled_dir,
        &CrashSettings {
            enabled: false,
            ..CrashSettings::default()
        },
        silent.clone(),
        silent_exit.clone(),
    ));

    panic_on_thread("ignored");
    assert!(silent.0.lock().unwrap().is_empty());
    assert!(silent_exit.0.lock().unwrap().is_empty());

    let _ = std::panic::take_hook();
}
