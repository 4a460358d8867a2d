//! In-process presenter that prints the report to stderr.

use std::io::Write;
use std::sync::Arc;

use crashguard_core::error::PresentationError;
use crashguard_core::{DiagnosticEpisode, DiagnosticPresenter, LaunchMode};

#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPresenter;

impl DiagnosticPresenter for TerminalPresenter {
    fn present(
        &self,
        episode: Arc<DiagnosticEpisode>,
        _mode: LaunchMode,
    ) -> Result<(), PresentationError> {
        let mut stderr = std::io::stderr().lock();
        // Nothing useful to do if stderr itself is gone.
        let _ = writeln!(stderr, "crashguard: unhandled panic, diagnostic report follows");
        let _ = write!(stderr, "{}", episode.report());
        let _ = stderr.flush();
        Ok(())
    }
}
