//! Diagnostic presenter seam.
//!
//! The fault path never renders anything itself. It builds a
//! [`DiagnosticEpisode`] and hands it to a [`DiagnosticPresenter`], which is
//! free to show it in-process or pass it on to a separate presenter process.
//!
//! [`HandoffPresenter`] does the latter: the [`PresenterPayload`] is written
//! durably as JSON and a presenter program is spawned with the file path as
//! its last argument. The `crashguard present <file>` command is one such
//! program.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::PresentationError;
use crate::report::{AppInfo, DiagnosticEpisode};
use crate::store::{sync_parent_dir, write_file_sync};

/// File name of the handed-off payload inside the handoff directory.
pub const PAYLOAD_FILE_NAME: &str = "pending_crash.json";

/// What a presenter receives for one fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenterPayload {
    /// Rendered stack trace, passed through untouched.
    pub stack_trace: String,
    /// Activity history; `None` when tracking is disabled.
    #[serde(default)]
    pub activity_log: Option<String>,
    /// Facts about the crashed application, so an out-of-process presenter
    /// reports the crashed app rather than itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppInfo>,
}

impl PresenterPayload {
    #[must_use]
    pub fn new(stack_trace: impl Into<String>, activity_log: Option<String>) -> Self {
        Self {
            stack_trace: stack_trace.into(),
            activity_log,
            app: None,
        }
    }

    #[must_use]
    pub fn with_app(mut self, app: AppInfo) -> Self {
        self.app = Some(app);
        self
    }

    /// Read a payload previously written by [`Self::write_to`].
    pub fn read_from(path: &Path) -> Result<Self, PresentationError> {
        let data = fs::read(path).map_err(|source| PresentationError::Handoff {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Write the payload with a synchronous temp-file-and-rename commit,
    /// replacing any payload already at `path`.
    pub fn write_to(&self, path: &Path) -> Result<(), PresentationError> {
        let json = serde_json::to_vec_pretty(self)?;
        let handoff_err = |source| PresentationError::Handoff {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(handoff_err)?;
        }
        let tmp_path = path.with_extension("json.tmp");
        write_file_sync(&tmp_path, &json).map_err(handoff_err)?;
        fs::rename(&tmp_path, path).map_err(handoff_err)?;
        sync_parent_dir(path);
        Ok(())
    }
}

/// How the presenter is brought up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Bring the presenter to the front on its own, discarding whatever
    /// navigation state (or pending payload) came before.
    #[default]
    NewTaskClearTask,
}

/// Renders a diagnostic episode for a human.
pub trait DiagnosticPresenter: Send + Sync {
    fn present(
        &self,
        episode: Arc<DiagnosticEpisode>,
        mode: LaunchMode,
    ) -> Result<(), PresentationError>;
}

/// Hands the payload to a separate presenter process.
#[derive(Debug, Clone)]
pub struct HandoffPresenter {
    program: PathBuf,
    args: Vec<String>,
    handoff_dir: PathBuf,
}

impl HandoffPresenter {
    /// Spawn `program [args..] <payload path>`; the payload goes to
    /// `handoff_dir/pending_crash.json`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, handoff_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            handoff_dir: handoff_dir.into(),
        }
    }

    /// Arguments placed before the payload path.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn payload_path(&self) -> PathBuf {
        self.handoff_dir.join(PAYLOAD_FILE_NAME)
    }
}

impl DiagnosticPresenter for HandoffPresenter {
    fn present(
        &self,
        episode: Arc<DiagnosticEpisode>,
        mode: LaunchMode,
    ) -> Result<(), PresentationError> {
        let path = self.payload_path();
        match mode {
            LaunchMode::NewTaskClearTask => episode.payload().write_to(&path)?,
        }

        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(&path)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|source| PresentationError::Launch {
                program: self.program.display().to_string(),
                source,
            })?;

        tracing::info!(
            program = %self.program.display(),
            pid = child.id(),
            payload = %path.display(),
            "Launched diagnostic presenter"
        );
        Ok(())
    }
}
