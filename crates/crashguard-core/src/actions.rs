//! Presenter-side actions on a diagnostic episode.
//!
//! Every action reads the report through [`DiagnosticEpisode::report`], so
//! whatever the user views, copies, shares, saves or mails is the same text.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use serde::Serialize;

use crate::error::ExportError;
use crate::handler::{FAULT_EXIT_CODE, ProcessExit};
use crate::report::{DiagnosticEpisode, REPORT_DATE_FORMAT, format_report_date};
use crate::store::{KeyValueStore, load_recipients};

/// Clipboard label for the copied report.
pub const CLIPBOARD_LABEL: &str = "View Error Log";

/// Subject of the share draft.
pub const SHARE_SUBJECT: &str = "Crash Report";

/// Subject of the e-mail draft.
pub const EMAIL_SUBJECT: &str = "Application Crash Report";

/// MIME type of shared and mailed reports.
pub const REPORT_MIME_TYPE: &str = "text/plain";

/// Directory (under app storage) that exported reports go to.
pub const EXPORT_DIR_NAME: &str = "UnCaughtException";

const EXPORT_FILE_PREFIX: &str = "Error_";
const EXPORT_FILE_EXT: &str = "txt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipboardText {
    pub label: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareDraft {
    pub subject: &'static str,
    pub mime_type: &'static str,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailDraft {
    pub to: Vec<String>,
    pub subject: &'static str,
    pub mime_type: &'static str,
    pub body: String,
}

impl EmailDraft {
    /// `mailto:a@x,b@y?subject=...&body=...`
    #[must_use]
    pub fn mailto_uri(&self) -> String {
        let to: Vec<String> = self
            .to
            .iter()
            .map(|addr| urlencoding::encode(addr).into_owned())
            .collect();
        format!(
            "mailto:{}?subject={}&body={}",
            to.join(","),
            urlencoding::encode(self.subject),
            urlencoding::encode(&self.body)
        )
    }
}

/// The report as clipboard content.
#[must_use]
pub fn copy_text(episode: &DiagnosticEpisode) -> ClipboardText {
    ClipboardText {
        label: CLIPBOARD_LABEL,
        text: episode.report().to_string(),
    }
}

/// The report as a plain-text share draft.
#[must_use]
pub fn share_draft(episode: &DiagnosticEpisode) -> ShareDraft {
    ShareDraft {
        subject: SHARE_SUBJECT,
        mime_type: REPORT_MIME_TYPE,
        body: episode.report().to_string(),
    }
}

/// The report as an e-mail to the stored recipients.
pub fn email_draft(
    episode: &DiagnosticEpisode,
    store: &dyn KeyValueStore,
) -> Result<EmailDraft, ExportError> {
    let to = load_recipients(store)?;
    if to.is_empty() {
        tracing::warn!("E-mail requested but no recipients are configured");
        return Err(ExportError::NoRecipients);
    }
    Ok(EmailDraft {
        to,
        subject: EMAIL_SUBJECT,
        mime_type: REPORT_MIME_TYPE,
        body: episode.report().to_string(),
    })
}

/// `<storage_dir>/UnCaughtException`
#[must_use]
pub fn export_dir(storage_dir: &Path) -> PathBuf {
    storage_dir.join(EXPORT_DIR_NAME)
}

/// Save the report under the export directory, named for the current time.
pub fn save_report(
    episode: &DiagnosticEpisode,
    storage_dir: &Path,
) -> Result<PathBuf, ExportError> {
    save_report_at(episode, storage_dir, Local::now().naive_local())
}

/// Save the report as `Error_<dd-MM-yyyy_HH:mm:ss>.txt`, creating the export
/// directory on demand.
pub fn save_report_at(
    episode: &DiagnosticEpisode,
    storage_dir: &Path,
    at: NaiveDateTime,
) -> Result<PathBuf, ExportError> {
    let dir = export_dir(storage_dir);
    if let Err(source) = fs::create_dir_all(&dir) {
        tracing::error!(path = %dir.display(), error = %source, "Failed to create log directory");
        return Err(ExportError::CreateDir { path: dir, source });
    }

    let path = dir.join(format!(
        "{EXPORT_FILE_PREFIX}{}.{EXPORT_FILE_EXT}",
        format_report_date(at)
    ));
    if let Err(source) = fs::write(&path, episode.report().as_bytes()) {
        tracing::error!(path = %path.display(), error = %source, "Failed to write report file");
        return Err(ExportError::Write { path, source });
    }

    tracing::info!(path = %path.display(), "Saved crash report");
    Ok(path)
}

/// A report file found in the export directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedReport {
    pub path: PathBuf,
    /// Time encoded in the file name.
    pub saved_at: NaiveDateTime,
}

/// Exported reports, newest first. A missing export directory yields an
/// empty list; files that do not follow the naming scheme are skipped.
pub fn list_reports(storage_dir: &Path) -> Result<Vec<ExportedReport>, ExportError> {
    let dir = export_dir(storage_dir);
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(ExportError::ReadDir { path: dir, source }),
    };

    let mut reports: Vec<ExportedReport> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            let saved_at = parse_export_name(path.file_name()?.to_str()?)?;
            Some(ExportedReport { path, saved_at })
        })
        .collect();
    reports.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
    Ok(reports)
}

fn parse_export_name(name: &str) -> Option<NaiveDateTime> {
    let stamp = name
        .strip_prefix(EXPORT_FILE_PREFIX)?
        .strip_suffix(EXPORT_FILE_EXT)?
        .strip_suffix('.')?;
    NaiveDateTime::parse_from_str(stamp, REPORT_DATE_FORMAT).ok()
}

/// Terminate the process the same way the fault path does.
pub fn close_application(exit: &dyn ProcessExit) {
    tracing::info!(code = FAULT_EXIT_CODE, "Closing application from presenter");
    exit.exit(FAULT_EXIT_CODE);
}
