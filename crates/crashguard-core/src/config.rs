//! Crash handler configuration.
//!
//! [`CrashSettings`] is the raw, serde-friendly input. [`CrashSettings::build`]
//! validates it against an [`AppContext`], persists the recipient list and
//! returns an immutable [`CrashConfig`]. Nothing is observable until `build`
//! succeeds.
//!
//! ```toml
//! [crash_handler]
//! enabled = true
//! track_activities = true
//! background_mode_enabled = false
//! recipient_emails = ["ops@example.com"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::report::AppInfo;
use crate::store::{KeyValueStore, save_recipients};

/// Directory name under the platform data dir used when none is given.
pub const DEFAULT_DIR_NAME: &str = "crashguard";

/// `<data_dir>/crashguard`, if the platform has a data dir.
#[must_use]
pub fn default_storage_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(DEFAULT_DIR_NAME))
}

/// The host application the handler is installed into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppContext {
    storage_dir: PathBuf,
    app: AppInfo,
}

impl AppContext {
    #[must_use]
    pub fn new(storage_dir: impl Into<PathBuf>, app: AppInfo) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            app,
        }
    }

    /// App-private storage: the store file and exported reports live here.
    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    #[must_use]
    pub fn app(&self) -> &AppInfo {
        &self.app
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingStorageDir);
        }
        if self.app.name.trim().is_empty() {
            return Err(ConfigError::MissingAppName);
        }
        Ok(())
    }
}

/// Raw crash handler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrashSettings {
    /// Master switch; when off the handler only delegates.
    pub enabled: bool,
    /// Record lifecycle history for the report.
    pub track_activities: bool,
    /// Present the report even when the app is in the background.
    pub background_mode_enabled: bool,
    /// Recipients offered by the e-mail action.
    pub recipient_emails: Vec<String>,
}

impl Default for CrashSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            track_activities: false,
            background_mode_enabled: true,
            recipient_emails: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    crash_handler: CrashSettings,
}

impl CrashSettings {
    /// Parse the `[crash_handler]` table of a TOML document. A missing table
    /// yields the defaults.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let file: SettingsFile = toml::from_str(toml_str)?;
        Ok(file.crash_handler)
    }

    /// Read and parse a TOML settings file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&data)
    }

    /// Check the settings without side effects.
    pub fn validate(&self, app: &AppContext) -> Result<(), ConfigError> {
        app.validate()?;
        for (index, addr) in self.recipient_emails.iter().enumerate() {
            if !looks_like_email(addr) {
                return Err(ConfigError::InvalidRecipient {
                    index,
                    value: addr.clone(),
                });
            }
        }
        Ok(())
    }

    /// Validate, persist the recipient list and freeze the configuration.
    ///
    /// Only validation fails the build. A recipient list that cannot be
    /// persisted is logged and the configuration is still returned.
    pub fn build(
        &self,
        app: &AppContext,
        store: &dyn KeyValueStore,
    ) -> Result<CrashConfig, ConfigError> {
        self.validate(app)?;

        let recipient_emails: Vec<String> = self
            .recipient_emails
            .iter()
            .map(|addr| addr.trim().to_string())
            .collect();
        if let Err(e) = save_recipients(store, &recipient_emails) {
            tracing::warn!(error = %e, "Failed to persist recipient list; continuing");
        }

        tracing::debug!(
            enabled = self.enabled,
            track_activities = self.track_activities,
            background_mode_enabled = self.background_mode_enabled,
            recipients = recipient_emails.len(),
            "Built crash handler configuration"
        );

        Ok(CrashConfig {
            enabled: self.enabled,
            track_activities: self.track_activities,
            background_mode_enabled: self.background_mode_enabled,
            recipient_emails,
        })
    }
}

/// Immutable configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashConfig {
    enabled: bool,
    track_activities: bool,
    background_mode_enabled: bool,
    recipient_emails: Vec<String>,
}

impl CrashConfig {
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn track_activities(&self) -> bool {
        self.track_activities
    }

    #[must_use]
    pub fn background_mode_enabled(&self) -> bool {
        self.background_mode_enabled
    }

    #[must_use]
    pub fn recipient_emails(&self) -> &[String] {
        &self.recipient_emails
    }
}

fn looks_like_email(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return false;
    }

    let mut parts = trimmed.split('@');
    let local = parts.next().unwrap_or("");
    let domain = parts.next().unwrap_or("");
    if parts.next().is_some() {
        return false;
    }

    !local.is_empty() && !domain.is_empty() && domain.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KEY_MAILS, MemoryStore, load_recipients};

    fn app_ctx() -> AppContext {
        AppContext::new("/tmp/crashguard-test", AppInfo::new("Demo"))
    }

    #[test]
    fn defaults_match_documented_policy() {
        let settings = CrashSettings::default();
        assert!(settings.enabled);
        assert!(!settings.track_activities);
        assert!(settings.background_mode_enabled);
        assert!(settings.recipient_emails.is_empty());
    }

    #[test]
    fn parses_crash_handler_table() {
        let settings = CrashSettings::from_toml_str(
            r#"
            [crash_handler]
            track_activities = true
            background_mode_enabled = false
            recipient_emails = ["ops@example.com"]
            "#,
        )
        .unwrap();
        assert!(settings.enabled);
        assert!(settings.track_activities);
        assert!(!settings.background_mode_enabled);
        assert_eq!(settings.recipient_emails, vec!["ops@example.com"]);
    }

    #[test]
    fn missing_table_yields_defaults() {
        let settings = CrashSettings::from_toml_str("[other]\nkey = 1\n").unwrap();
        assert_eq!(settings, CrashSettings::default());
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = CrashSettings::from_toml_str("[crash_handler]\nenabled = maybe").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = CrashSettings::from_file(Path::new("/nonexistent/crashguard.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn build_persists_recipients() {
        let store = MemoryStore::new();
        let settings = CrashSettings {
            recipient_emails: vec![" ops@example.com ".to_string(), "dev@example.org".to_string()],
            ..CrashSettings::default()
        };
        let config = settings.build(&app_ctx(), &store).unwrap();

        assert_eq!(
            config.recipient_emails(),
            &["ops@example.com".to_string(), "dev@example.org".to_string()]
        );
        assert_eq!(
            load_recipients(&store).unwrap(),
            vec!["ops@example.com", "dev@example.org"]
        );
    }

    #[test]
    fn build_persists_empty_list() {
        let store = MemoryStore::new();
        CrashSettings::default().build(&app_ctx(), &store).unwrap();
        assert_eq!(store.get_string(KEY_MAILS).unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn rejects_missing_storage_dir() {
        let ctx = AppContext::new("", AppInfo::new("Demo"));
        let err = CrashSettings::default()
            .build(&ctx, &MemoryStore::new())
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingStorageDir));
    }

    #[test]
    fn rejects_missing_app_name() {
        let ctx = AppContext::new("/tmp/x", AppInfo::new("  "));
        let err = CrashSettings::default().validate(&ctx).unwrap_err();
        assert!(matches!(err, ConfigError::MissingAppName));
    }

    #[test]
    fn rejects_invalid_recipient_without_persisting() {
        let store = MemoryStore::new();
        let settings = CrashSettings {
            recipient_emails: vec!["ok@example.com".to_string(), "not-an-email".to_string()],
            ..CrashSettings::default()
        };
        let err = settings.build(&app_ctx(), &store).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRecipient { index: 1, .. }));
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn store_failure_does_not_fail_build() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let settings = CrashSettings {
            recipient_emails: vec![" ops@example.com ".to_string()],
            ..CrashSettings::default()
        };
        let config = settings.build(&app_ctx(), &store).unwrap();
        assert!(config.enabled());
        assert_eq!(config.recipient_emails(), ["ops@example.com"]);
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn email_heuristic() {
        assert!(looks_like_email("a@b.co"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("a@@b.co"));
        assert!(!looks_like_email("@b.co"));
        assert!(!looks_like_email("a b@c.co"));
        assert!(!looks_like_email(""));
    }

    #[test]
    fn default_storage_dir_ends_with_name() {
        if let Some(dir) = default_storage_dir() {
            assert!(dir.ends_with(DEFAULT_DIR_NAME));
        }
    }
}
