//! Diagnostic report assembly.
//!
//! A report is plain text with a fixed section order:
//!
//! ```text
//! DEVICE INFO      host, OS, memory, ...
//! APP INFO         version, package, install/update dates, current date
//! ERROR LOG        the captured stack trace (truncated past 131071 chars)
//! USER ACTIVITIES  lifecycle history (only when tracked and non-empty)
//! END OF LOG
//! ```
//!
//! [`build_report`] is a pure function of its inputs. [`DiagnosticEpisode`]
//! wraps it with memoization so every consumer of one fault (view, copy,
//! share, save, email) sees byte-identical text.

use std::borrow::Cow;
use std::fmt::Display;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::presenter::PresenterPayload;

/// Maximum number of stack trace characters kept in a report.
pub const MAX_STACK_TRACE_SIZE: usize = 131_071;

/// Suffix appended to a truncated stack trace.
pub const TRUNCATION_SUFFIX: &str = " [truncated]";

/// Placeholder for any field that cannot be retrieved.
pub const NOT_AVAILABLE: &str = "Not available";

/// Separator line under each section title.
pub const SEPARATOR: &str = "======================================================";

/// Date format used in the APP INFO section and export file names.
pub const REPORT_DATE_FORMAT: &str = "%d-%m-%Y_%H:%M:%S";

const NL: &str = "\n";

/// Host and device facts. Every field is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub locale: Option<String>,
    pub host: Option<String>,
    pub os: Option<String>,
    pub os_family: Option<String>,
    pub arch: Option<String>,
    pub cpu_count: Option<usize>,
    pub pid: Option<u32>,
    pub total_memory_bytes: Option<u64>,
    pub available_memory_bytes: Option<u64>,
}

impl DeviceInfo {
    /// Probe the running host. Never fails; missing data stays `None`.
    #[must_use]
    pub fn detect() -> Self {
        let (total_memory_bytes, available_memory_bytes) = detect_memory_bytes();
        Self {
            locale: detect_locale(),
            host: detect_host_name(),
            os: Some(std::env::consts::OS.to_string()),
            os_family: Some(std::env::consts::FAMILY.to_string()),
            arch: Some(std::env::consts::ARCH.to_string()),
            cpu_count: std::thread::available_parallelism().ok().map(|n| n.get()),
            pid: Some(std::process::id()),
            total_memory_bytes,
            available_memory_bytes,
        }
    }
}

/// Facts about the application that crashed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    /// Human-readable application name.
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Package / bundle identifier.
    #[serde(default)]
    pub package: Option<String>,
    #[serde(default)]
    pub installed_on: Option<NaiveDateTime>,
    #[serde(default)]
    pub updated_on: Option<NaiveDateTime>,
}

impl AppInfo {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }

    /// Fill install/update times from the running executable's metadata
    /// where they are not already set.
    #[must_use]
    pub fn with_executable_times(mut self) -> Self {
        let metadata = std::env::current_exe()
            .ok()
            .and_then(|path| std::fs::metadata(path).ok());
        if let Some(meta) = metadata {
            if self.installed_on.is_none() {
                self.installed_on = meta.created().ok().map(system_time_to_local);
            }
            if self.updated_on.is_none() {
                self.updated_on = meta.modified().ok().map(system_time_to_local);
            }
        }
        self
    }
}

fn system_time_to_local(t: std::time::SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(t).naive_local()
}

/// Supplies device and app facts to a report.
pub trait InfoProvider: Send + Sync {
    fn device_info(&self) -> DeviceInfo;
    fn app_info(&self) -> AppInfo;
}

/// Probes the live host for device info; app info is fixed at construction.
#[derive(Debug, Clone)]
pub struct HostInfoProvider {
    app: AppInfo,
}

impl HostInfoProvider {
    #[must_use]
    pub fn new(app: AppInfo) -> Self {
        Self { app }
    }
}

impl InfoProvider for HostInfoProvider {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo::detect()
    }

    fn app_info(&self) -> AppInfo {
        self.app.clone()
    }
}

/// Fixed facts, for tests and deterministic rendering.
#[derive(Debug, Clone, Default)]
pub struct StaticInfoProvider {
    pub device: DeviceInfo,
    pub app: AppInfo,
}

impl InfoProvider for StaticInfoProvider {
    fn device_info(&self) -> DeviceInfo {
        self.device.clone()
    }

    fn app_info(&self) -> AppInfo {
        self.app.clone()
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Keep the first [`MAX_STACK_TRACE_SIZE`] characters and mark the cut.
#[must_use]
pub fn truncate_stack_trace(stack_trace: &str) -> Cow<'_, str> {
    match stack_trace.char_indices().nth(MAX_STACK_TRACE_SIZE) {
        Some((cut, _)) => {
            let mut truncated = String::with_capacity(cut + TRUNCATION_SUFFIX.len());
            truncated.push_str(&stack_trace[..cut]);
            truncated.push_str(TRUNCATION_SUFFIX);
            Cow::Owned(truncated)
        }
        None => Cow::Borrowed(stack_trace),
    }
}

/// Assemble the report text.
///
/// `activity_log` is rendered only when present and non-empty.
#[must_use]
pub fn build_report(
    stack_trace: &str,
    activity_log: Option<&str>,
    device: &DeviceInfo,
    app: &AppInfo,
    generated_at: NaiveDateTime,
) -> String {
    let mut report = String::with_capacity(stack_trace.len().min(MAX_STACK_TRACE_SIZE) + 2048);

    section(&mut report, "DEVICE INFO");
    field(&mut report, "Locale", device.locale.as_ref());
    field(&mut report, "Host", device.host.as_ref());
    field(&mut report, "OS", device.os.as_ref());
    field(&mut report, "OS Family", device.os_family.as_ref());
    field(&mut report, "Architecture", device.arch.as_ref());
    field(&mut report, "CPU Cores", device.cpu_count.as_ref());
    field(&mut report, "Process ID", device.pid.as_ref());
    field(
        &mut report,
        "Total Memory",
        device.total_memory_bytes.map(format_megabytes).as_ref(),
    );
    field(
        &mut report,
        "Available Memory",
        device.available_memory_bytes.map(format_megabytes).as_ref(),
    );

    section(&mut report, "APP INFO");
    let name = Some(app.name.as_str()).filter(|n| !n.trim().is_empty());
    field(&mut report, "Application", name.as_ref());
    field(&mut report, "Version", app.version.as_ref());
    field(&mut report, "Package", app.package.as_ref());
    field(
        &mut report,
        "Installed On",
        app.installed_on.map(format_report_date).as_ref(),
    );
    field(
        &mut report,
        "Updated On",
        app.updated_on.map(format_report_date).as_ref(),
    );
    field(
        &mut report,
        "Current Date",
        Some(format_report_date(generated_at)).as_ref(),
    );

    section(&mut report, "ERROR LOG");
    report.push_str(&truncate_stack_trace(stack_trace));
    report.push_str(NL);

    if let Some(log) = activity_log.filter(|l| !l.is_empty()) {
        section(&mut report, "USER ACTIVITIES");
        report.push_str(log);
        report.push_str(NL);
    }

    report.push_str(NL);
    report.push_str(SEPARATOR);
    report.push_str(NL);
    report.push_str("END OF LOG");
    report.push_str(NL);
    report.push_str(SEPARATOR);
    report.push_str(NL);

    report
}

fn section(report: &mut String, title: &str) {
    report.push_str(NL);
    report.push_str(title);
    report.push_str(NL);
    report.push_str(SEPARATOR);
    report.push_str(NL);
}

fn field<T: Display>(report: &mut String, label: &str, value: Option<&T>) {
    let rendered = value
        .map(ToString::to_string)
        .filter(|v| !v.trim().is_empty());
    report.push_str(label);
    report.push_str(" : ");
    report.push_str(rendered.as_deref().unwrap_or(NOT_AVAILABLE));
    report.push_str(NL);
}

/// `dd-MM-yyyy_HH:mm:ss`
#[must_use]
pub fn format_report_date(t: NaiveDateTime) -> String {
    t.format(REPORT_DATE_FORMAT).to_string()
}

fn format_megabytes(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

// ---------------------------------------------------------------------------
// Episode
// ---------------------------------------------------------------------------

/// One fault's diagnostic episode: the payload plus its lazily built,
/// memoized report.
pub struct DiagnosticEpisode {
    payload: PresenterPayload,
    info: Arc<dyn InfoProvider>,
    generated_at: NaiveDateTime,
    report: OnceLock<String>,
}

impl std::fmt::Debug for DiagnosticEpisode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticEpisode")
            .field("payload", &self.payload)
            .field("generated_at", &self.generated_at)
            .field("report_built", &self.is_report_built())
            .finish_non_exhaustive()
    }
}

impl DiagnosticEpisode {
    /// Start an episode stamped with the current local time.
    #[must_use]
    pub fn new(payload: PresenterPayload, info: Arc<dyn InfoProvider>) -> Self {
        Self::at(payload, info, Local::now().naive_local())
    }

    /// Start an episode with an explicit generation time (for deterministic tests).
    #[must_use]
    pub fn at(
        payload: PresenterPayload,
        info: Arc<dyn InfoProvider>,
        generated_at: NaiveDateTime,
    ) -> Self {
        Self {
            payload,
            info,
            generated_at,
            report: OnceLock::new(),
        }
    }

    #[must_use]
    pub fn payload(&self) -> &PresenterPayload {
        &self.payload
    }

    #[must_use]
    pub fn generated_at(&self) -> NaiveDateTime {
        self.generated_at
    }

    /// The report, built on first access and cached for the episode.
    pub fn report(&self) -> &str {
        self.report.get_or_init(|| {
            let device = self.info.device_info();
            let app = self
                .payload
                .app
                .clone()
                .unwrap_or_else(|| self.info.app_info());
            let report = build_report(
                &self.payload.stack_trace,
                self.payload.activity_log.as_deref(),
                &device,
                &app,
                self.generated_at,
            );
            tracing::debug!(bytes = report.len(), "Built diagnostic report");
            report
        })
    }

    /// Whether [`Self::report`] has been called yet.
    #[must_use]
    pub fn is_report_built(&self) -> bool {
        self.report.get().is_some()
    }
}

// ---------------------------------------------------------------------------
// Host probes
// ---------------------------------------------------------------------------

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn detect_locale() -> Option<String> {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .find_map(|key| non_empty_env(key))
}

fn detect_host_name() -> Option<String> {
    non_empty_env("HOSTNAME")
        .or_else(|| non_empty_env("COMPUTERNAME"))
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

#[cfg(target_os = "linux")]
fn detect_memory_bytes() -> (Option<u64>, Option<u64>) {
    let Ok(contents) = std::fs::read_to_string("/proc/meminfo") else {
        return (None, None);
    };
    parse_meminfo(&contents)
}

#[cfg(not(target_os = "linux"))]
fn detect_memory_bytes() -> (Option<u64>, Option<u64>) {
    (None, None)
}

/// Extract `MemTotal` / `MemAvailable` (kB) from `/proc/meminfo` text.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_meminfo(contents: &str) -> (Option<u64>, Option<u64>) {
    let read_kb = |prefix: &str| {
        contents.lines().find_map(|line| {
            line.strip_prefix(prefix)?
                .split_whitespace()
                .next()?
                .parse::<u64>()
                .ok()?
                .checked_mul(1024)
        })
    };
    (read_kb("MemTotal:"), read_kb("MemAvailable:"))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn test_device() -> DeviceInfo {
        DeviceInfo {
            locale: Some("en_US.UTF-8".to_string()),
            host: Some("build-01".to_string()),
            os: Some("linux".to_string()),
            os_family: Some("unix".to_string()),
            arch: Some("x86_64".to_string()),
            cpu_count: Some(8),
            pid: Some(4242),
            total_memory_bytes: Some(16 * 1024 * 1024 * 1024),
            available_memory_bytes: Some(1536 * 1024 * 1024),
        }
    }

    fn test_app() -> AppInfo {
        AppInfo {
            name: "Demo".to_string(),
            version: Some("1.2.3".to_string()),
            package: Some("com.example.demo".to_string()),
            installed_on: Some(at(9, 0, 0)),
            updated_on: Some(at(10, 30, 15)),
        }
    }

    #[test]
    fn short_stack_trace_is_unchanged() {
        let trace = "x".repeat(100);
        assert!(matches!(truncate_stack_trace(&trace), Cow::Borrowed(_)));
        assert_eq!(truncate_stack_trace(&trace), trace);
    }

    #[test]
    fn stack_trace_at_limit_is_unchanged() {
        let trace = "y".repeat(MAX_STACK_TRACE_SIZE);
        assert_eq!(truncate_stack_trace(&trace).len(), MAX_STACK_TRACE_SIZE);
    }

    #[test]
    fn long_stack_trace_is_truncated() {
        let trace = "z".repeat(200_000);
        let truncated = truncate_stack_trace(&trace);
        assert_eq!(
            truncated,
            format!("{}{}", "z".repeat(MAX_STACK_TRACE_SIZE), TRUNCATION_SUFFIX)
        );
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let trace = "é".repeat(MAX_STACK_TRACE_SIZE + 5);
        let truncated = truncate_stack_trace(&trace);
        let kept = truncated.strip_suffix(TRUNCATION_SUFFIX).unwrap();
        assert_eq!(kept.chars().count(), MAX_STACK_TRACE_SIZE);
    }

    #[test]
    fn report_sections_are_ordered() {
        let report = build_report(
            "boom",
            Some("2024-03-09 14:05:00: A created\n"),
            &test_device(),
            &test_app(),
            at(11, 0, 0),
        );
        let positions: Vec<usize> = [
            "DEVICE INFO",
            "APP INFO",
            "ERROR LOG",
            "USER ACTIVITIES",
            "END OF LOG",
        ]
        .iter()
        .map(|title| report.find(title).unwrap())
        .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{report}");
    }

    #[test]
    fn report_golden_layout() {
        let report = build_report(
            "java.lang.NullPointerException\n\tat X",
            Some("2024-03-09 14:05:00: A created\n"),
            &test_device(),
            &test_app(),
            at(11, 0, 0),
        );
        let expected = format!(
            "\nDEVICE INFO\n{SEPARATOR}\n\
             Locale : en_US.UTF-8\n\
             Host : build-01\n\
             OS : linux\n\
             OS Family : unix\n\
             Architecture : x86_64\n\
             CPU Cores : 8\n\
             Process ID : 4242\n\
             Total Memory : 16384.00 MB\n\
             Available Memory : 1536.00 MB\n\
             \nAPP INFO\n{SEPARATOR}\n\
             Application : Demo\n\
             Version : 1.2.3\n\
             Package : com.example.demo\n\
             Installed On : 09-03-2024_09:00:00\n\
             Updated On : 09-03-2024_10:30:15\n\
             Current Date : 09-03-2024_11:00:00\n\
             \nERROR LOG\n{SEPARATOR}\n\
             java.lang.NullPointerException\n\tat X\n\
             \nUSER ACTIVITIES\n{SEPARATOR}\n\
             2024-03-09 14:05:00: A created\n\n\
             \n{SEPARATOR}\nEND OF LOG\n{SEPARATOR}\n"
        );
        assert_eq!(report, expected);
    }

    #[test]
    fn missing_fields_render_placeholder() {
        let report = build_report(
            "boom",
            None,
            &DeviceInfo::default(),
            &AppInfo::default(),
            at(11, 0, 0),
        );
        assert!(report.contains("Locale : Not available\n"));
        assert!(report.contains("Total Memory : Not available\n"));
        assert!(report.contains("Application : Not available\n"));
        assert!(report.contains("Version : Not available\n"));
        assert!(report.contains("Installed On : Not available\n"));
        assert!(report.contains("Current Date : 09-03-2024_11:00:00\n"));
    }

    #[test]
    fn activity_section_omitted_without_log() {
        let none = build_report("boom", None, &test_device(), &test_app(), at(1, 0, 0));
        let empty = build_report("boom", Some(""), &test_device(), &test_app(), at(1, 0, 0));
        assert!(!none.contains("USER ACTIVITIES"));
        assert!(!empty.contains("USER ACTIVITIES"));
    }

    #[test]
    fn only_stack_trace_is_truncated() {
        let long_log = "a".repeat(MAX_STACK_TRACE_SIZE + 10);
        let report = build_report(
            &"s".repeat(MAX_STACK_TRACE_SIZE + 10),
            Some(&long_log),
            &test_device(),
            &test_app(),
            at(1, 0, 0),
        );
        assert_eq!(report.matches(TRUNCATION_SUFFIX).count(), 1);
        assert!(report.contains(&long_log));
    }

    #[test]
    fn episode_report_is_memoized() {
        let provider = Arc::new(StaticInfoProvider {
            device: test_device(),
            app: test_app(),
        });
        let episode = DiagnosticEpisode::at(
            PresenterPayload::new("boom", None),
            provider,
            at(12, 0, 0),
        );
        assert!(!episode.is_report_built());

        let first = episode.report();
        let second = episode.report();
        assert!(episode.is_report_built());
        assert_eq!(first, second);
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn episode_prefers_payload_app_info() {
        let provider = Arc::new(StaticInfoProvider {
            device: test_device(),
            app: AppInfo::new("FromProvider"),
        });
        let mut payload = PresenterPayload::new("boom", None);
        payload.app = Some(AppInfo::new("FromPayload"));
        let episode = DiagnosticEpisode::at(payload, provider, at(12, 0, 0));

        assert!(episode.report().contains("Application : FromPayload\n"));
    }

    #[test]
    fn parse_meminfo_reads_total_and_available() {
        let text = "MemTotal:       16318412 kB\nMemFree:  100 kB\nMemAvailable:    8000000 kB\n";
        assert_eq!(
            parse_meminfo(text),
            (Some(16_318_412 * 1024), Some(8_000_000 * 1024))
        );
        assert_eq!(parse_meminfo("garbage"), (None, None));
    }

    #[test]
    fn parse_meminfo_overflowing_value_is_unavailable() {
        let text = format!("MemTotal: {} kB\nMemAvailable: 4 kB\n", u64::MAX);
        assert_eq!(parse_meminfo(&text), (None, Some(4096)));
    }

    #[test]
    fn device_detect_reports_platform() {
        let device = DeviceInfo::detect();
        assert_eq!(device.os.as_deref(), Some(std::env::consts::OS));
        assert_eq!(device.pid, Some(std::process::id()));
    }

    #[test]
    fn app_info_builders() {
        let app = AppInfo::new("Demo")
            .with_version("2.0")
            .with_package("com.example");
        assert_eq!(app.version.as_deref(), Some("2.0"));
        assert_eq!(app.package.as_deref(), Some("com.example"));
    }

    proptest! {
        #[test]
        fn truncated_trace_never_exceeds_limit(len in 0usize..300_000) {
            let trace = "q".repeat(len);
            let out = truncate_stack_trace(&trace);
            if len > MAX_STACK_TRACE_SIZE {
                prop_assert_eq!(out.len(), MAX_STACK_TRACE_SIZE + TRUNCATION_SUFFIX.len());
                prop_assert!(out.ends_with(TRUNCATION_SUFFIX));
            } else {
                prop_assert_eq!(out.len(), len);
            }
        }
    }
}
