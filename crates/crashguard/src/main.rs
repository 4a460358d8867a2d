//! crashguard CLI
//!
//! Inspect and reset the persisted crash state of an application, render
//! handed-off crash payloads, and list exported reports.
//!
//! # Usage
//!
//! ```bash
//! crashguard --storage-dir /var/lib/demo status
//! crashguard --storage-dir /var/lib/demo present pending_crash.json --save --email
//! crashguard --storage-dir /var/lib/demo reports --format json
//! crashguard --storage-dir /tmp/demo demo --message "boom"   # exits with 10
//! ```

#![forbid(unsafe_code)]

mod terminal;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;

use crashguard_core::actions::{email_draft, list_reports, save_report, share_draft};
use crashguard_core::config::default_storage_dir;
use crashguard_core::guard::CrashLoopGuard;
use crashguard_core::logging::{LogFormat, init_logging};
use crashguard_core::report::HostInfoProvider;
use crashguard_core::store::load_recipients;
use crashguard_core::{
    AppContext, AppInfo, CrashContext, CrashSettings, DiagnosticEpisode, FileStore,
    LifecycleEvent, LifecycleKind, PresenterPayload, ScreenId, ScreenInfo, install_panic_hook,
};

use crate::terminal::TerminalPresenter;

/// Crash handler state inspector and report presenter.
#[derive(Parser, Debug)]
#[command(name = "crashguard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// App-private storage directory (defaults to <data dir>/crashguard).
    #[arg(long, global = true, env = "CRASHGUARD_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Plain)]
    format: OutputFormat,

    /// TOML settings file with a [crash_handler] table.
    #[arg(long, global = true, env = "CRASHGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the last crash timestamp, debounce state and recipients.
    Status,

    /// Clear the stored crash timestamp.
    Reset,

    /// Render the report for a handed-off payload.
    Present {
        /// Payload JSON written by the handoff presenter.
        payload: PathBuf,

        /// Export the report to the storage directory.
        #[arg(long)]
        save: bool,

        /// Print a mailto: URI for the stored recipients.
        #[arg(long)]
        email: bool,

        /// Print the share draft metadata.
        #[arg(long)]
        share: bool,
    },

    /// List exported reports, newest first.
    Reports,

    /// Install the handler and panic (exits with status 10).
    Demo {
        /// Panic message.
        #[arg(long, default_value = "crashguard demo fault")]
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Plain,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_format = match cli.format {
        OutputFormat::Plain => LogFormat::Plain,
        OutputFormat::Json => LogFormat::Json,
    };
    let level = match cli.verbose {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    };
    if let Err(e) = init_logging(log_format, level) {
        eprintln!("crashguard: {e}");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let storage_dir = resolve_storage_dir(cli.storage_dir.as_deref())?;
    match &cli.command {
        Commands::Status => cmd_status(&storage_dir, cli.format),
        Commands::Reset => cmd_reset(&storage_dir, cli.format),
        Commands::Present {
            payload,
            save,
            email,
            share,
        } => cmd_present(&storage_dir, payload, *save, *email, *share, cli.format),
        Commands::Reports => cmd_reports(&storage_dir, cli.format),
        Commands::Demo { message } => cmd_demo(&storage_dir, cli.config.as_deref(), message),
    }
}

fn resolve_storage_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(dir) => Ok(dir.to_path_buf()),
        None => default_storage_dir()
            .context("no data directory on this platform; pass --storage-dir"),
    }
}

fn format_epoch_ms(ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|t| t.with_timezone(&Local).to_rfc3339())
}

fn cmd_status(storage_dir: &Path, format: OutputFormat) -> Result<()> {
    let store = Arc::new(FileStore::new(storage_dir));
    let guard = CrashLoopGuard::new(store.clone());
    let last = guard
        .last_crash_timestamp()
        .context("failed to read crash timestamp")?;
    let recent = guard.has_crashed_recently();
    let recipients = load_recipients(store.as_ref()).context("failed to read recipients")?;

    match format {
        OutputFormat::Json => {
            let out = json!({
                "storage_dir": storage_dir,
                "last_crash_timestamp": last,
                "last_crash_at": last.and_then(format_epoch_ms),
                "crashed_recently": recent,
                "recipients": recipients,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Plain => {
            println!("Storage: {}", storage_dir.display());
            match last {
                Some(ms) => println!(
                    "Last crash: {} ({ms})",
                    format_epoch_ms(ms).unwrap_or_else(|| "invalid timestamp".to_string())
                ),
                None => println!("Last crash: never"),
            }
            println!(
                "Within debounce window: {}",
                if recent { "yes" } else { "no" }
            );
            if recipients.is_empty() {
                println!("Recipients: none");
            } else {
                println!("Recipients: {}", recipients.join(", "));
            }
        }
    }
    Ok(())
}

fn cmd_reset(storage_dir: &Path, format: OutputFormat) -> Result<()> {
    let guard = CrashLoopGuard::new(Arc::new(FileStore::new(storage_dir)));
    guard.reset().context("failed to clear crash timestamp")?;
    tracing::info!(storage = %storage_dir.display(), "Cleared crash timestamp");
    match format {
        OutputFormat::Json => println!("{}", json!({ "reset": true })),
        OutputFormat::Plain => println!("Cleared last crash timestamp"),
    }
    Ok(())
}

fn cmd_present(
    storage_dir: &Path,
    payload_path: &Path,
    save: bool,
    email: bool,
    share: bool,
    format: OutputFormat,
) -> Result<()> {
    let payload = PresenterPayload::read_from(payload_path)
        .with_context(|| format!("failed to load payload {}", payload_path.display()))?;
    // Without app info in the payload the crashed app is unknown here.
    let app = payload.app.clone().unwrap_or_default();
    let episode = DiagnosticEpisode::new(payload, Arc::new(HostInfoProvider::new(app)));

    let mut warnings: Vec<String> = Vec::new();

    let saved_to = if save {
        match save_report(&episode, storage_dir) {
            Ok(path) => Some(path),
            Err(e) => {
                warnings.push(format!("could not save report: {e}"));
                None
            }
        }
    } else {
        None
    };

    let mailto = if email {
        match email_draft(&episode, &FileStore::new(storage_dir)) {
            Ok(draft) => Some(draft.mailto_uri()),
            Err(e) => {
                warnings.push(format!("could not prepare e-mail: {e}"));
                None
            }
        }
    } else {
        None
    };

    let share = share.then(|| share_draft(&episode));

    match format {
        OutputFormat::Json => {
            let out = json!({
                "report": episode.report(),
                "saved_to": saved_to,
                "mailto": mailto,
                "share": share.map(|d| json!({ "subject": d.subject, "mime_type": d.mime_type })),
                "warnings": warnings,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Plain => {
            print!("{}", episode.report());
            if let Some(path) = &saved_to {
                println!("Saved: {}", path.display());
            }
            if let Some(uri) = &mailto {
                println!("Mail: {uri}");
            }
            if let Some(draft) = &share {
                println!("Share: {} ({})", draft.subject, draft.mime_type);
            }
            for warning in &warnings {
                eprintln!("warning: {warning}");
            }
        }
    }
    Ok(())
}

fn cmd_reports(storage_dir: &Path, format: OutputFormat) -> Result<()> {
    let reports = list_reports(storage_dir).context("failed to list reports")?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Plain => {
            if reports.is_empty() {
                println!("No reports saved");
            }
            for report in &reports {
                println!(
                    "{}  {}",
                    report.saved_at.format("%Y-%m-%d %H:%M:%S"),
                    report.path.display()
                );
            }
        }
    }
    Ok(())
}

fn cmd_demo(storage_dir: &Path, config: Option<&Path>, message: &str) -> Result<()> {
    let settings = match config {
        Some(path) => CrashSettings::from_file(path)?,
        None => CrashSettings {
            track_activities: true,
            ..CrashSettings::default()
        },
    };
    let app = AppContext::new(
        storage_dir,
        AppInfo::new("crashguard-demo")
            .with_version(crashguard_core::VERSION)
            .with_package(env!("CARGO_PKG_NAME")),
    );
    let context = CrashContext::from_settings(app, &settings)
        .context("invalid crash handler settings")?
        .with_presenter(Arc::new(TerminalPresenter));

    let screen = ScreenInfo::new(ScreenId(1), "DemoScreen");
    for kind in [
        LifecycleKind::Created,
        LifecycleKind::Started,
        LifecycleKind::Resumed,
    ] {
        context
            .tracker()
            .record(&LifecycleEvent::now(screen.clone(), kind));
    }

    install_panic_hook(Arc::new(context));
    panic!("{message}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "crashguard",
            "status",
            "--format",
            "json",
            "--storage-dir",
            "/tmp/x",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.storage_dir.as_deref(), Some(Path::new("/tmp/x")));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn present_flags_parse() {
        let cli =
            Cli::try_parse_from(["crashguard", "present", "p.json", "--save", "--email"]).unwrap();
        match cli.command {
            Commands::Present {
                payload,
                save,
                email,
                share,
            } => {
                assert_eq!(payload, PathBuf::from("p.json"));
                assert!(save && email && !share);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn epoch_ms_formats() {
        assert!(format_epoch_ms(1_700_000_000_000).is_some());
    }
}
