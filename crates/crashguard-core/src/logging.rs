//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events; binaries call [`init_logging`]
//! once at startup. Logs go to stderr so stdout stays free for command
//! output. `CRASHGUARD_LOG` overrides the level with any `EnvFilter`
//! directive, e.g. `CRASHGUARD_LOG=crashguard_core=debug`.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::error::LoggingError;

/// Environment variable holding the filter directive.
pub const LOG_ENV_VAR: &str = "CRASHGUARD_LOG";

/// Level used when neither the caller nor the environment names one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Plain,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plain" | "text" | "pretty" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Pick the filter directive: `CRASHGUARD_LOG` wins, then `level`, then
/// [`DEFAULT_LOG_LEVEL`].
#[must_use]
pub fn resolve_directive(env_value: Option<&str>, level: Option<&str>) -> String {
    env_value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| level.map(str::trim).filter(|v| !v.is_empty()))
        .unwrap_or(DEFAULT_LOG_LEVEL)
        .to_string()
}

/// Install the global subscriber.
pub fn init_logging(format: LogFormat, level: Option<&str>) -> Result<(), LoggingError> {
    let env_value = std::env::var(LOG_ENV_VAR).ok();
    let directive = resolve_directive(env_value.as_deref(), level);
    let filter = EnvFilter::try_new(&directive).map_err(|source| LoggingError::Filter {
        directive: directive.clone(),
        source,
    })?;

    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Plain => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
    }

    tracing::debug!(%directive, ?format, "Logging initialized");
    Ok(())
}
