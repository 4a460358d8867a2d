//! Error types for crashguard-core.
//!
//! Each concern owns a small `thiserror` enum. None of these are ever raised
//! from inside the fault path itself: the handler logs them and keeps going.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Configuration could not be built from the supplied settings.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No storage directory was supplied for the application context.
    #[error("application context is missing a storage directory")]
    MissingStorageDir,

    /// The application name was empty.
    #[error("application context is missing an application name")]
    MissingAppName,

    /// A recipient did not look like an e-mail address.
    #[error("recipient_emails[{index}] is not a valid email address: {value:?}")]
    InvalidRecipient { index: usize, value: String },

    /// The settings file could not be read.
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The settings file was not valid TOML for [`crate::config::CrashSettings`].
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Durable key-value store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error while reading or committing the store file.
    #[error("store I/O error: {0}")]
    Io(#[from] io::Error),

    /// Store contents could not be (de)serialized.
    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// A key held a value of an unexpected type.
    #[error("store key {key} has unexpected type (expected {expected})")]
    WrongType { key: String, expected: &'static str },

    /// The in-memory store was configured to fail (test seam).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// File export failures. Reported to the user, never fatal.
#[derive(Error, Debug)]
pub enum ExportError {
    /// The export directory could not be created.
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The report file could not be written.
    #[error("failed to write report file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The export directory could not be listed.
    #[error("failed to read log directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No e-mail recipients are configured.
    #[error("no e-mail recipients configured")]
    NoRecipients,

    /// Reading recipients from the store failed.
    #[error("failed to load recipients: {0}")]
    Store(#[from] StoreError),
}

/// The presenter could not be launched.
#[derive(Error, Debug)]
pub enum PresentationError {
    /// No presenter is registered with the host.
    #[error("no diagnostic presenter available")]
    Unavailable,

    /// The payload could not be handed off.
    #[error("failed to hand off payload to {path}: {source}")]
    Handoff {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The presenter process could not be spawned.
    #[error("failed to launch presenter {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Payload serialization failed.
    #[error("payload serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// The global tracing subscriber could not be installed.
#[derive(Error, Debug)]
pub enum LoggingError {
    /// A subscriber was already set for this process.
    #[error("failed to initialize logging: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),

    /// The log level directive did not parse.
    #[error("invalid log filter {directive:?}: {source}")]
    Filter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
}
