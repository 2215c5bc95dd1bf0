//! Error types for configuration loading and the serial session

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Problems reading or parsing the configuration file
///
/// These never abort startup: callers fall back to defaults.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {format} config {}: {reason}", .path.display())]
    Parse {
        path: PathBuf,
        format: &'static str,
        reason: String,
    },
}

/// Errors raised by the serial session
#[derive(Debug, Error)]
pub enum SessionError {
    /// The device could not be opened (missing, busy, permission denied)
    #[error("failed to open serial port {path}: {source}")]
    Connection {
        path: String,
        #[source]
        source: serialport::Error,
    },

    /// The channel rejected a write
    #[error("failed to write to serial port: {0}")]
    Write(#[source] io::Error),

    /// The receive loop hit a channel-level failure
    #[error("failed to read from serial port: {0}")]
    Read(#[source] io::Error),

    #[error("serial session is closed")]
    Closed,
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;
