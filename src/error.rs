//! Error types.
//!
//! Failures stay close to where they happen: a device that cannot be opened is
//! skipped with a warning, a backend whose discovery fails sits out the
//! session, and only conditions the caller must act on surface as `Err`.

use thiserror::Error;

/// Errors starting a [`Session`](crate::Session).
#[derive(Debug, Error)]
pub enum InitError {
    /// Another session is live in this process. Quit it (or drop it) first.
    #[error("an input session is already running")]
    AlreadyRunning,
}

/// Errors raised inside a capture backend.
///
/// These are logged and contained by the session: `Discovery` disables the
/// backend for the run, `Open` skips the device, `Read` retires it.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Device enumeration failed wholesale (missing subsystem, no permission).
    #[error("device discovery failed: {0}")]
    Discovery(String),

    /// A single device could not be opened for raw capture.
    #[error("{path}: open failed: {reason}")]
    Open { path: String, reason: String },

    /// A raw channel died mid-session.
    #[error("{path}: read failed: {reason}")]
    Read { path: String, reason: String },
}

impl BackendError {
    pub(crate) fn open(path: impl Into<String>, reason: impl ToString) -> Self {
        BackendError::Open {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn read(path: impl Into<String>, reason: impl ToString) -> Self {
        BackendError::Read {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors loading a [`SessionConfig`](crate::SessionConfig) from disk.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
