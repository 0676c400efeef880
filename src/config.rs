//! Session configuration.
//!
//! Everything has a sensible default; embedders that care can tune the queue
//! and timing knobs in code or ship a small TOML file:
//!
//! ```toml
//! queue_capacity = 4096
//! capture_idle_ms = 1
//! shutdown_timeout_ms = 250
//! hid_fallback = false
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::queue::DEFAULT_CAPACITY;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Event ring capacity. `0` means unbounded.
    pub queue_capacity: usize,

    /// How long a capture thread sleeps when its devices are quiet.
    ///
    /// Lower is snappier, higher is cheaper; 2 ms is well under a USB mouse
    /// report interval.
    pub capture_idle_ms: u64,

    /// How long `quit` waits for each capture thread before detaching it.
    pub shutdown_timeout_ms: u64,

    /// Run the portable HID backend for hardware the native backends did not
    /// claim. No effect when the crate is built without the `hid` feature.
    pub hid_fallback: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            queue_capacity: DEFAULT_CAPACITY,
            capture_idle_ms: 2,
            shutdown_timeout_ms: 500,
            hid_fallback: true,
        }
    }
}

impl SessionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn capture_idle(&self) -> Duration {
        Duration::from_millis(self.capture_idle_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
