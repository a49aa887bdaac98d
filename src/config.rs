//! Per-device configuration.
//!
//! Loaded from TOML, e.g.
//!
//! ```toml
//! polled = true
//! poll_interval_ms = 8
//! input_buffers = 64
//! broadcast_raw_input = false
//! ```
//!
//! Missing keys take their defaults. Ranges are checked on load.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::buffer::{BASE_CAPACITY, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
use crate::error::ConfigError;

pub const DEFAULT_POLL_INTERVAL_MS: u32 = 200;
pub const MAX_POLL_INTERVAL_MS: u32 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Fetch input with `GetInputReport` on a timer instead of blocking in `ReadReport`.
    pub polled: bool,
    /// Poll period for polled devices. 0 makes reads opportunistic.
    pub poll_interval_ms: u32,
    /// Ring buffer capacity in reports.
    pub input_buffers: usize,
    /// Broadcast every input report on the raw-input bus.
    pub broadcast_raw_input: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            polled: false,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            input_buffers: BASE_CAPACITY,
            broadcast_raw_input: true,
        }
    }
}

impl DeviceConfig {
    /// Polled device with the given interval.
    pub fn polled(poll_interval_ms: u32) -> Self {
        Self {
            polled: true,
            poll_interval_ms,
            ..Self::default()
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms > MAX_POLL_INTERVAL_MS {
            return Err(ConfigError::OutOfRange {
                field: "poll_interval_ms",
                value: self.poll_interval_ms as u64,
                min: 0,
                max: MAX_POLL_INTERVAL_MS as u64,
            });
        }
        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&self.input_buffers) {
            return Err(ConfigError::OutOfRange {
                field: "input_buffers",
                value: self.input_buffers as u64,
                min: MIN_BUFFER_SIZE as u64,
                max: MAX_BUFFER_SIZE as u64,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_use_defaults() {
        let config = DeviceConfig::from_toml_str("polled = true").unwrap();
        assert!(config.polled);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.input_buffers, BASE_CAPACITY);
        assert!(config.broadcast_raw_input);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = DeviceConfig::from_toml_str("input_buffers = 1").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange { field: "input_buffers", value: 1, .. }
        ));
        let err = DeviceConfig::from_toml_str("poll_interval_ms = 10001").unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "poll_interval_ms", .. }));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            DeviceConfig::from_toml_str("polled = maybe"),
            Err(ConfigError::Toml(_))
        ));
    }
}
