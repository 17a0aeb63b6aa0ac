//! Configuration loading using Figment
//!
//! Settings are assembled from, in increasing order of precedence:
//! 1. Built-in defaults (the values the sensor driver has always shipped with)
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `DYNPICK_` (`__` separates levels)
//!
//! ```text
//! DYNPICK_LOG_LEVEL=debug
//! DYNPICK_DEVICE__PATH=/dev/ttyUSB1
//! DYNPICK_RESET__COMMAND_COUNT=5
//! ```
//!
//! Command-line overrides are applied on top by the binary, which then calls
//! [`Settings::validate`] again.

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level driver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Sensor and acquisition settings
    pub device: DeviceConfig,
    /// Read retry and drain limits
    pub retry: RetrySettings,
    /// Offset reset behaviour
    pub reset: ResetSettings,
}

/// Sensor connection and acquisition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial device path (e.g., "/dev/ttyUSB0")
    pub path: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Frame identifier attached to every published reading
    pub frame_id: String,
    /// Sampling loop rate in Hz
    pub rate_hz: f64,
    /// Query the sensor for its calibration factors at startup
    pub acquire_calibration: bool,
    /// Requested frequency divider; only 1, 2, 4 and 8 are applied
    pub frequency_divider: u8,
}

/// Limits for reading from and flushing the serial link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Consecutive empty reads tolerated before a read gives up
    pub max_empty_reads: u32,
    /// Pause between empty reads, in microseconds
    pub backoff_us: u64,
    /// Maximum read calls per drain
    pub drain_max_iterations: u32,
    /// Scratch buffer size used while draining
    pub drain_chunk: usize,
}

/// Offset reset settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetSettings {
    /// Reset commands sent per request; the sensor does not always act on one
    pub command_count: u32,
    /// How long a requester waits for the sequence, in ms (0 waits forever)
    pub timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            device: DeviceConfig::default(),
            retry: RetrySettings::default(),
            reset: ResetSettings::default(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            path: "/dev/ttyUSB0".to_string(),
            baud_rate: 921_600,
            frame_id: "/sensor".to_string(),
            rate_hz: 1000.0,
            acquire_calibration: true,
            frequency_divider: 1,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_empty_reads: 1000,
            backoff_us: 100,
            drain_max_iterations: 16,
            drain_chunk: 255,
        }
    }
}

impl Default for ResetSettings {
    fn default() -> Self {
        Self {
            command_count: 3,
            timeout_ms: 5000,
        }
    }
}

impl DeviceConfig {
    /// Nominal tick period derived from `rate_hz`.
    ///
    /// Only call this on settings that passed [`Settings::validate`].
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz)
    }
}

impl ResetSettings {
    /// Bounded wait for a reset requester, `None` when unbounded.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl Settings {
    /// Load defaults, merged with `DYNPICK_` environment variables.
    pub fn load() -> AppResult<Self> {
        Self::figment(None)
    }

    /// Load configuration from a specific TOML file path
    ///
    /// Values missing from the file keep their defaults. A missing file is
    /// treated as empty, as figment does for `Toml::file`.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::figment(Some(path.as_ref()))
    }

    fn figment(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let settings: Self = figment
            .merge(Env::prefixed("DYNPICK_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration after loading
    ///
    /// An unsupported frequency divider is deliberately accepted here; the
    /// handshake skips it with a warning instead of refusing to start.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.device.path.is_empty() {
            return Err(DaqError::Configuration(
                "device.path must not be empty".to_string(),
            ));
        }

        if self.device.frame_id.is_empty() {
            return Err(DaqError::Configuration(
                "device.frame_id must not be empty".to_string(),
            ));
        }

        if !(self.device.rate_hz.is_finite() && self.device.rate_hz > 0.0) {
            return Err(DaqError::Configuration(format!(
                "Invalid device.rate_hz {}. Must be a positive number",
                self.device.rate_hz
            )));
        }

        if Duration::try_from_secs_f64(1.0 / self.device.rate_hz).is_err() {
            return Err(DaqError::Configuration(format!(
                "Invalid device.rate_hz {}. Sampling period is out of range",
                self.device.rate_hz
            )));
        }

        if self.device.baud_rate == 0 {
            return Err(DaqError::Configuration(
                "device.baud_rate must be positive".to_string(),
            ));
        }

        if self.retry.max_empty_reads == 0 {
            return Err(DaqError::Configuration(
                "retry.max_empty_reads must be at least 1".to_string(),
            ));
        }

        if self.retry.drain_chunk == 0 {
            return Err(DaqError::Configuration(
                "retry.drain_chunk must be at least 1".to_string(),
            ));
        }

        if self.reset.command_count == 0 {
            return Err(DaqError::Configuration(
                "reset.command_count must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
