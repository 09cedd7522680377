//! Configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/roof.toml` (or a path given on the command line)
//! 2. Environment variables prefixed with `ROOF_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use roof_control::config::RoofConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RoofConfig::load()?;
//! config.validate()?;
//! println!("Roof: {}", config.application.name);
//! # Ok(())
//! # }
//! ```
//!
//! Override a nested key from the environment:
//! `ROOF_CONNECTION__FIRMATA__PORT=/dev/ttyUSB1`.

use crate::error::RoofError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
#[cfg(feature = "firmata")]
use roof_driver_firmata::FirmataConfig;
use roof_driver_mock::MockRoofConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/roof.toml";
pub const ENV_PREFIX: &str = "ROOF_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Upper bound on `motion.deadline_secs`.
pub const MAX_DEADLINE_SECS: f64 = 600.0;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoofConfig {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub motion: MotionSettings,
    #[serde(default)]
    pub interlock: InterlockConfig,
    #[serde(default)]
    pub park_state: ParkStateConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionKind {
    #[default]
    Firmata,
    Mock,
}

/// Which controller link to build, and its settings.
///
/// The driver tables are kept as raw TOML so that a config written for one
/// kind still loads when the other driver is compiled out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub kind: ConnectionKind,
    #[serde(default)]
    pub firmata: Option<toml::Value>,
    #[serde(default)]
    pub mock: Option<toml::Value>,
}

/// Motion controller timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionSettings {
    /// Hard cap on a single drive cycle
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: f64,
    /// Switch poll period while moving
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Extra ABORT attempts when a stop cannot be delivered
    #[serde(default = "default_stop_retries")]
    pub stop_retries: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterlockConfig {
    /// Closing is locked while this file exists
    #[serde(default)]
    pub close_lock_file: Option<PathBuf>,
    /// Opening is unsafe while this file exists
    #[serde(default)]
    pub unsafe_flag_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParkStateConfig {
    /// Park flag file (`parked` / `unparked`, removed when unknown)
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Three-field status line for dome scripting gateways
    #[serde(default)]
    pub status_file: Option<PathBuf>,
}

// Default value functions
fn default_name() -> String {
    "Roll-off Roof".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_deadline_secs() -> f64 {
    roof_core::DEFAULT_DEADLINE.as_secs_f64()
}

fn default_tick_interval_ms() -> u64 {
    roof_core::DEFAULT_TICK_INTERVAL.as_millis() as u64
}

fn default_stop_retries() -> u32 {
    roof_core::DEFAULT_STOP_RETRIES
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            stop_retries: default_stop_retries(),
        }
    }
}

impl MotionSettings {
    pub fn deadline(&self) -> Result<Duration, RoofError> {
        Duration::try_from_secs_f64(self.deadline_secs).map_err(|e| {
            RoofError::Configuration(format!("Invalid deadline_secs {}: {e}", self.deadline_secs))
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn motion_config(&self) -> Result<roof_core::MotionConfig, RoofError> {
        Ok(roof_core::MotionConfig::default()
            .with_deadline(self.deadline()?)
            .with_stop_retries(self.stop_retries))
    }
}

impl ConnectionConfig {
    #[cfg(feature = "firmata")]
    pub fn firmata_config(&self) -> Result<FirmataConfig, RoofError> {
        let table = self.firmata.clone().ok_or_else(|| {
            RoofError::Configuration("connection.kind = \"firmata\" requires [connection.firmata]".into())
        })?;
        table
            .try_into()
            .map_err(|e| RoofError::Configuration(format!("invalid [connection.firmata]: {e}")))
    }

    pub fn mock_config(&self) -> Result<MockRoofConfig, RoofError> {
        match self.mock.clone() {
            None => Ok(MockRoofConfig::default()),
            Some(table) => table
                .try_into()
                .map_err(|e| RoofError::Configuration(format!("invalid [connection.mock]: {e}"))),
        }
    }
}

impl RoofConfig {
    /// Load configuration from `config/roof.toml` and environment variables
    pub fn load() -> Result<Self, RoofError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and the environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, RoofError> {
        Ok(Self::figment(path.as_ref()).extract()?)
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(RoofConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), RoofError> {
        let invalid = |msg: String| Err(RoofError::Configuration(msg));

        if !VALID_LOG_LEVELS.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }
        if !VALID_LOG_FORMATS.contains(&self.application.log_format.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_LOG_FORMATS.join(", ")
            ));
        }

        let motion = &self.motion;
        if !motion.deadline_secs.is_finite()
            || motion.deadline_secs <= 0.0
            || motion.deadline_secs > MAX_DEADLINE_SECS
        {
            return invalid(format!(
                "Invalid deadline_secs {}. Must be positive and at most {MAX_DEADLINE_SECS}",
                motion.deadline_secs
            ));
        }
        if motion.tick_interval_ms == 0 {
            return invalid("tick_interval_ms must be positive".into());
        }
        if motion.tick_interval_ms as f64 >= motion.deadline_secs * 1000.0 {
            return invalid(format!(
                "tick_interval_ms {} must be shorter than the {}s deadline",
                motion.tick_interval_ms, motion.deadline_secs
            ));
        }
        if motion.stop_retries == 0 {
            return invalid("stop_retries must be at least 1".into());
        }

        match self.connection.kind {
            ConnectionKind::Mock => self
                .connection
                .mock_config()?
                .validate()
                .map_err(RoofError::Configuration)?,
            #[cfg(feature = "firmata")]
            ConnectionKind::Firmata => {
                let firmata = self.connection.firmata_config()?;
                firmata
                    .validate()
                    .map_err(|e| RoofError::Configuration(e.to_string()))?;
                // Each poll must finish inside one tick.
                if firmata.io_timeout_ms >= motion.tick_interval_ms {
                    return invalid(format!(
                        "connection.firmata.io_timeout_ms {} must be shorter than tick_interval_ms {}",
                        firmata.io_timeout_ms, motion.tick_interval_ms
                    ));
                }
            }
            #[cfg(not(feature = "firmata"))]
            ConnectionKind::Firmata => {
                return Err(RoofError::FeatureNotEnabled("firmata".into()));
            }
        }

        Ok(())
    }

    /// Switch to the simulated roof, keeping any `[connection.mock]` table.
    pub fn use_mock(&mut self) {
        self.connection.kind = ConnectionKind::Mock;
    }
}
