//! Configuration loading from TOML
//!
//! # Configuration File Format
//!
//! ```toml
//! [sensor]
//! host = "10.0.0.3"
//! port = 4141
//! failover = true
//! read_timeout_ms = 0      # 0 = block indefinitely
//!
//! [parser]
//! frame_id = "m_series"
//! return_selection = "all" # or "max" / "first" / "last"
//! degrees_per_cloud = 360.0
//! minimum_cloud_size = 1000
//! maximum_cloud_size = 1000000
//! # sensor = "mq8"         # force one vertical-angle preset on all parsers
//! # vertical_angles = [-0.3185, -0.2692, -0.218, -0.1652, -0.111, -0.0558, 0.0, 0.0558]
//! ```
//!
//! Every `[parser]` key is optional; omitted keys keep the parser defaults
//! (each packet type keeps its own factory angle preset unless `sensor` or
//! `vertical_angles` overrides it). The `host` may instead come from the
//! command line, which takes precedence.

use crate::error::{Error, Result};
use crate::parsers::{CloudAccumulator, ReturnSelection, SensorType};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default sensor data port
pub const DEFAULT_PORT: u16 = 4141;

/// Connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    /// Sensor hostname or IP address
    #[serde(default)]
    pub host: Option<String>,

    /// Sensor TCP port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Accept header-less legacy buffers
    #[serde(default = "default_failover")]
    pub failover: bool,

    /// Socket read deadline in milliseconds, 0 to block indefinitely
    #[serde(default)]
    pub read_timeout_ms: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_failover() -> bool {
    true
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: DEFAULT_PORT,
            failover: true,
            read_timeout_ms: 0,
        }
    }
}

impl SensorConfig {
    /// Read deadline as a duration, `None` when disabled
    pub fn read_timeout(&self) -> Option<Duration> {
        if self.read_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.read_timeout_ms))
        }
    }
}

/// Cloud assembly settings applied to every M-series parser
#[derive(Debug, Clone, Deserialize)]
pub struct ParserConfig {
    /// Coordinate frame stamped into emitted clouds
    #[serde(default = "default_frame_id")]
    pub frame_id: String,

    /// "all", "max", "first" or "last"
    #[serde(default)]
    pub return_selection: Option<String>,

    /// Azimuth sweep per cloud in degrees, (0, 360]
    #[serde(default)]
    pub degrees_per_cloud: Option<f64>,

    /// Smallest cloud worth emitting, in points
    #[serde(default)]
    pub minimum_cloud_size: Option<i32>,

    /// Point count at which accumulation stops until the next boundary
    #[serde(default)]
    pub maximum_cloud_size: Option<i32>,

    /// Force one factory angle preset ("m8" or "mq8") on all parsers
    #[serde(default)]
    pub sensor: Option<String>,

    /// Explicit beam elevations in radians, ring 0 first; wins over `sensor`
    #[serde(default)]
    pub vertical_angles: Option<Vec<f64>>,
}

fn default_frame_id() -> String {
    "m_series".to_string()
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            frame_id: default_frame_id(),
            return_selection: None,
            degrees_per_cloud: None,
            minimum_cloud_size: None,
            maximum_cloud_size: None,
            sensor: None,
            vertical_angles: None,
        }
    }
}

/// Root configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub parser: ParserConfig,
}

impl Config {
    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;

        let config: Config = basic_toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Check every parser setting without touching a real parser
    pub fn validate(&self) -> Result<()> {
        self.apply_to(&mut CloudAccumulator::new())
    }

    /// Push the `[parser]` settings into one accumulator
    pub fn apply_to(&self, accumulator: &mut CloudAccumulator) -> Result<()> {
        accumulator.set_frame_id(&self.parser.frame_id);

        if let Some(ref selection) = self.parser.return_selection {
            accumulator.set_return_selection(parse_return_selection(selection)?)?;
        }
        if let Some(degrees) = self.parser.degrees_per_cloud {
            accumulator.set_degrees_per_cloud(degrees)?;
        }
        if self.parser.minimum_cloud_size.is_some() || self.parser.maximum_cloud_size.is_some() {
            accumulator.set_cloud_size_limits(
                self.parser.minimum_cloud_size.unwrap_or(0),
                self.parser.maximum_cloud_size.unwrap_or(0),
            )?;
        }
        if let Some(ref sensor) = self.parser.sensor {
            accumulator.set_sensor_type(parse_sensor_type(sensor)?);
        }
        if let Some(ref angles) = self.parser.vertical_angles {
            accumulator.set_vertical_angles(angles)?;
        }

        Ok(())
    }
}

fn parse_return_selection(name: &str) -> Result<ReturnSelection> {
    match name.to_ascii_lowercase().as_str() {
        "all" => Ok(ReturnSelection::All),
        "max" => Ok(ReturnSelection::MAX),
        "first" => Ok(ReturnSelection::FIRST),
        "last" => Ok(ReturnSelection::LAST),
        other => Err(Error::Config(format!(
            "unknown return selection {other:?} (expected all, max, first or last)"
        ))),
    }
}

fn parse_sensor_type(name: &str) -> Result<SensorType> {
    match name.to_ascii_lowercase().as_str() {
        "m8" => Ok(SensorType::M8),
        "mq8" => Ok(SensorType::MQ8),
        other => Err(Error::UnknownSensor(other.to_string())),
    }
}
