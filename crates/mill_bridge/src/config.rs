//! Configuration parsing and structures.
//!
//! Heaters come from an optional TOML file followed by `--heater` arguments.
//! Every problem found here is an `InvalidConfiguration` and aborts startup
//! before any device I/O happens.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;

use crate::error::Error;
use crate::error::Result;

/// Port used when an address has no `:port` suffix.
pub const DEFAULT_DEVICE_PORT: u16 = 80;

/// Where to poll one heater and what to call it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
        }
    }

    /// Parse a `host[:port]` address for the heater called `name`.
    pub fn parse(name: &str, address: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "heater at '{}' has an empty name",
                address
            )));
        }

        let (host, port) = match address.split_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    Error::InvalidConfiguration(format!(
                        "invalid port '{}' for heater '{}'",
                        port, name
                    ))
                })?;
                (host, port)
            }
            None => (address, DEFAULT_DEVICE_PORT),
        };

        if host.is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "empty host for heater '{}'",
                name
            )));
        }
        if port == 0 {
            return Err(Error::InvalidConfiguration(format!(
                "port 0 is not valid for heater '{}'",
                name
            )));
        }

        Ok(Self::new(name, host, port))
    }

    /// `host:port`, as used in logs and the status API.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Default, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(Error::InvalidConfiguration(format!(
                "invalid log level '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

impl LoggingConfig {
    /// Build a per-target filter from the default level and overrides.
    pub fn targets(&self) -> Targets {
        Targets::new()
            .with_default(LevelFilter::from(self.level))
            .with_targets(
                self.overrides
                    .iter()
                    .map(|(target, level)| (target.clone(), LevelFilter::from(*level))),
            )
    }
}

fn default_bridge_name() -> String {
    "Mill Heater Bridge".to_string()
}

fn default_listen() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    51826
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    3
}

/// Bridge-wide settings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Display name of the bridge accessory
    #[serde(default = "default_bridge_name")]
    pub name: String,

    /// Address the status API listens on
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Port the status API listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between refresh cycles
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Per-request timeout; must be shorter than the poll interval
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: default_bridge_name(),
            listen: default_listen(),
            port: default_port(),
            poll_interval_secs: default_poll_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// One `[[heaters]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaterConfig {
    pub name: String,

    /// `host[:port]`
    pub address: String,
}

/// Timing of the refresh loop, shared by every accessory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    interval: Duration,
    request_timeout: Duration,
}

impl PollSettings {
    pub fn new(interval: Duration, request_timeout: Duration) -> Result<Self> {
        if request_timeout.is_zero() {
            return Err(Error::InvalidConfiguration(
                "request timeout must be non-zero".to_string(),
            ));
        }
        if request_timeout >= interval {
            return Err(Error::InvalidConfiguration(format!(
                "request timeout ({:?}) must be shorter than the poll interval ({:?})",
                request_timeout, interval
            )));
        }
        Ok(Self {
            interval,
            request_timeout,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Upper bound on one `fetch_status`, always below `interval`.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(default_poll_interval_secs()),
            request_timeout: Duration::from_secs(default_request_timeout_secs()),
        }
    }
}

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub heaters: Vec<HeaterConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfiguration(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            Error::InvalidConfiguration(msg) => Error::InvalidConfiguration(format!(
                "Failed to parse '{}': {}",
                path.display(),
                msg
            )),
            other => other,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.bridge.name.trim().is_empty() {
            return Err(Error::InvalidConfiguration(
                "bridge name must not be empty".to_string(),
            ));
        }
        if self.bridge.listen.parse::<IpAddr>().is_err() {
            return Err(Error::InvalidConfiguration(format!(
                "invalid listen address '{}'",
                self.bridge.listen
            )));
        }
        self.poll_settings()?;
        Ok(())
    }

    pub fn poll_settings(&self) -> Result<PollSettings> {
        PollSettings::new(
            Duration::from_secs(self.bridge.poll_interval_secs),
            Duration::from_secs(self.bridge.request_timeout_secs),
        )
    }

    /// All heaters: file entries first, then `extra` `(name, address)` pairs
    /// from the command line.
    pub fn descriptors(&self, extra: &[(String, String)]) -> Result<Vec<DeviceDescriptor>> {
        let descriptors = self
            .heaters
            .iter()
            .map(|h| (h.name.as_str(), h.address.as_str()))
            .chain(extra.iter().map(|(n, a)| (n.as_str(), a.as_str())))
            .map(|(name, address)| DeviceDescriptor::parse(name, address))
            .collect::<Result<Vec<_>>>()?;

        if descriptors.is_empty() {
            return Err(Error::InvalidConfiguration(
                "no heaters configured; pass --heater NAME HOST[:PORT]".to_string(),
            ));
        }

        Ok(descriptors)
    }
}
