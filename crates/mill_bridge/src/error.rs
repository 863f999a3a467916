//! Error types for the bridge.
//!
//! Device errors (`DeviceUnreachable`, `MalformedResponse`) are produced by a
//! refresh cycle and never leave the accessory. Configuration errors abort
//! startup. `ShutdownFailure` collects every accessory that failed to stop.

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Connecting to the heater failed, timed out, or the client was closed.
    #[error("device unreachable: {0}")]
    DeviceUnreachable(String),

    /// The heater answered but not with a usable status document.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Two heaters were configured with the same display name.
    #[error("duplicate heater name '{0}'")]
    DuplicateDescriptor(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The refresh task ended with a panic instead of being cancelled.
    #[error("refresh task failed: {0}")]
    TaskFailed(String),

    #[error("{0}")]
    ShutdownFailure(ShutdownFailure),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Error::MalformedResponse(e.to_string())
        } else {
            Error::DeviceUnreachable(e.to_string())
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::InvalidConfiguration(e.to_string())
    }
}

/// Accessories that failed to stop, keyed by display name.
#[derive(Debug, Default)]
pub struct ShutdownFailure {
    pub failures: Vec<(String, Error)>,
}

impl ShutdownFailure {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for ShutdownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} accessory(ies) failed to stop",
            self.failures.len()
        )?;
        for (name, error) in &self.failures {
            write!(f, "; {}: {}", name, error)?;
        }
        Ok(())
    }
}
