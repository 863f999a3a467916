//! Heater device access.
//!
//! A [`DeviceClient`] talks to one physical heater. The production
//! implementation is [`HttpDeviceClient`]; tests drive accessories with a
//! scripted mock instead.

mod http;

use async_trait::async_trait;

pub use http::HttpDeviceClient;
pub use http::STATUS_PATH;

use crate::error::Result;

/// Temperatures reported by a heater's status endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeaterStatus {
    pub current_temperature: f64,
    pub target_temperature: f64,
}

/// Trait for heater client operations
///
/// This trait allows for mocking the device for testing purposes
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Fetch the heater's current status.
    ///
    /// No retries happen here; the caller decides what a failure means.
    async fn fetch_status(&self) -> Result<HeaterStatus>;

    /// Release the underlying connection resource.
    ///
    /// Must be idempotent. Fetching after close fails with `DeviceUnreachable`.
    async fn close(&self) -> Result<()>;
}

#[cfg(test)]
pub use mock::MockDeviceClient;
