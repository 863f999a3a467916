//! Accessory-protocol drivers.
//!
//! A driver publishes the bridge to controllers. The runtime only needs to
//! hand it the bridge and let it serve until shutdown; everything about
//! advertisement and wire encoding belongs to the driver.

mod api;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

pub use api::StatusApiDriver;

use crate::bridge::Bridge;
use crate::error::Result;

#[async_trait]
pub trait AccessoryDriver: Send {
    /// Register the bridge whose accessories this driver serves.
    fn add_bridge(&mut self, bridge: Arc<Bridge>);

    /// Serve requests until `shutdown` fires (or its sender is dropped).
    async fn serve(&mut self, shutdown: oneshot::Receiver<()>) -> Result<()>;
}
