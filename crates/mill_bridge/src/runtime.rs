//! Process lifecycle: assemble, serve, shut down.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::error;
use tracing::info;

use crate::bridge::Bridge;
use crate::config::DeviceDescriptor;
use crate::config::PollSettings;
use crate::device::DeviceClient;
use crate::driver::AccessoryDriver;
use crate::error::Result;

const DEFAULT_BRIDGE_NAME: &str = "Mill Heater Bridge";

type ClientFactory = Box<dyn FnMut(&DeviceDescriptor) -> Result<Arc<dyn DeviceClient>> + Send>;

/// Coordinates one driver and one bridge for the lifetime of the process.
pub struct Runtime<D: AccessoryDriver> {
    driver: D,
    bridge_name: String,
    poll: PollSettings,
    make_client: Option<ClientFactory>,
}

impl<D: AccessoryDriver> Runtime<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            bridge_name: DEFAULT_BRIDGE_NAME.to_string(),
            poll: PollSettings::default(),
            make_client: None,
        }
    }

    pub fn with_bridge_name(mut self, name: impl Into<String>) -> Self {
        self.bridge_name = name.into();
        self
    }

    pub fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Build device clients with `make_client` instead of HTTP.
    pub fn with_client_factory<F>(mut self, make_client: F) -> Self
    where
        F: FnMut(&DeviceDescriptor) -> Result<Arc<dyn DeviceClient>> + Send + 'static,
    {
        self.make_client = Some(Box::new(make_client));
        self
    }

    /// Run the bridge until `shutdown` resolves.
    ///
    /// Assembly errors are returned before any device I/O. Once serving has
    /// started every accessory is stopped on the way out, even if the driver
    /// failed; stop failures come back as one `ShutdownFailure`.
    pub async fn run<F>(mut self, descriptors: &[DeviceDescriptor], shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let assembled = match self.make_client.as_mut() {
            Some(make_client) => Bridge::assemble_with(
                self.bridge_name.as_str(),
                descriptors,
                self.poll,
                make_client,
            ),
            None => Bridge::assemble(self.bridge_name.as_str(), descriptors, self.poll),
        };
        let bridge = match assembled {
            Ok(bridge) => Arc::new(bridge),
            Err(e) => {
                error!("Failed to assemble bridge: {}", e);
                return Err(e);
            }
        };
        self.driver.add_bridge(Arc::clone(&bridge));
        bridge.start_polling();

        let (stop_tx, stop_rx) = oneshot::channel();
        let serve = self.driver.serve(stop_rx);
        tokio::pin!(serve);

        let served = tokio::select! {
            result = &mut serve => result,
            _ = shutdown => {
                info!("Shutdown requested");
                let _ = stop_tx.send(());
                serve.await
            }
        };

        if let Err(e) = &served {
            error!("Accessory driver failed: {}", e);
        }

        let stopped = bridge.stop().await;
        if let Err(e) = &stopped {
            error!("Shutdown incomplete: {}", e);
        }

        info!("Bridge '{}' shut down", bridge.name());
        served.and(stopped)
    }
}
