//! Bridge assembly and teardown.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;

use crate::accessory::Category;
use crate::accessory::HeaterAccessory;
use crate::config::DeviceDescriptor;
use crate::config::PollSettings;
use crate::device::DeviceClient;
use crate::error::Error;
use crate::error::Result;
use crate::error::ShutdownFailure;

/// Accessory id of the bridge itself. Heaters are numbered from 2.
pub const BRIDGE_AID: u64 = 1;

/// Container accessory holding every heater, in configuration order.
pub struct Bridge {
    name: String,
    accessories: Vec<Arc<HeaterAccessory>>,
}

impl Bridge {
    /// Build one HTTP-backed accessory per descriptor.
    ///
    /// No network I/O happens here; only the refresh loop talks to heaters.
    pub fn assemble(
        name: impl Into<String>,
        descriptors: &[DeviceDescriptor],
        poll: PollSettings,
    ) -> Result<Self> {
        Self::build(name.into(), descriptors, |aid, descriptor| {
            HeaterAccessory::new(aid, descriptor.clone(), poll)
        })
    }

    /// Like [`Bridge::assemble`], with clients supplied by `make_client`.
    pub fn assemble_with<F>(
        name: impl Into<String>,
        descriptors: &[DeviceDescriptor],
        poll: PollSettings,
        mut make_client: F,
    ) -> Result<Self>
    where
        F: FnMut(&DeviceDescriptor) -> Result<Arc<dyn DeviceClient>>,
    {
        Self::build(name.into(), descriptors, |aid, descriptor| {
            let client = make_client(descriptor)?;
            Ok(HeaterAccessory::with_client(
                aid,
                descriptor.clone(),
                client,
                poll,
            ))
        })
    }

    fn build<F>(name: String, descriptors: &[DeviceDescriptor], mut make: F) -> Result<Self>
    where
        F: FnMut(u64, &DeviceDescriptor) -> Result<HeaterAccessory>,
    {
        // Reject duplicates before constructing anything
        let mut seen = HashSet::new();
        for descriptor in descriptors {
            if !seen.insert(descriptor.name.as_str()) {
                return Err(Error::DuplicateDescriptor(descriptor.name.clone()));
            }
        }

        let accessories = descriptors
            .iter()
            .zip(BRIDGE_AID + 1..)
            .map(|(descriptor, aid)| make(aid, descriptor).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        info!(
            "Assembled bridge '{}' with {} heater(s)",
            name,
            accessories.len()
        );

        Ok(Self { name, accessories })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aid(&self) -> u64 {
        BRIDGE_AID
    }

    pub fn category(&self) -> Category {
        Category::Bridge
    }

    pub fn accessories(&self) -> &[Arc<HeaterAccessory>] {
        &self.accessories
    }

    /// Look up a heater by accessory id.
    pub fn accessory(&self, aid: u64) -> Option<&Arc<HeaterAccessory>> {
        self.accessories.iter().find(|a| a.aid() == aid)
    }

    pub fn len(&self) -> usize {
        self.accessories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessories.is_empty()
    }

    /// Start every accessory's refresh loop.
    pub fn start_polling(&self) {
        for accessory in &self.accessories {
            accessory.start_polling();
        }
        info!("Polling {} heater(s)", self.accessories.len());
    }

    /// Stop every accessory concurrently and wait for all of them.
    ///
    /// One accessory failing to stop does not prevent the others from
    /// stopping; all failures are returned together as `ShutdownFailure`.
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping {} accessory(ies)", self.accessories.len());

        let handles: Vec<(String, JoinHandle<Result<()>>)> = self
            .accessories
            .iter()
            .map(|accessory| {
                let accessory = Arc::clone(accessory);
                let name = accessory.name().to_string();
                (name, tokio::spawn(async move { accessory.stop().await }))
            })
            .collect();

        let mut failure = ShutdownFailure::default();
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => failure.failures.push((name, e)),
                Err(e) => {
                    error!("[{}] Stop task failed: {}", name, e);
                    failure.failures.push((name, Error::TaskFailed(e.to_string())));
                }
            }
        }

        if failure.is_empty() {
            info!("All accessories stopped");
            Ok(())
        } else {
            Err(Error::ShutdownFailure(failure))
        }
    }
}
