use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use strum::Display;
use tokio::sync::watch;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::characteristics::Category;
use super::characteristics::Characteristics;
use crate::config::DeviceDescriptor;
use crate::config::PollSettings;
use crate::device::DeviceClient;
use crate::device::HeaterStatus;
use crate::device::HttpDeviceClient;
use crate::error::Error;
use crate::error::Result;

/// Lifecycle of an accessory. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AccessoryState {
    Created,
    Polling,
    Stopping,
    Stopped,
}

/// Outcome counters of the refresh loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u64,
}

struct Lifecycle {
    state: AccessoryState,
    task: Option<JoinHandle<()>>,
}

/// One heater exposed through the bridge.
///
/// The refresh task is the only writer of the characteristic set; readers
/// take snapshots through [`HeaterAccessory::characteristics`] or follow
/// changes through [`HeaterAccessory::subscribe`].
pub struct HeaterAccessory {
    aid: u64,
    descriptor: DeviceDescriptor,
    client: Arc<dyn DeviceClient>,
    poll: PollSettings,
    characteristics: watch::Sender<Characteristics>,
    stats: Mutex<PollStats>,
    lifecycle: Mutex<Lifecycle>,
    // Held for the whole of stop() so later callers wait for the first.
    teardown: AsyncMutex<()>,
}

impl HeaterAccessory {
    /// Create an accessory talking HTTP to the heater in `descriptor`.
    pub fn new(aid: u64, descriptor: DeviceDescriptor, poll: PollSettings) -> Result<Self> {
        let client =
            HttpDeviceClient::new(&descriptor.host, descriptor.port, poll.request_timeout())?;
        Ok(Self::with_client(aid, descriptor, Arc::new(client), poll))
    }

    /// Create an accessory around an existing client.
    pub fn with_client(
        aid: u64,
        descriptor: DeviceDescriptor,
        client: Arc<dyn DeviceClient>,
        poll: PollSettings,
    ) -> Self {
        info!(
            heater = %descriptor.name,
            address = %descriptor.address(),
            aid,
            "Creating accessory"
        );

        let (characteristics, _) = watch::channel(Characteristics::initial());

        Self {
            aid,
            descriptor,
            client,
            poll,
            characteristics,
            stats: Mutex::new(PollStats::default()),
            lifecycle: Mutex::new(Lifecycle {
                state: AccessoryState::Created,
                task: None,
            }),
            teardown: AsyncMutex::new(()),
        }
    }

    pub fn aid(&self) -> u64 {
        self.aid
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn category(&self) -> Category {
        Category::Heater
    }

    pub fn state(&self) -> AccessoryState {
        self.lock_lifecycle().state
    }

    pub fn stats(&self) -> PollStats {
        *self.lock_stats()
    }

    /// Current characteristic values.
    pub fn characteristics(&self) -> Characteristics {
        *self.characteristics.borrow()
    }

    /// Follow characteristic changes. Only cycles that change a value notify.
    pub fn subscribe(&self) -> watch::Receiver<Characteristics> {
        self.characteristics.subscribe()
    }

    /// Spawn the refresh loop. Does nothing unless the accessory is `Created`.
    pub fn start_polling(self: &Arc<Self>) {
        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.state != AccessoryState::Created {
            debug!(
                heater = %self.name(),
                state = %lifecycle.state,
                "Ignoring start_polling"
            );
            return;
        }

        let accessory = Arc::clone(self);
        let interval = self.poll.interval();
        lifecycle.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                // Errors were already logged and counted by refresh().
                let _ = accessory.refresh().await;
            }
        }));
        lifecycle.state = AccessoryState::Polling;

        debug!(heater = %self.name(), ?interval, "Polling started");
    }

    /// Run one refresh cycle.
    ///
    /// On success both temperatures are published in one update. On failure
    /// the previous values stay in place. Once the accessory is stopping
    /// nothing is fetched or published.
    pub(crate) async fn refresh(&self) -> Result<HeaterStatus> {
        if !self.state().is_live() {
            return Err(stopped_error());
        }

        let status = match self.fetch_with_timeout().await {
            Ok(status) => status,
            Err(e) => {
                let consecutive = {
                    let mut stats = self.lock_stats();
                    stats.failures += 1;
                    stats.consecutive_failures += 1;
                    stats.consecutive_failures
                };
                warn!(
                    heater = %self.name(),
                    address = %self.descriptor.address(),
                    consecutive,
                    "Refresh failed: {}",
                    e
                );
                return Err(e);
            }
        };

        let (changed, recovered_after) = {
            // stop() flips the state under this lock, so nothing lands after it
            let lifecycle = self.lock_lifecycle();
            if !lifecycle.state.is_live() {
                return Err(stopped_error());
            }

            let recovered_after = {
                let mut stats = self.lock_stats();
                let previous_failures = stats.consecutive_failures;
                stats.successes += 1;
                stats.consecutive_failures = 0;
                previous_failures
            };
            let changed = self
                .characteristics
                .send_if_modified(|c| c.apply_status(&status));
            (changed, recovered_after)
        };

        if recovered_after > 0 {
            info!(
                heater = %self.name(),
                address = %self.descriptor.address(),
                failures = recovered_after,
                "Heater reachable again"
            );
        }
        if changed {
            debug!(
                heater = %self.name(),
                current = status.current_temperature,
                target = status.target_temperature,
                "Published new temperatures"
            );
        }
        Ok(status)
    }

    async fn fetch_with_timeout(&self) -> Result<HeaterStatus> {
        let timeout = self.poll.request_timeout();
        match tokio::time::timeout(timeout, self.client.fetch_status()).await {
            Ok(result) => result,
            Err(_) => Err(Error::DeviceUnreachable(format!(
                "no response within {}",
                format_duration(timeout)
            ))),
        }
    }

    /// Cancel the refresh task, wait for it, then close the client.
    ///
    /// Both steps are attempted even if the other fails. A concurrent call
    /// waits for the first to finish; any later call returns `Ok(())` without
    /// touching the client.
    pub async fn stop(&self) -> Result<()> {
        let _teardown = self.teardown.lock().await;

        let task = {
            let mut lifecycle = self.lock_lifecycle();
            match lifecycle.state {
                AccessoryState::Stopped => return Ok(()),
                // Stopping here means an earlier stop() was dropped midway
                AccessoryState::Created | AccessoryState::Polling | AccessoryState::Stopping => {
                    lifecycle.state = AccessoryState::Stopping;
                    lifecycle.task.take()
                }
            }
        };

        info!(heater = %self.name(), "Stopping accessory");

        let mut result = Ok(());

        if let Some(task) = task {
            task.abort();
            match task.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {
                    debug!(heater = %self.name(), "Refresh task cancelled")
                }
                Err(e) => {
                    warn!(heater = %self.name(), "Refresh task error: {}", e);
                    result = Err(Error::TaskFailed(e.to_string()));
                }
            }
        }

        if let Err(e) = self.client.close().await {
            warn!(heater = %self.name(), "Failed to close client: {}", e);
            if result.is_ok() {
                result = Err(e);
            }
        }

        self.lock_lifecycle().state = AccessoryState::Stopped;
        result
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_stats(&self) -> MutexGuard<'_, PollStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl AccessoryState {
    fn is_live(self) -> bool {
        matches!(self, AccessoryState::Created | AccessoryState::Polling)
    }
}

fn stopped_error() -> Error {
    Error::DeviceUnreachable("accessory stopped".to_string())
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessory::characteristics::TargetHeaterCoolerState;
    use crate::device::MockDeviceClient;

    fn descriptor(name: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(name, "10.0.0.5", 80)
    }

    fn accessory(client: Arc<MockDeviceClient>) -> Arc<HeaterAccessory> {
        Arc::new(HeaterAccessory::with_client(
            2,
            descriptor("Lounge"),
            client,
            PollSettings::default(),
        ))
    }

    #[test]
    fn test_heat_mode_set_at_construction() {
        let heater = accessory(Arc::new(MockDeviceClient::new()));
        assert_eq!(heater.state(), AccessoryState::Created);
        assert_eq!(
            heater.characteristics().target_state,
            TargetHeaterCoolerState::Heat
        );
        assert_eq!(heater.characteristics().current_temperature, 0.0);
        assert_eq!(heater.aid(), 2);
        assert_eq!(heater.name(), "Lounge");
    }

    #[tokio::test]
    async fn test_refresh_publishes_both_temperatures() {
        let client = Arc::new(MockDeviceClient::new().with_status(19.5, 21.0));
        let heater = accessory(client.clone());

        let status = heater.refresh().await.unwrap();
        assert_eq!(status.current_temperature, 19.5);

        let c = heater.characteristics();
        assert_eq!(c.current_temperature, 19.5);
        assert_eq!(c.target_temperature, 21.0);
        assert_eq!(heater.stats().successes, 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_values() {
        let client = Arc::new(
            MockDeviceClient::new()
                .with_status(18.0, 22.0)
                .with_error(Error::MalformedResponse("missing field".to_string()))
                .with_error(Error::DeviceUnreachable("timed out".to_string())),
        );
        let heater = accessory(client.clone());

        heater.refresh().await.unwrap();
        let before = heater.characteristics();

        let err = heater.refresh().await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
        assert_eq!(heater.characteristics(), before);

        let err = heater.refresh().await.unwrap_err();
        assert!(matches!(err, Error::DeviceUnreachable(_)));
        assert_eq!(heater.characteristics(), before);

        let stats = heater.stats();
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn test_target_state_never_changes() {
        let client = Arc::new(
            MockDeviceClient::new()
                .with_status(10.0, 5.0)
                .with_error(Error::DeviceUnreachable("down".to_string()))
                .with_status(25.0, 30.0),
        );
        let heater = accessory(client);

        for _ in 0..3 {
            let _ = heater.refresh().await;
            assert_eq!(
                heater.characteristics().target_state,
                TargetHeaterCoolerState::Heat
            );
        }
        assert_eq!(heater.stats().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let client = Arc::new(MockDeviceClient::new());
        let heater = accessory(client.clone());
        heater.start_polling();

        heater.stop().await.unwrap();
        heater.stop().await.unwrap();

        assert_eq!(heater.state(), AccessoryState::Stopped);
        assert_eq!(client.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_stop_waits_for_close() {
        let client = Arc::new(MockDeviceClient::new().with_close_delay(Duration::from_secs(1)));
        let heater = accessory(client.clone());
        heater.start_polling();

        let first = tokio::spawn({
            let heater = Arc::clone(&heater);
            async move { heater.stop().await }
        });
        // Let the first stop reach the slow close
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(heater.state(), AccessoryState::Stopping);

        heater.stop().await.unwrap();
        assert_eq!(heater.state(), AccessoryState::Stopped);
        assert_eq!(client.close_count(), 1);

        first.await.unwrap().unwrap();
        assert_eq!(client.close_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_after_stop_publishes_nothing() {
        let client = Arc::new(MockDeviceClient::new().with_status(1.0, 2.0));
        let heater = accessory(client.clone());

        heater.stop().await.unwrap();
        assert!(heater.refresh().await.is_err());

        assert_eq!(heater.characteristics(), Characteristics::initial());
        assert_eq!(heater.stats(), PollStats::default());
        assert_eq!(client.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_without_start_closes_client() {
        let client = Arc::new(MockDeviceClient::new());
        let heater = accessory(client.clone());

        heater.stop().await.unwrap();
        assert_eq!(heater.state(), AccessoryState::Stopped);
        assert_eq!(client.close_count(), 1);
        assert_eq!(client.fetch_count(), 0);

        // Stopped is terminal
        heater.start_polling();
        assert_eq!(heater.state(), AccessoryState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_reports_close_failure() {
        let client = Arc::new(MockDeviceClient::new().failing_close());
        let heater = accessory(client.clone());
        heater.start_polling();

        assert!(heater.stop().await.is_err());
        assert_eq!(heater.state(), AccessoryState::Stopped);
        assert_eq!(client.close_count(), 1);

        // Already stopped, the failing close is not retried
        heater.stop().await.unwrap();
        assert_eq!(client.close_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_runs_every_interval() {
        let client = Arc::new(
            MockDeviceClient::new()
                .with_status(17.0, 20.0)
                .with_status(18.5, 21.5),
        );
        let heater = accessory(client.clone());
        heater.start_polling();
        assert_eq!(heater.state(), AccessoryState::Polling);

        // Ticks at 0s, 5s and 10s; the third finds an empty script and fails.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(client.fetch_count(), 3);

        let c = heater.characteristics();
        assert_eq!(c.current_temperature, 18.5);
        assert_eq!(c.target_temperature, 21.5);
        assert_eq!(heater.stats().consecutive_failures, 1);

        heater.stop().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_device_times_out_before_next_cycle() {
        let client = Arc::new(
            MockDeviceClient::new()
                .with_status(20.0, 20.0)
                .with_delay(Duration::from_secs(60)),
        );
        let heater = accessory(client);

        let start = tokio::time::Instant::now();
        let err = heater.refresh().await.unwrap_err();
        assert!(matches!(err, Error::DeviceUnreachable(_)));
        assert_eq!(err.to_string(), "device unreachable: no response within 3s");
        assert!(start.elapsed() < PollSettings::default().interval());
        assert_eq!(heater.characteristics(), Characteristics::initial());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_in_flight_fetch() {
        let client = Arc::new(
            MockDeviceClient::new()
                .with_status(20.0, 20.0)
                .with_delay(Duration::from_secs(2)),
        );
        let heater = accessory(client.clone());
        heater.start_polling();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.fetch_count(), 1);

        heater.stop().await.unwrap();
        assert_eq!(heater.state(), AccessoryState::Stopped);
        assert_eq!(client.close_count(), 1);

        // The abandoned fetch never publishes
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(heater.characteristics(), Characteristics::initial());
        assert_eq!(client.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes_only() {
        let client = Arc::new(
            MockDeviceClient::new()
                .with_status(19.0, 21.0)
                .with_status(19.0, 21.0),
        );
        let heater = accessory(client);
        let mut rx = heater.subscribe();

        heater.refresh().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().current_temperature, 19.0);

        heater.refresh().await.unwrap();
        assert!(!rx.has_changed().unwrap());
    }
}
