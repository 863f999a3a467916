use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::DeviceClient;
use super::HeaterStatus;
use crate::error::Error;
use crate::error::Result;

/// Path of the heater's status document.
pub const STATUS_PATH: &str = "/control-status";

/// Fields of the status document the bridge reads. Anything else the heater
/// sends is ignored.
#[derive(Debug, Deserialize)]
struct StatusPayload {
    ambient_temperature: f64,
    set_temperature: f64,
}

/// Real heater client implementation using reqwest
pub struct HttpDeviceClient {
    base_url: String,

    /// `None` once closed
    client: Mutex<Option<Client>>,
}

impl HttpDeviceClient {
    /// Create a client for `http://{host}:{port}`.
    ///
    /// Building the client performs no network I/O.
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                Error::InvalidConfiguration(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            base_url: format!("http://{}:{}", host, port),
            client: Mutex::new(Some(client)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Client>> {
        // Nothing panics while holding the lock, but a poisoned Option<Client>
        // is still coherent.
        self.client.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Translate a status document into a `HeaterStatus`.
///
/// Both fields must be present and numeric.
pub(crate) fn parse_status(body: &[u8]) -> Result<HeaterStatus> {
    let payload: StatusPayload =
        serde_json::from_slice(body).map_err(|e| Error::MalformedResponse(e.to_string()))?;

    Ok(HeaterStatus {
        current_temperature: payload.ambient_temperature,
        target_temperature: payload.set_temperature,
    })
}

#[async_trait]
impl DeviceClient for HttpDeviceClient {
    async fn fetch_status(&self) -> Result<HeaterStatus> {
        // reqwest::Client is a cheap handle; clone it out so the lock is not
        // held across the request.
        let client = self
            .lock()
            .clone()
            .ok_or_else(|| Error::DeviceUnreachable("client closed".to_string()))?;

        let url = format!("{}{}", self.base_url, STATUS_PATH);
        debug!("GET {}", url);

        let response = client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::DeviceUnreachable(format!("request to {} timed out", url))
            } else {
                Error::DeviceUnreachable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::MalformedResponse(format!(
                "unexpected HTTP status {} from {}",
                status, url
            )));
        }

        let body = response.bytes().await?;
        parse_status(&body)
    }

    async fn close(&self) -> Result<()> {
        if self.lock().take().is_some() {
            debug!("Closed client for {}", self.base_url);
        }
        Ok(())
    }
}
