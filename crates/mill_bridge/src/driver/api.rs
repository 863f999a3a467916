use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use strum::IntoEnumIterator;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;

use super::AccessoryDriver;
use crate::accessory::Characteristic;
use crate::accessory::CharacteristicValue;
use crate::accessory::HeaterAccessory;
use crate::bridge::Bridge;
use crate::error::Error;
use crate::error::Result;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    bridge: Option<String>,
}

#[derive(Serialize)]
struct PollStatsResponse {
    successes: u64,
    failures: u64,
    consecutive_failures: u64,
}

#[derive(Serialize)]
struct AccessoryResponse {
    aid: u64,
    name: String,
    category: u8,
    address: String,
    state: String,
    characteristics: BTreeMap<&'static str, CharacteristicValue>,
    poll: PollStatsResponse,
}

impl From<&HeaterAccessory> for AccessoryResponse {
    fn from(accessory: &HeaterAccessory) -> Self {
        let snapshot = accessory.characteristics();
        let stats = accessory.stats();
        Self {
            aid: accessory.aid(),
            name: accessory.name().to_string(),
            category: accessory.category().value(),
            address: accessory.descriptor().address(),
            state: accessory.state().to_string(),
            characteristics: Characteristic::iter()
                .map(|c| (c.into(), snapshot.value(c)))
                .collect(),
            poll: PollStatsResponse {
                successes: stats.successes,
                failures: stats.failures,
                consecutive_failures: stats.consecutive_failures,
            },
        }
    }
}

/// Response for the /v1/accessories endpoint
#[derive(Serialize)]
struct BridgeResponse {
    aid: u64,
    name: String,
    category: u8,
    accessories: Vec<AccessoryResponse>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    bridge: Option<Arc<Bridge>>,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            bridge: state.bridge.as_ref().map(|b| b.name().to_string()),
        }),
    )
}

/// Handler for GET /v1/accessories
#[tracing::instrument(skip(state))]
async fn accessories(State(state): State<Arc<AppState>>) -> Response {
    let Some(bridge) = &state.bridge else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    Json(BridgeResponse {
        aid: bridge.aid(),
        name: bridge.name().to_string(),
        category: bridge.category().value(),
        accessories: bridge
            .accessories()
            .iter()
            .map(|a| AccessoryResponse::from(a.as_ref()))
            .collect(),
    })
    .into_response()
}

/// Handler for GET /v1/accessories/{aid}
#[tracing::instrument(skip(state))]
async fn accessory(State(state): State<Arc<AppState>>, Path(aid): Path<u64>) -> Response {
    match state.bridge.as_ref().and_then(|b| b.accessory(aid)) {
        Some(accessory) => Json(AccessoryResponse::from(accessory.as_ref())).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/accessories", get(accessories))
        .route("/v1/accessories/:aid", get(accessory))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Read-only HTTP view of the bridge.
///
/// Serves characteristic values as JSON in place of a pairing-capable
/// accessory server.
pub struct StatusApiDriver {
    addr: SocketAddr,
    bridge: Option<Arc<Bridge>>,
}

impl StatusApiDriver {
    /// # Arguments
    /// * `listen` - The IP address to listen on (e.g., "0.0.0.0")
    /// * `port` - The port to listen on (e.g., 51826)
    pub fn new(listen: &str, port: u16) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", listen, port).parse().map_err(|e| {
            Error::InvalidConfiguration(format!(
                "invalid listen address '{}:{}': {}",
                listen, port, e
            ))
        })?;
        Ok(Self { addr, bridge: None })
    }

    fn router(&self) -> Router {
        create_router(Arc::new(AppState {
            version: env!("CARGO_PKG_VERSION"),
            bridge: self.bridge.clone(),
        }))
    }
}

#[async_trait]
impl AccessoryDriver for StatusApiDriver {
    fn add_bridge(&mut self, bridge: Arc<Bridge>) {
        self.bridge = Some(bridge);
    }

    async fn serve(&mut self, shutdown: oneshot::Receiver<()>) -> Result<()> {
        let app = self.router();

        tracing::info!("Starting status API on {}", self.addr);
        let listener = TcpListener::bind(self.addr).await?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown.await.ok();
                tracing::info!("Status API shutting down gracefully");
            })
            .await?;

        Ok(())
    }
}
