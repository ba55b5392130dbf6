use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, Encoder, IntCounterVec, TextEncoder};
use tokio::sync::oneshot;
use tracing::error;

use common_mm::events::EventBus;
use common_mm::rules::RulesRegistry;
use common_mm::session::SessionRegistry;
use common_mm::store::TicketStore;

pub mod ingress;
pub mod ws;

pub type BoxError = common_mm::BoxError;

pub const HEALTHZ_PATH: &str = "/healthz";
pub const VERSION_PATH: &str = "/version";
pub const METRICS_PATH: &str = "/metrics";
pub const WS_PATH: &str = "/ws";
pub const JOIN_QUEUE_PATH: &str = "/api/v1/join_queue";
pub const GAME_MODES_PATH: &str = "/api/v1/game_modes";
pub const POOL_STATUS_PATH: &str = "/api/v1/pool_status";

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "gateway_http_requests_total",
        "HTTP requests per route",
        &["path"]
    )
    .expect("register gateway_http_requests_total")
});

pub(crate) fn count_request(path: &str) {
    HTTP_REQUESTS_TOTAL.with_label_values(&[path]).inc();
}

/// Shared handles behind every route: the ticket store, the event bus, the
/// rules registry and the socket-session surface.
#[derive(Clone)]
pub struct AppState {
    pub store: TicketStore,
    pub bus: EventBus,
    pub rules: Arc<RulesRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub hub: Arc<ws::WsHub>,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct GatewaySettings {
    pub bind_addr: SocketAddr,
}

impl GatewaySettings {
    pub fn from_env() -> Result<Self, BoxError> {
        let bind_addr: SocketAddr = std::env::var("GATEWAY_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| Box::new(err) as BoxError)?;
        Ok(Self { bind_addr })
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".parse().expect("default gateway bind addr"),
        }
    }
}

pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub state: AppState,
    pub ready_tx: Option<oneshot::Sender<SocketAddr>>,
}

impl GatewayConfig {
    pub fn from_settings(settings: GatewaySettings, state: AppState) -> Self {
        Self {
            bind_addr: settings.bind_addr,
            state,
            ready_tx: None,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route(HEALTHZ_PATH, get(healthz))
        .route(VERSION_PATH, get(version))
        .route(METRICS_PATH, get(metrics))
        .route(WS_PATH, get(ws::ws_handler))
        .route(JOIN_QUEUE_PATH, post(ingress::join_queue))
        .route(GAME_MODES_PATH, get(ingress::game_modes))
        .route(POOL_STATUS_PATH, get(ingress::pool_status))
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    count_request("/");
    Json(serde_json::json!({
        "message": "Real-time scalable matchmaking engine"
    }))
}

async fn healthz() -> impl IntoResponse {
    count_request(HEALTHZ_PATH);
    StatusCode::OK
}

async fn version() -> impl IntoResponse {
    count_request(VERSION_PATH);
    Json(serde_json::json!({
        "name": "gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn metrics() -> impl IntoResponse {
    count_request(METRICS_PATH);
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        error!(%err, "metrics encode failed");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let body = String::from_utf8(buffer).unwrap_or_default();
    axum::response::Response::builder()
        .status(StatusCode::OK)
        .header(axum::http::header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(body))
        .unwrap()
}

pub async fn run(
    config: GatewayConfig,
    shutdown_rx: common_mm::shutdown::ShutdownReceiver,
) -> Result<(), BoxError> {
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .map_err(|err| Box::new(err) as BoxError)?;
    let local_addr = listener
        .local_addr()
        .map_err(|err| Box::new(err) as BoxError)?;
    if let Some(tx) = config.ready_tx {
        let _ = tx.send(local_addr);
    }

    tracing::info!(%local_addr, "gateway: listening");

    let app = build_router(config.state);
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app.into_make_service()).await {
            error!(%err, "gateway server stopped unexpectedly");
        }
    });

    common_mm::shutdown::wait(shutdown_rx).await;
    server.abort();
    Ok(())
}
