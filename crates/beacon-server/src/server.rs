//! `BeaconServer` — Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, instrument, warn};

use beacon_auth::TokenVerifier;

use crate::config::ServerConfig;
use crate::context::BrokerContext;
use crate::health::{self, HealthResponse};
use crate::metrics::WS_REJECTED_TOTAL;
use crate::shutdown::ShutdownCoordinator;
use crate::timers;
use crate::websocket::session::run_connection;

/// Generates UUIDv7 request IDs.
#[derive(Clone)]
struct UuidV7RequestId;

impl MakeRequestId for UuidV7RequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::now_v7().to_string();
        axum::http::HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registries, groups, and configuration.
    pub ctx: Arc<BrokerContext>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Handshake token verifier.
    pub verifier: Arc<TokenVerifier>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus metrics handle for rendering.
    pub metrics_handle: Arc<PrometheusHandle>,
}

/// The broker server.
pub struct BeaconServer {
    ctx: Arc<BrokerContext>,
    shutdown: Arc<ShutdownCoordinator>,
    verifier: Arc<TokenVerifier>,
    metrics_handle: Arc<PrometheusHandle>,
    start_time: Instant,
}

impl BeaconServer {
    /// Create a new server around fresh broker state.
    #[must_use]
    pub fn new(config: ServerConfig, metrics_handle: PrometheusHandle) -> Self {
        let verifier = Arc::new(TokenVerifier::new(&config.auth_secret));
        Self {
            ctx: Arc::new(BrokerContext::new(config)),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            verifier,
            metrics_handle: Arc::new(metrics_handle),
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes and middleware.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            shutdown: self.shutdown.clone(),
            verifier: self.verifier.clone(),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
        };

        let cors = match &self.ctx.config.cors_origin {
            Some(origin) => match origin.parse::<HeaderValue>() {
                Ok(value) => CorsLayer::new().allow_origin(value),
                Err(_) => {
                    warn!(origin, "invalid CORS origin, falling back to permissive");
                    CorsLayer::permissive()
                }
            },
            None => CorsLayer::permissive(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws", get(ws_upgrade_handler))
            .with_state(state)
            // Outermost layers execute first on request, last on response.
            .layer(CatchPanicLayer::new())
            .layer(cors)
            .layer(RequestBodyLimitLayer::new(64 * 1024))
            .layer(TimeoutLayer::with_status_code(
                StatusCode::REQUEST_TIMEOUT,
                Duration::from_secs(30),
            ))
            .layer(SetRequestIdLayer::x_request_id(UuidV7RequestId))
            .layer(PropagateRequestIdLayer::x_request_id())
    }

    /// Start the periodic heartbeat/session scans, tracked for shutdown.
    pub fn start_scans(&self) {
        let handle = tokio::spawn(timers::run_scans(self.ctx.clone(), self.shutdown.token()));
        self.shutdown.register_task(handle);
    }

    /// Bind to a TCP port and start serving. Returns the bound address and a
    /// join handle for the server task.
    #[instrument(skip_all, fields(host = %self.ctx.config.host, port = self.ctx.config.port))]
    pub async fn listen(
        &self,
    ) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
        let addr = format!("{}:{}", self.ctx.config.host, self.ctx.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "server started");

        let router = self.router();
        let shutdown_token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    info!("server shutdown initiated");
                })
                .await;
            info!("server shutdown complete");
        });

        Ok((bound_addr, handle))
    }

    /// Shared broker state.
    #[must_use]
    pub fn context(&self) -> &Arc<BrokerContext> {
        &self.ctx
    }

    /// Shutdown coordinator.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.ctx.groups.count().await;
    let resp = health::health_check(
        state.start_time,
        connections,
        state.ctx.presence.online_producer_count(),
        state.ctx.sessions.active_count(),
    );
    Json(resp)
}

/// GET /metrics — Prometheus text format.
async fn metrics_handler(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// GET /ws — authenticated WebSocket upgrade.
///
/// The handshake token rides the `token` query parameter; a missing or
/// invalid token closes the connection with 401 before any event dispatch.
async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    let current = state.ctx.groups.count().await;
    if current >= state.ctx.config.max_connections {
        counter!(WS_REJECTED_TOTAL, "reason" => "capacity").increment(1);
        warn!(current, max = state.ctx.config.max_connections, "connection limit reached");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    let Some(token) = query.token else {
        counter!(WS_REJECTED_TOTAL, "reason" => "missing_token").increment(1);
        return Err(StatusCode::UNAUTHORIZED);
    };
    let identity = match state.verifier.verify(&token) {
        Ok(identity) => identity,
        Err(e) => {
            counter!(WS_REJECTED_TOTAL, "reason" => "invalid_token").increment(1);
            warn!(error = %e, "handshake token rejected");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    let ctx = state.ctx;
    let max_message_size = ctx.config.max_message_size;
    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| run_connection(socket, identity, ctx)))
}
