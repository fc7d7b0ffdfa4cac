//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the single catch-all handler
//! - Wire up middleware (access gate, timeout, request ID, tracing)
//! - Bind server to listener and serve until shutdown
//! - Dispatch upgrade requests to the tunnel, everything else to pass-through
//! - Observability (metrics, correlation IDs)

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, Request},
    middleware,
    response::Response,
    routing::any,
    Router,
};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceExt;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::http::middleware::{access_control_middleware, AccessGate};
use crate::http::passthrough::{self, PassthroughClient};
use crate::http::request::{echo_request_id, set_request_id_layer, RequestIdExt};
use crate::lifecycle::StartupError;
use crate::net::{tls, TunnelTracker, UpstreamTarget};
use crate::observability::metrics;
use crate::websocket::{self, is_upgrade_request, TunnelContext, TunnelSettings};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub target: Arc<UpstreamTarget>,
    pub client: PassthroughClient,
    pub tunnels: TunnelContext,
    pub websocket_enabled: bool,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    tracker: TunnelTracker,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ProxyConfig) -> Result<Self, StartupError> {
        let target = Arc::new(UpstreamTarget::parse(&config.upstream.url)?);
        let tls = tls::client_config(config.upstream.tls_skip_verify)?;
        let tracker = TunnelTracker::new();

        let gate = match &config.access.verification_header {
            Some(name) if !name.is_empty() => Some(
                HeaderName::try_from(name.as_str())
                    .map_err(|_| StartupError::VerificationHeader(name.clone()))?,
            ),
            _ => None,
        };

        let state = AppState {
            client: passthrough::build_client(&tls),
            tunnels: TunnelContext {
                target: Arc::clone(&target),
                settings: TunnelSettings::from_config(&config),
                tls,
                tracker: tracker.clone(),
            },
            target,
            websocket_enabled: config.websocket.enabled,
        };

        let router = Self::build_router(&config, state, AccessGate::new(gate));
        Ok(Self {
            router,
            config,
            tracker,
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState, gate: AccessGate) -> Router {
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(middleware::from_fn_with_state(gate, access_control_middleware))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(middleware::from_fn(echo_request_id))
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upstream = %self.config.upstream.url,
            "HTTP server starting"
        );

        let builder = connection_builder();
        let graceful = GracefulShutdown::new();

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            };
            let (stream, peer) = match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let service = TowerToHyperService::new(self.router.clone().map_request(
                move |mut request: Request<Incoming>| {
                    request.extensions_mut().insert(ConnectInfo(peer));
                    request
                },
            ));
            let conn = builder
                .serve_connection_with_upgrades(TokioIo::new(stream), service)
                .into_owned();
            let conn = graceful.watch(conn);

            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    tracing::debug!(peer = %peer, error = %e, "Connection closed with error");
                }
            });
        }

        drop(listener);
        tracing::debug!(open_connections = graceful.count(), "Closing idle connections");
        graceful.shutdown().await;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Open-tunnel counter, shared with every tunnel this server starts.
    pub fn tracker(&self) -> TunnelTracker {
        self.tracker.clone()
    }
}

/// HTTP/1 settings for inbound connections.
///
/// Header names go out title-cased and without an automatic `date`, so a
/// synthesized `101` carries only its handshake headers.
fn connection_builder() -> Builder<TokioExecutor> {
    let mut builder = Builder::new(TokioExecutor::new());
    builder.http1().title_case_headers(true).auto_date_header(false);
    builder
}

/// Main gateway handler.
/// Tunnels WebSocket upgrades, proxies everything else.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start_time = Instant::now();
    let request_id = request.request_id();
    let method = request.method().to_string();

    if state.websocket_enabled && is_upgrade_request(request.headers()) {
        let response = websocket::tunnel::handle(state.tunnels.clone(), request_id, request).await;
        metrics::record_request(&method, response.status().as_u16(), "websocket", start_time);
        return response;
    }

    tracing::debug!(
        request_id = %request_id,
        method = %method,
        path = %request.uri().path(),
        "Proxying request"
    );

    let response = passthrough::forward(&state.client, &state.target, Some(peer), request).await;
    metrics::record_request(&method, response.status().as_u16(), "http", start_time);
    response
}
