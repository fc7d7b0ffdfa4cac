//! Per-request tunnel orchestration.
//!
//! # Responsibilities
//! - Run the upstream handshake before touching the caller's connection
//! - Hijack the caller's connection and answer it with the synthesized `101`
//! - Spawn the relay once hyper hands over the upgraded connection
//! - Keep the tunnel counted until both legs are closed

use axum::body::Body;
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::Response;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;

use crate::http::response::text_response;
use crate::net::{CloseMode, TunnelGuard, UpstreamLeg};
use crate::observability::metrics;
use crate::websocket::error::TunnelError;
use crate::websocket::hijack::hijack;
use crate::websocket::relay::{self, Leg};
use crate::websocket::response::switching_protocols;
use crate::websocket::state::{Tunnel, TunnelState};
use crate::websocket::upstream;
use crate::websocket::TunnelContext;

/// Handle a WebSocket upgrade request end to end.
///
/// Returns the response hyper writes to the caller: the `101` on success,
/// otherwise an HTTP error. On success the relay continues in the background.
pub async fn handle(ctx: TunnelContext, request_id: String, mut request: Request<Body>) -> Response {
    let guard = ctx.tracker.track();
    let mut tunnel = Tunnel::new(guard.id());

    tracing::info!(
        tunnel_id = %tunnel.id(),
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
        upstream = %ctx.target.dial_address(),
        "WebSocket upgrade request"
    );

    match establish(&ctx, &mut tunnel, &mut request).await {
        Ok((response, on_upgrade, leg)) => {
            metrics::record_tunnel("established");
            tokio::spawn(relay_when_upgraded(ctx, tunnel, guard, on_upgrade, leg));
            response
        }
        Err(e) => {
            tunnel.close();
            metrics::record_tunnel(e.reason());
            failure_response(&tunnel, &request_id, e)
        }
    }
}

/// Upstream handshake, hijack and `101` synthesis.
///
/// Any error drops whatever was opened so far, the upstream leg included.
async fn establish(
    ctx: &TunnelContext,
    tunnel: &mut Tunnel,
    request: &mut Request<Body>,
) -> Result<(Response, OnUpgrade, UpstreamLeg), TunnelError> {
    let (uri, headers) = (request.uri(), request.headers());
    let handshake = upstream::initiate(&ctx.target, &ctx.settings, &ctx.tls, uri, headers).await?;
    tunnel.advance(TunnelState::UpstreamEstablished)?;
    tracing::debug!(
        tunnel_id = %tunnel.id(),
        buffered = handshake.leg.pending().len(),
        "Upstream handshake complete"
    );

    let on_upgrade = hijack(request)?;
    tunnel.advance(TunnelState::Hijacked)?;

    let response = switching_protocols(request.headers(), &handshake.result)?;
    Ok((response, on_upgrade, handshake.leg))
}

async fn relay_when_upgraded(
    ctx: TunnelContext,
    mut tunnel: Tunnel,
    guard: TunnelGuard,
    on_upgrade: OnUpgrade,
    leg: UpstreamLeg,
) {
    let upgraded = match on_upgrade.await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            tracing::warn!(tunnel_id = %tunnel.id(), error = %e, "Failed to send upgrade response");
            tunnel.close();
            return;
        }
    };

    if let Err(e) = tunnel.advance(TunnelState::Relaying) {
        tracing::error!(tunnel_id = %tunnel.id(), error = %e, "Tunnel not relayed");
        tunnel.close();
        return;
    }
    tracing::info!(tunnel_id = %tunnel.id(), "WebSocket connection established, relaying");

    let upstream_close = leg.close_mode();
    let report = relay::run(
        tunnel.id(),
        Leg::new(TokioIo::new(upgraded), CloseMode::HalfClose),
        Leg::new(leg, upstream_close),
        ctx.settings.close_deadline,
    )
    .await;

    tunnel.close();
    tracing::info!(
        tunnel_id = %tunnel.id(),
        client_to_upstream = report.client_to_upstream,
        upstream_to_client = report.upstream_to_client,
        "WebSocket tunnel closed"
    );
    drop(guard);
}

fn failure_response(tunnel: &Tunnel, request_id: &str, error: TunnelError) -> Response {
    let status = error.status_code();
    match &error {
        TunnelError::HijackUnsupported => {
            tracing::error!(tunnel_id = %tunnel.id(), request_id = %request_id, "Hijacking not supported");
            text_response(status, "Hijacking not supported")
        }
        TunnelError::MissingAcceptToken => {
            tracing::warn!(
                tunnel_id = %tunnel.id(),
                request_id = %request_id,
                error = %error,
                "Failed to send upgrade response"
            );
            let mut response = text_response(status, "Bad Gateway");
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
            response
        }
        TunnelError::InvalidTransition { .. } => {
            tracing::error!(tunnel_id = %tunnel.id(), request_id = %request_id, error = %error, "Tunnel aborted");
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
        _ => {
            tracing::warn!(
                tunnel_id = %tunnel.id(),
                request_id = %request_id,
                error = %error,
                "Backend WebSocket dial failed"
            );
            text_response(status, "Failed to connect to backend")
        }
    }
}
