//! Single-host reverse proxy for ordinary (non-upgrade) requests.
//!
//! # Responsibilities
//! - Rewrite the request URI onto the upstream (base path and query kept)
//! - Drop hop-by-hop headers in both directions, append `X-Forwarded-For`
//! - Stream request and response bodies through unchanged
//! - Answer any upstream failure with `502 Bad Gateway`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderName, HeaderValue, Request, Uri};
use axum::response::Response;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rustls::ClientConfig;

use crate::http::response::{bad_gateway, remove_hop_by_hop};
use crate::net::UpstreamTarget;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

pub type PassthroughClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Pooled HTTP/1.1 client sharing the tunnel's TLS settings.
pub fn build_client(tls: &Arc<ClientConfig>) -> PassthroughClient {
    let mut config = (**tls).clone();
    // The connector negotiates ALPN itself.
    config.alpn_protocols.clear();

    let connector = HttpsConnectorBuilder::new()
        .with_tls_config(config)
        .https_or_http()
        .enable_http1()
        .build();

    Client::builder(TokioExecutor::new()).build(connector)
}

/// Forward `request` to the upstream and stream its answer back.
pub async fn forward(
    client: &PassthroughClient,
    target: &UpstreamTarget,
    peer: Option<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();

    let uri = match upstream_uri(target, &parts.uri) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::error!(error = %e, "Proxy error");
            return bad_gateway();
        }
    };
    tracing::info!("{} {} -> {}", method, path, uri);

    // Host stays as the caller sent it.
    remove_hop_by_hop(&mut parts.headers);
    if let Some(peer) = peer {
        append_forwarded_for(&mut parts.headers, peer);
    }
    parts.uri = uri;
    // The pooled client speaks HTTP/1.1 upstream whatever the caller used.
    parts.version = axum::http::Version::HTTP_11;

    match client.request(Request::from_parts(parts, body)).await {
        Ok(response) => {
            let (mut parts, body) = response.into_parts();
            remove_hop_by_hop(&mut parts.headers);
            Response::from_parts(parts, Body::new(body))
        }
        Err(e) => {
            tracing::error!(error = %e, "Proxy error");
            bad_gateway()
        }
    }
}

/// Map the caller's URI onto the upstream.
///
/// The path is the upstream base path and the request path joined by exactly
/// one slash; both queries are kept, joined by `&`.
pub fn upstream_uri(target: &UpstreamTarget, request_uri: &Uri) -> Result<Uri, axum::http::Error> {
    let path = join_path(target.base_path(), request_uri.path());
    let query = match (target.base_query(), request_uri.query()) {
        (Some(base), Some(req)) if !base.is_empty() && !req.is_empty() => Some(format!("{base}&{req}")),
        (Some(base), _) if !base.is_empty() => Some(base.to_string()),
        (_, Some(req)) if !req.is_empty() => Some(req.to_string()),
        _ => None,
    };

    let path_and_query = match query {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };

    Uri::builder()
        .scheme(target.scheme().http_scheme())
        .authority(target.authority().clone())
        .path_and_query(PathAndQuery::try_from(path_and_query)?)
        .build()
}

fn join_path(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

fn append_forwarded_for(headers: &mut axum::http::HeaderMap, peer: SocketAddr) {
    let ip = peer.ip().to_string();
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.is_empty() => format!("{prior}, {ip}"),
        _ => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
