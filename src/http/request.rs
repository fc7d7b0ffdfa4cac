//! Request identification.
//!
//! Every request gets an `x-request-id` (generated when the caller sent none)
//! that is logged with it and echoed on the response. A `101` is left alone:
//! its header set is fixed by the WebSocket handshake.

use axum::body::Body;
use axum::http::{HeaderName, Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Assigns a UUID request ID to requests that do not carry one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Copies the request ID onto every response but a `101 Switching Protocols`.
pub async fn echo_request_id(request: Request<Body>, next: Next) -> Response {
    let request_id = request.headers().get(X_REQUEST_ID).cloned();
    let mut response = next.run(request).await;

    if response.status() != StatusCode::SWITCHING_PROTOCOLS {
        if let Some(id) = request_id {
            response.headers_mut().entry(X_REQUEST_ID).or_insert(id);
        }
    }
    response
}

pub trait RequestIdExt {
    /// The request's ID, or `unknown` when none was assigned.
    fn request_id(&self) -> String;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> String {
        self.headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string()
    }
}
