//! Access Control Middleware.
//! Enforces the configured verification header.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderName, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use crate::http::response::bad_gateway;

/// Header every request must carry when a gate is configured.
#[derive(Clone, Debug, Default)]
pub struct AccessGate {
    required: Option<HeaderName>,
}

impl AccessGate {
    pub fn new(required: Option<HeaderName>) -> Self {
        Self { required }
    }

    pub fn allows<B>(&self, req: &Request<B>) -> bool {
        match &self.required {
            None => true,
            Some(name) => req.headers().get(name).is_some_and(|v| !v.is_empty()),
        }
    }
}

pub async fn access_control_middleware(
    State(gate): State<AccessGate>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if gate.allows(&req) {
        return next.run(req).await;
    }

    // Same answer as an unreachable upstream.
    warn!(path = %req.uri().path(), "Request without verification header rejected");
    bad_gateway().into_response()
}
