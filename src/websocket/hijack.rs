//! Taking over the caller's connection.
//!
//! hyper hands out the raw connection through the `OnUpgrade` extension of
//! the request. Removing it is the point of no return: once the `101` goes
//! out, the caller can no longer receive a structured HTTP error.

use axum::body::Body;
use axum::http::Request;
use hyper::upgrade::OnUpgrade;

use crate::websocket::error::TunnelError;

/// Claim exclusive raw access to the connection `request` arrived on.
pub fn hijack(request: &mut Request<Body>) -> Result<OnUpgrade, TunnelError> {
    request
        .extensions_mut()
        .remove::<OnUpgrade>()
        .ok_or(TunnelError::HijackUnsupported)
}
