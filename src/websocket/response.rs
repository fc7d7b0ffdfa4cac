//! Synthesized `101 Switching Protocols` response for the caller.

use axum::body::Body;
use axum::http::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_PROTOCOL, UPGRADE};
use axum::http::{HeaderMap, HeaderValue, Response, StatusCode};

use crate::websocket::error::TunnelError;
use crate::websocket::upstream::HandshakeResult;

/// Build the `101` answer to the caller from the upstream's handshake values.
///
/// `Sec-WebSocket-Protocol` is echoed only when the caller offered a list and
/// the upstream picked one of its entries.
pub fn switching_protocols(
    request_headers: &HeaderMap,
    handshake: &HandshakeResult,
) -> Result<Response<Body>, TunnelError> {
    let accept = handshake
        .accept
        .as_deref()
        .ok_or(TunnelError::MissingAcceptToken)?;
    let accept = HeaderValue::from_str(accept).map_err(|_| TunnelError::MissingAcceptToken)?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;

    let headers = response.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept);

    if let Some(protocol) = negotiated_protocol(request_headers, handshake) {
        if let Ok(value) = HeaderValue::from_str(protocol) {
            headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
        }
    }

    Ok(response)
}

/// The upstream's sub-protocol if it is one of the tokens the caller offered.
fn negotiated_protocol<'a>(
    request_headers: &HeaderMap,
    handshake: &'a HandshakeResult,
) -> Option<&'a str> {
    let chosen = handshake.protocol.as_deref()?;
    let offered = request_headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|token| token == chosen);

    offered.then_some(chosen)
}
