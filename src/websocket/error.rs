//! Tunnel error taxonomy.

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

use crate::websocket::state::TunnelState;

/// Errors that can end a tunnel attempt.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// TCP connect to the upstream was refused or timed out.
    #[error("upstream {addr} unreachable: {source}")]
    UpstreamUnreachable { addr: String, source: io::Error },

    /// TLS handshake with the upstream failed.
    #[error("TLS handshake with upstream failed: {0}")]
    UpstreamTlsFailure(io::Error),

    /// Writing the upgrade request to the upstream failed.
    #[error("failed to write upgrade request to upstream: {0}")]
    UpstreamWriteFailure(io::Error),

    /// The upstream answered the upgrade with something other than 101.
    #[error("upstream rejected upgrade: expected 101, got {status}")]
    UpstreamHandshakeRejected { status: u16 },

    /// The upstream's response head could not be read or parsed.
    #[error("invalid upgrade response from upstream: {0}")]
    UpstreamHandshakeInvalid(String),

    /// TLS or upgrade exchange with the upstream did not finish in time.
    #[error("upstream handshake timed out")]
    UpstreamHandshakeTimeout,

    /// The upstream's 101 lacked `Sec-WebSocket-Accept`.
    #[error("missing Sec-WebSocket-Accept from upstream")]
    MissingAcceptToken,

    /// The inbound connection cannot be taken over.
    #[error("connection does not support upgrades")]
    HijackUnsupported,

    #[error("invalid tunnel transition {from:?} -> {to:?}")]
    InvalidTransition { from: TunnelState, to: TunnelState },
}

impl TunnelError {
    /// Status answered to the caller while a structured response is still possible.
    pub fn status_code(&self) -> StatusCode {
        match self {
            TunnelError::HijackUnsupported | TunnelError::InvalidTransition { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short label used as a metrics outcome.
    pub fn reason(&self) -> &'static str {
        match self {
            TunnelError::UpstreamUnreachable { .. } => "upstream_unreachable",
            TunnelError::UpstreamTlsFailure(_) => "upstream_tls_failure",
            TunnelError::UpstreamWriteFailure(_) => "upstream_write_failure",
            TunnelError::UpstreamHandshakeRejected { .. } => "upstream_rejected",
            TunnelError::UpstreamHandshakeInvalid(_) => "upstream_invalid",
            TunnelError::UpstreamHandshakeTimeout => "upstream_timeout",
            TunnelError::MissingAcceptToken => "missing_accept",
            TunnelError::HijackUnsupported => "hijack_unsupported",
            TunnelError::InvalidTransition { .. } => "invalid_transition",
        }
    }
}
