//! WebSocket tunneling subsystem.
//!
//! # Data Flow
//! ```text
//! Upgrade request (detect.rs)
//!     → upstream.rs (dial, optional TLS, 101 handshake with the upstream)
//!     → hijack.rs (take the caller's connection)
//!     → response.rs (101 answer to the caller)
//!     → relay.rs (two byte pipes, close frame, shutdown)
//! ```
//!
//! tunnel.rs drives these steps through the state machine in state.rs.
//!
//! # Design Decisions
//! - The upstream handshake completes before anything is done to the caller's
//!   connection, so upstream failures are still plain HTTP errors
//! - Frames are relayed as opaque bytes, never parsed or validated
//! - No retries: a failed tunnel attempt fails the request

use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;

use crate::config::ProxyConfig;
use crate::net::{TunnelTracker, UpstreamTarget};

pub mod detect;
pub mod error;
pub mod hijack;
pub mod relay;
pub mod response;
pub mod state;
pub mod tunnel;
pub mod upstream;

pub use detect::is_upgrade_request;
pub use error::TunnelError;
pub use relay::{RelayReport, CLOSE_FRAME};
pub use state::{Tunnel, TunnelState};

/// Timing knobs for a tunnel.
#[derive(Debug, Clone, Copy)]
pub struct TunnelSettings {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Bound on each step of closing a leg.
    pub close_deadline: Duration,
}

impl TunnelSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            connect_timeout: config.upstream.connect_timeout(),
            handshake_timeout: config.upstream.handshake_timeout(),
            close_deadline: config.websocket.close_deadline(),
        }
    }
}

/// Everything a tunnel needs, shared by all tunnels of a server.
#[derive(Clone)]
pub struct TunnelContext {
    pub target: Arc<UpstreamTarget>,
    pub settings: TunnelSettings,
    pub tls: Arc<ClientConfig>,
    pub tracker: TunnelTracker,
}
