//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! target.rs (upstream URL parsed once at startup)
//!     → Upstream dial (per tunnel)
//!     → TcpStream (bounded connect)
//!     → tls.rs (optional rustls client handshake)
//!     → stream.rs (UpstreamLeg: plain or TLS, replays buffered bytes)
//!     → Hand off to the WebSocket relay
//!
//! connection.rs counts open tunnels for metrics and shutdown draining.
//! ```
//!
//! # Design Decisions
//! - One fresh upstream connection per tunnel, never pooled
//! - TLS client config is built once at startup and shared
//! - Each leg records how it must be closed when it is created

pub mod connection;
pub mod stream;
pub mod target;
pub mod tls;

pub use connection::{TunnelGuard, TunnelId, TunnelTracker};
pub use stream::{CloseMode, UpstreamLeg, UpstreamStream};
pub use target::{TargetError, TargetScheme, UpstreamTarget};
