//! WebSocket-aware HTTP gateway library.
//!
//! Forwards every request to a single fixed upstream. Ordinary requests go
//! through a reverse proxy; WebSocket upgrades become byte-level tunnels with
//! a fresh upstream connection each.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod websocket;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
