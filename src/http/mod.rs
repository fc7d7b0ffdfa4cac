//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID assigned and propagated)
//!     → middleware/access_control.rs (verification header gate)
//!     → server.rs handler:
//!         upgrade request  → websocket::tunnel
//!         anything else    → passthrough.rs (single-host reverse proxy)
//!     → response.rs (error answers, hop-by-hop stripping)
//!     → Send to client
//! ```

pub mod middleware;
pub mod passthrough;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
