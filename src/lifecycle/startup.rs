//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn the validated configuration into runtime components
//! - Report every fatal startup failure through one error type
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)

use thiserror::Error;

use crate::config::ConfigError;
use crate::net::TargetError;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("upstream target: {0}")]
    Target(#[from] TargetError),

    #[error("TLS client setup failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid verification header `{0}`")]
    VerificationHeader(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
}
