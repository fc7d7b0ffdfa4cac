//! Tunnel state machine.
//!
//! ```text
//! Idle → UpstreamEstablished → Hijacked → Relaying → Closed
//!   └──────────────┴──────────────┴─────────────────→ Closed
//! ```
//!
//! The hijack is irreversible, so `Hijacked` is only reachable from
//! `UpstreamEstablished`: a failed upstream handshake can still be answered
//! with an ordinary HTTP error.

use crate::net::TunnelId;
use crate::websocket::error::TunnelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Idle,
    UpstreamEstablished,
    Hijacked,
    Relaying,
    Closed,
}

impl TunnelState {
    pub fn can_transition(self, to: TunnelState) -> bool {
        use TunnelState::*;
        matches!(
            (self, to),
            (Idle, UpstreamEstablished)
                | (UpstreamEstablished, Hijacked)
                | (Hijacked, Relaying)
                | (Idle | UpstreamEstablished | Hijacked | Relaying, Closed)
        )
    }
}

/// A tunnel's identity and current state.
#[derive(Debug)]
pub struct Tunnel {
    id: TunnelId,
    state: TunnelState,
}

impl Tunnel {
    pub fn new(id: TunnelId) -> Self {
        Self {
            id,
            state: TunnelState::Idle,
        }
    }

    pub fn id(&self) -> TunnelId {
        self.id
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    /// Move to `to`, refusing transitions the machine does not allow.
    pub fn advance(&mut self, to: TunnelState) -> Result<(), TunnelError> {
        if !self.state.can_transition(to) {
            return Err(TunnelError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        tracing::trace!(tunnel_id = %self.id, from = ?self.state, to = ?to, "Tunnel state change");
        self.state = to;
        Ok(())
    }

    /// Close the tunnel from whatever state it is in.
    pub fn close(&mut self) {
        if self.state != TunnelState::Closed {
            self.state = TunnelState::Closed;
            tracing::trace!(tunnel_id = %self.id, "Tunnel closed");
        }
    }
}
