//! Error types surfaced by a [`crate::session::Session`].
//!
//! Single lost, duplicated or damaged packets never show up here; they are
//! repaired inside the send window and the reassembly.  Only persistent
//! failures reach the caller.  Running out of teardown retries is not an
//! error either: it yields [`crate::session::Delivery::Partial`].

use std::time::Duration;

use thiserror::Error;

use crate::packet::PacketError;
use crate::state::ConnectionState;

#[derive(Debug, Error)]
pub enum TransportError {
    /// Underlying socket failure.  Fatal; the session is reset.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// A packet could not be built (payload too large).
    #[error("packet error: {0}")]
    Packet(#[from] PacketError),
    /// The handshake went unanswered for the configured number of SYNs.
    #[error("handshake unanswered after {attempts} SYN(s)")]
    HandshakeTimeout { attempts: u32 },
    /// The caller's deadline expired mid-exchange.
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
    /// Operation not valid in the current lifecycle state.
    #[error("{operation} not allowed in state {state}")]
    InvalidState {
        operation: &'static str,
        state: ConnectionState,
    },
    /// Only IPv4 endpoints fit in the packet header.
    #[error("address {0} is not IPv4")]
    NotIpv4(std::net::SocketAddr),
}

impl TransportError {
    /// Whether the session must drop its connection state after this error.
    ///
    /// Misuse errors leave the current connection untouched.
    pub fn resets_session(&self) -> bool {
        !matches!(self, Self::InvalidState { .. } | Self::NotIpv4(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misuse_keeps_the_session() {
        let misuse = TransportError::InvalidState {
            operation: "send",
            state: ConnectionState::Transferring,
        };
        assert!(!misuse.resets_session());
        assert_eq!(misuse.to_string(), "send not allowed in state Transferring");
        assert!(TransportError::HandshakeTimeout { attempts: 3 }.resets_session());
        assert!(TransportError::DeadlineExceeded(Duration::from_secs(1)).resets_session());
    }
}
