//! Connection finite-state machine (FSM) types.
//!
//! Both endpoints run the same lifecycle; which path they take depends on
//! whether they open the connection ([`Role::Initiator`]) or answer it
//! ([`Role::Responder`]).
//!
//! ```text
//!  initiator:  Idle ─SYN─▶ Handshaking ─SYN_ACK─▶ Transferring ─all acked─▶ ClosingLocal
//!                                                                              │ FIN
//!                                                                              ▼
//!              Closed ◀──────peer FIN / retry ceiling────────── AwaitingPeerResource
//!
//!  responder:  Idle ─SYN─▶ Handshaking ─DATA─▶ Receiving ─FIN─▶ Reversing
//!                                                                   │ send(reply)
//!                                                                   ▼
//!              Closed ◀──ACK of FIN / ceiling── ClosingLocal ◀── Transferring
//! ```
//!
//! Keeping state types in their own module makes it easy to add guard logic
//! or tracing without touching connection plumbing.

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial state.
    #[default]
    Idle,
    /// SYN sent (initiator) or answered (responder).
    Handshaking,
    /// Responder collecting the initiator's fragments.
    Receiving,
    /// Responder holding the delivered request, reply not started yet.
    Reversing,
    /// Local fragment set being pushed through the send window.
    Transferring,
    /// Every local fragment acknowledged; FIN being sent.
    ClosingLocal,
    /// Initiator waiting for the peer's reply fragments and FIN.
    AwaitingPeerResource,
    /// Exchange finished, successfully or after the retry ceiling.
    Closed,
}

impl ConnectionState {
    /// `true` when a new exchange may start from this state.
    pub fn is_quiescent(self) -> bool {
        matches!(self, Self::Idle | Self::Closed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Which side opened the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Whether `from → to` is an edge of the lifecycle for `role`.
///
/// Any state may fall back to `Idle` (fatal error or deadline) and
/// `Closed` may restart as either role.
pub fn is_legal_transition(role: Role, from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    if to == Idle {
        return true;
    }
    match role {
        Role::Initiator => matches!(
            (from, to),
            (Idle | Closed, Handshaking)
                | (Handshaking, Transferring)
                | (Transferring, ClosingLocal)
                | (ClosingLocal, AwaitingPeerResource)
                | (AwaitingPeerResource, Closed)
        ),
        Role::Responder => matches!(
            (from, to),
            (Idle | Closed, Handshaking)
                | (Handshaking, Receiving)
                | (Receiving, Reversing)
                | (Handshaking | Receiving, Closed)
                | (Reversing, Transferring)
                | (Transferring, ClosingLocal)
                | (ClosingLocal, Closed)
        ),
    }
}
