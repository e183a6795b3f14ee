//! Public entry point: one request/response exchange at a time.
//!
//! A [`Session`] wraps a [`Connection`] and picks the right lifecycle path
//! from the current state:
//!
//! | call        | state                    | effect                                   |
//! |-------------|--------------------------|------------------------------------------|
//! | `send`      | `Idle` / `Closed`        | handshake, transfer, FIN                 |
//! | `receive`   | `AwaitingPeerResource`   | collect the peer's reply                 |
//! | `receive`   | `Idle` / `Closed`        | listen, accept, collect the request      |
//! | `send`      | `Reversing`              | transfer the reply, FIN                  |
//!
//! Fatal errors and expired deadlines reset the session to `Idle`, so the
//! next call starts a fresh connection.

use std::future::Future;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use log::warn;

use crate::config::{ReceivePolicy, TransportConfig};
use crate::connection::Connection;
use crate::error::TransportError;
use crate::fragment::FragmentSet;
use crate::socket::Socket;
use crate::state::{ConnectionState, Role};

/// Outcome of a receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The peer's FIN arrived; the blob is whole.
    Complete(Vec<u8>),
    /// The retry ceiling ran out first; the blob holds whatever arrived.
    Partial(Vec<u8>),
}

impl Delivery {
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Complete(b) | Self::Partial(b) => b,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Complete(b) | Self::Partial(b) => b,
        }
    }
}

pub struct Session {
    conn: Connection,
    /// Whether the peer acknowledged the FIN that closed the last reply.
    reply_acknowledged: Option<bool>,
}

impl Session {
    /// Bind a UDP socket at `local` and wrap it in an idle session.
    pub async fn bind(local: SocketAddr, config: TransportConfig) -> Result<Self, TransportError> {
        let socket = Socket::bind(local).await?;
        Ok(Self::from_socket(socket, config))
    }

    pub fn from_socket(socket: Socket, config: TransportConfig) -> Self {
        Self {
            conn: Connection::new(socket, config),
            reply_acknowledged: None,
        }
    }

    /// Send every datagram through the router at `router` instead of
    /// directly to the peer.
    pub fn with_relay(mut self, router: SocketAddr) -> Self {
        self.conn.set_relay(router);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.conn.state()
    }

    pub fn role(&self) -> Option<Role> {
        self.conn.role()
    }

    /// Logical peer of the current (or last) connection.
    pub fn peer(&self) -> Option<SocketAddrV4> {
        self.conn.peer()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.conn.local_addr()
    }

    /// Whether the FIN closing the last reply was acknowledged.
    ///
    /// `None` until a reply has been sent.  `Some(false)` means the reply
    /// data was delivered but the initiator went quiet before confirming
    /// the close.
    pub fn reply_acknowledged(&self) -> Option<bool> {
        self.reply_acknowledged
    }

    /// Retransmission timeout the next wait would use.
    pub fn current_timeout(&self) -> Duration {
        self.conn.current_timeout()
    }

    pub fn config(&self) -> &TransportConfig {
        self.conn.config()
    }

    /// Deliver `blob` reliably to `peer` and return the number of fragments
    /// acknowledged.
    ///
    /// From `Idle`/`Closed` this opens a new connection and ends in
    /// `AwaitingPeerResource`.  From `Reversing` it sends the reply on the
    /// connection just received, and ends in `Closed`.
    pub async fn send(&mut self, peer: SocketAddrV4, blob: &[u8]) -> Result<usize, TransportError> {
        let deadline = self.conn.config().deadline;
        let conn = &mut self.conn;
        let result = bounded(deadline, async {
            match conn.state() {
                state if state.is_quiescent() => {
                    let declared = FragmentSet::count_for(blob.len()) as u64;
                    conn.open(peer, declared).await?;
                    let acked = conn.push(blob).await?;
                    conn.finish_local().await?;
                    Ok((acked, None))
                }
                ConnectionState::Reversing if conn.peer() == Some(peer) => {
                    let acked = conn.push(blob).await?;
                    let fin_acked = conn.close_reply().await?;
                    if !fin_acked {
                        warn!("reply to {peer} delivered but its FIN was never acknowledged");
                    }
                    Ok((acked, Some(fin_acked)))
                }
                state => Err(TransportError::InvalidState {
                    operation: "send",
                    state,
                }),
            }
        })
        .await;
        let (acked, fin_acked) = self.settle(result)?;
        if fin_acked.is_some() {
            self.reply_acknowledged = fin_acked;
        }
        Ok(acked)
    }

    /// Send the reply for the request just received.
    pub async fn reply(&mut self, blob: &[u8]) -> Result<usize, TransportError> {
        match (self.state(), self.peer()) {
            (ConnectionState::Reversing, Some(peer)) => self.send(peer, blob).await,
            (state, _) => Err(TransportError::InvalidState {
                operation: "reply",
                state,
            }),
        }
    }

    /// Receive one blob.
    ///
    /// After a `send` this collects the peer's reply.  From `Idle`/`Closed`
    /// it waits for a new connection and collects the request, leaving the
    /// session in `Reversing`.
    pub async fn receive(&mut self, policy: ReceivePolicy) -> Result<Delivery, TransportError> {
        let conn = &mut self.conn;
        let result = bounded(policy.deadline, async {
            match conn.state() {
                ConnectionState::AwaitingPeerResource => conn.collect_reply(policy).await,
                state if state.is_quiescent() => conn.accept_request(policy).await,
                state => Err(TransportError::InvalidState {
                    operation: "receive",
                    state,
                }),
            }
        })
        .await;
        self.settle(result)
    }

    /// `send` followed by `receive`: one full request/response exchange.
    pub async fn request(
        &mut self,
        peer: SocketAddrV4,
        blob: &[u8],
        policy: ReceivePolicy,
    ) -> Result<Delivery, TransportError> {
        self.send(peer, blob).await?;
        self.receive(policy).await
    }

    fn settle<T>(&mut self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        if let Err(e) = &result {
            if e.resets_session() {
                warn!("session reset after error: {e}");
                self.conn.reset();
            }
        }
        result
    }
}

/// The IPv4 form of `addr`, the only kind a packet header can carry.
pub fn ipv4(addr: SocketAddr) -> Result<SocketAddrV4, TransportError> {
    match addr {
        SocketAddr::V4(v4) => Ok(v4),
        SocketAddr::V6(_) => Err(TransportError::NotIpv4(addr)),
    }
}

async fn bounded<T, F>(deadline: Option<Duration>, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or(Err(TransportError::DeadlineExceeded(limit))),
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_accessors() {
        let done = Delivery::Complete(b"abc".to_vec());
        let part = Delivery::Partial(b"ab".to_vec());
        assert!(done.is_complete());
        assert!(!part.is_complete());
        assert_eq!(part.bytes(), b"ab");
        assert_eq!(done.into_bytes(), b"abc");
    }

    #[test]
    fn only_ipv4_fits_the_header() {
        assert!(ipv4("127.0.0.1:80".parse().unwrap()).is_ok());
        assert!(matches!(
            ipv4("[::1]:80".parse().unwrap()),
            Err(TransportError::NotIpv4(_))
        ));
    }

    #[tokio::test]
    async fn reply_without_request_is_rejected() {
        let mut session = Session::bind("127.0.0.1:0".parse().unwrap(), TransportConfig::default())
            .await
            .unwrap();
        let err = session.reply(b"nothing asked").await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidState { operation: "reply", .. }));
        assert_eq!(session.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn receive_deadline_resets_to_idle() {
        let mut session = Session::bind("127.0.0.1:0".parse().unwrap(), TransportConfig::default())
            .await
            .unwrap();
        let policy = ReceivePolicy::default().with_deadline(Duration::from_millis(50));
        let err = session.receive(policy).await.unwrap_err();
        assert!(matches!(err, TransportError::DeadlineExceeded(_)));
        assert_eq!(session.state(), ConnectionState::Idle);
    }
}
