//! Per-connection lifecycle manager.
//!
//! A [`Connection`] owns the complete state for one engine instance bound to
//! one socket.  Its responsibilities are:
//! - Driving the finite-state machine (see [`crate::state`]).
//! - Running the handshake from either side.
//! - Pushing a [`FragmentSet`] through a [`SendWindow`] until every fragment
//!   is acknowledged.
//! - Collecting the peer's fragments into a [`Reassembly`] and answering them
//!   with ACK/NAK.
//! - Teardown and the role reversal that follows it.
//!
//! Every wait is bounded by the [`RttEstimator`]'s current timeout; nothing
//! here blocks forever except listening for the first SYN.
//!
//! # Sequence numbers
//!
//! Data fragments are numbered from a counter starting at 0.  SYN, the
//! handshake ACK and FIN are numbered from a separate counter starting at
//! [`CONTROL_SEQ_BASE`].  SYN_ACK, ACK and NAK echo the number they answer,
//! so an echo can always be told apart.  Both counters survive from one
//! connection to the next.

use std::net::{SocketAddr, SocketAddrV4};

use log::{debug, info, warn};
use tokio::time::Instant;

use crate::config::{ReceivePolicy, TransportConfig};
use crate::error::TransportError;
use crate::fragment::FragmentSet;
use crate::packet::{Kind, Packet, PacketError};
use crate::receiver::{Accepted, Reassembly};
use crate::sender::{AckOutcome, SendWindow};
use crate::session::Delivery;
use crate::socket::Socket;
use crate::state::{is_legal_transition, ConnectionState, Role};
use crate::timer::RttEstimator;

/// First control sequence number; data sequence numbers stay below it.
pub const CONTROL_SEQ_BASE: u64 = 1 << 63;

/// What a bounded wait produced.
type Waited = Option<Result<Packet, PacketError>>;

/// Engine state for one socket, reused across successive connections.
pub struct Connection {
    socket: Socket,
    config: TransportConfig,
    rtt: RttEstimator,
    state: ConnectionState,
    role: Option<Role>,

    /// Router every datagram is relayed through, if any.
    relay: Option<SocketAddr>,
    /// Where datagrams of the current connection go (and must come from).
    remote: Option<SocketAddr>,
    /// Logical peer written into every header.
    peer: Option<SocketAddrV4>,

    next_data_seq: u64,
    next_ctrl_seq: u64,

    /// Time of the most recent send, consumed by the next receive.
    last_send: Option<Instant>,
    /// Initiator: the handshake ACK, re-sent on a duplicate SYN_ACK.
    handshake_ack: Option<Packet>,
    /// Initiator: sequence number of our FIN while awaiting the reply.
    local_fin: Option<u64>,
}

impl Connection {
    pub fn new(socket: Socket, config: TransportConfig) -> Self {
        Self {
            socket,
            rtt: RttEstimator::new(&config),
            config,
            state: ConnectionState::Idle,
            role: None,
            relay: None,
            remote: None,
            peer: None,
            next_data_seq: 0,
            next_ctrl_seq: CONTROL_SEQ_BASE,
            last_send: None,
            handshake_ack: None,
            local_fin: None,
        }
    }

    /// Relay every outgoing datagram through `router`.
    pub fn set_relay(&mut self, router: SocketAddr) {
        self.relay = Some(router);
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn peer(&self) -> Option<SocketAddrV4> {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn current_timeout(&self) -> std::time::Duration {
        self.rtt.current_timeout()
    }

    /// Drop all per-connection state and return to `Idle`.
    pub fn reset(&mut self) {
        self.transition(ConnectionState::Idle);
        self.role = None;
        self.remote = None;
        self.peer = None;
        self.last_send = None;
        self.handshake_ack = None;
        self.local_fin = None;
    }

    // -----------------------------------------------------------------------
    // Initiator
    // -----------------------------------------------------------------------

    /// Active open: SYN until a matching SYN_ACK, then ACK carrying the
    /// number of fragments about to be sent.
    ///
    /// Retries forever unless `handshake_attempts` is configured.
    pub async fn open(&mut self, peer: SocketAddrV4, declared: u64) -> Result<(), TransportError> {
        self.reset();
        self.role = Some(Role::Initiator);
        self.peer = Some(peer);
        self.remote = Some(self.relay.unwrap_or(SocketAddr::V4(peer)));
        self.transition(ConnectionState::Handshaking);

        let syn = Packet::control(Kind::Syn, self.next_ctrl(), peer);
        let mut unanswered = 0u32;
        loop {
            self.transmit(&syn).await?;
            let timeout = self.rtt.current_timeout();
            match self.wait(timeout).await? {
                Some(Ok(pkt)) if pkt.kind() == Kind::SynAck && pkt.seq() == syn.seq() => break,
                Some(Ok(pkt)) if pkt.kind() == Kind::Nak => {
                    debug!("[hs] ← NAK seq={}; re-sending SYN", pkt.seq());
                }
                Some(Ok(pkt)) => debug!("[hs] ignoring {pkt} while handshaking"),
                Some(Err(e)) => debug!("[hs] dropping malformed datagram: {e}"),
                None => {
                    unanswered += 1;
                    if let Some(limit) = self.config.handshake_attempts {
                        if unanswered >= limit {
                            warn!("[hs] {peer} silent after {unanswered} SYN(s); giving up");
                            return Err(TransportError::HandshakeTimeout {
                                attempts: unanswered,
                            });
                        }
                    }
                    warn!("[hs] no SYN_ACK within {timeout:?}; re-sending SYN");
                }
            }
        }

        let ack = Packet::new(
            Kind::Ack,
            self.next_ctrl(),
            peer,
            declared.to_be_bytes().to_vec(),
        )?;
        self.transmit(&ack).await?;
        self.handshake_ack = Some(ack);
        info!("[hs] connected to {peer} ({declared} fragment(s) to send)");
        Ok(())
    }

    /// Send FIN and hand the turn to the peer.
    pub async fn finish_local(&mut self) -> Result<(), TransportError> {
        let peer = self.require_peer("finish")?;
        self.transition(ConnectionState::ClosingLocal);
        let fin = Packet::control(Kind::Fin, self.next_ctrl(), peer);
        self.transmit(&fin).await?;
        self.local_fin = Some(fin.seq());
        self.transition(ConnectionState::AwaitingPeerResource);
        Ok(())
    }

    /// Receive the peer's reply after our FIN.
    ///
    /// Each idle timeout re-sends our FIN.  After `policy.retry_ceiling`
    /// re-sends without any new fragment, whatever arrived is returned as
    /// [`Delivery::Partial`].
    pub async fn collect_reply(&mut self, policy: ReceivePolicy) -> Result<Delivery, TransportError> {
        let peer = self.require_peer("receive")?;
        let fin_seq = self.local_fin.ok_or(TransportError::InvalidState {
            operation: "receive",
            state: self.state,
        })?;
        let mut reassembly = Reassembly::new();
        let mut retries = 0u32;

        loop {
            let timeout = self.rtt.current_timeout();
            match self.wait(timeout).await? {
                None => {
                    if retries >= policy.retry_ceiling {
                        warn!(
                            "[fin] no reply after {retries} FIN re-send(s); delivering {} fragment(s) as partial",
                            reassembly.len()
                        );
                        self.transition(ConnectionState::Closed);
                        return Ok(Delivery::Partial(reassembly.assemble()));
                    }
                    retries += 1;
                    debug!(
                        "[fin] idle for {timeout:?}; re-sending FIN ({retries}/{})",
                        policy.retry_ceiling
                    );
                    self.transmit(&Packet::control(Kind::Fin, fin_seq, peer)).await?;
                }
                Some(Ok(pkt)) => match pkt.kind() {
                    Kind::Data => {
                        if self.on_data(&mut reassembly, &pkt).await? == Accepted::New {
                            retries = 0;
                        }
                    }
                    Kind::Fin => {
                        self.reply(Kind::Ack, pkt.seq()).await?;
                        info!(
                            "[recv] ← FIN; reply complete ({} fragment(s), {} byte(s))",
                            reassembly.len(),
                            reassembly.byte_len()
                        );
                        self.transition(ConnectionState::Closed);
                        return Ok(Delivery::Complete(reassembly.assemble()));
                    }
                    Kind::Ack if pkt.seq() == fin_seq => {
                        debug!("[fin] ← ACK of FIN seq={fin_seq}");
                        retries = 0;
                    }
                    _ => debug!("[recv] ignoring {pkt}"),
                },
                Some(Err(e)) => self.on_malformed(e).await?,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Responder
    // -----------------------------------------------------------------------

    /// Passive open followed by collection of the initiator's fragments.
    ///
    /// Listens without a time limit for the first SYN, accepting it only
    /// from the router when one is configured.  After that, more than
    /// `policy.retry_ceiling` consecutive idle timeouts end the receive with
    /// [`Delivery::Partial`].  On FIN the request is delivered and the
    /// connection moves to `Reversing`, ready for [`Self::push`].
    pub async fn accept_request(&mut self, policy: ReceivePolicy) -> Result<Delivery, TransportError> {
        self.reset();
        let (syn, from) = loop {
            let datagram = self.socket.recv_from().await?;
            if self.relay.is_some_and(|relay| relay != datagram.from) {
                debug!("[hs] listening; ignoring datagram from {} (not the router)", datagram.from);
                continue;
            }
            match datagram.packet {
                Ok(pkt) if pkt.kind() == Kind::Syn => break (pkt, datagram.from),
                Ok(pkt) => debug!("[hs] listening; ignoring {pkt} from {}", datagram.from),
                Err(e) => debug!("[hs] listening; dropping malformed datagram: {e}"),
            }
        };

        self.role = Some(Role::Responder);
        self.remote = Some(from);
        self.peer = Some(syn.peer());
        self.transition(ConnectionState::Handshaking);
        info!("[hs] ← SYN from {} via {from}", syn.peer());
        self.reply(Kind::SynAck, syn.seq()).await?;

        let mut reassembly = Reassembly::new();
        let mut idle = 0u32;
        loop {
            let timeout = self.rtt.current_timeout();
            let pkt = match self.wait(timeout).await? {
                None => {
                    idle += 1;
                    if idle > policy.retry_ceiling {
                        warn!(
                            "[recv] peer silent for {idle} timeout(s); delivering {} fragment(s) as partial",
                            reassembly.len()
                        );
                        self.transition(ConnectionState::Closed);
                        return Ok(Delivery::Partial(reassembly.assemble()));
                    }
                    continue;
                }
                Some(Err(e)) => {
                    self.on_malformed(e).await?;
                    continue;
                }
                Some(Ok(pkt)) => pkt,
            };
            idle = 0;

            match pkt.kind() {
                Kind::Syn if pkt.seq() == syn.seq() => self.reply(Kind::SynAck, pkt.seq()).await?,
                Kind::Ack if self.state == ConnectionState::Handshaking => {
                    if let Ok(count) = <[u8; 8]>::try_from(pkt.payload()) {
                        reassembly.declare(u64::from_be_bytes(count));
                    }
                    debug!("[hs] ← ACK; handshake confirmed");
                }
                Kind::Data => {
                    self.enter_receiving();
                    self.on_data(&mut reassembly, &pkt).await?;
                }
                Kind::Fin => {
                    self.reply(Kind::Ack, pkt.seq()).await?;
                    if reassembly.falls_short() {
                        warn!(
                            "[recv] FIN after {} of {:?} announced fragment(s)",
                            reassembly.len(),
                            reassembly.declared()
                        );
                    }
                    info!(
                        "[recv] ← FIN; request complete ({} fragment(s), {} byte(s))",
                        reassembly.len(),
                        reassembly.byte_len()
                    );
                    self.enter_receiving();
                    self.transition(ConnectionState::Reversing);
                    return Ok(Delivery::Complete(reassembly.assemble()));
                }
                _ => debug!("[recv] ignoring {pkt}"),
            }
        }
    }

    /// After pushing the reply: FIN until it is acknowledged or the retry
    /// ceiling runs out.  Returns whether the FIN was acknowledged.
    pub async fn close_reply(&mut self) -> Result<bool, TransportError> {
        let peer = self.require_peer("close")?;
        self.transition(ConnectionState::ClosingLocal);
        let fin = Packet::control(Kind::Fin, self.next_ctrl(), peer);

        for attempt in 0..=self.config.fin_retries {
            self.transmit(&fin).await?;
            if attempt > 0 {
                debug!("[fin] re-sent FIN seq={} ({attempt})", fin.seq());
            }
            let deadline = Instant::now() + self.rtt.current_timeout();
            while let Some(waited) = self.wait_until(deadline).await? {
                let Ok(pkt) = waited else { continue };
                match pkt.kind() {
                    Kind::Ack if pkt.seq() == fin.seq() => {
                        info!("[fin] ← ACK of FIN; connection with {peer} closed");
                        self.transition(ConnectionState::Closed);
                        return Ok(true);
                    }
                    Kind::Nak if pkt.seq() == fin.seq() => break,
                    // The initiator is still repeating its request tail.
                    Kind::Data | Kind::Fin => self.reply(Kind::Ack, pkt.seq()).await?,
                    _ => debug!("[fin] ignoring {pkt}"),
                }
            }
        }

        warn!(
            "[fin] FIN seq={} unacknowledged after {} attempt(s); closing anyway",
            fin.seq(),
            self.config.fin_retries + 1
        );
        self.transition(ConnectionState::Closed);
        Ok(false)
    }

    // -----------------------------------------------------------------------
    // Both roles
    // -----------------------------------------------------------------------

    /// Push `blob` through a selective-repeat window until every fragment is
    /// acknowledged.  Returns the number of fragments acknowledged.
    pub async fn push(&mut self, blob: &[u8]) -> Result<usize, TransportError> {
        let peer = self.require_peer("send")?;
        self.transition(ConnectionState::Transferring);

        let fragments = FragmentSet::split(blob, self.next_data_seq, peer);
        self.next_data_seq = fragments.next_seq();
        let window_size = self.config.window_for(fragments.len());
        let mut window = SendWindow::new(fragments, window_size);
        info!(
            "[send] {} byte(s) in {} fragment(s), window {}",
            blob.len(),
            window.len(),
            window.window_size()
        );

        while !window.is_complete() {
            for index in window.unsent() {
                if let Some(pkt) = window.packet(index) {
                    self.transmit(pkt).await?;
                }
                window.mark_sent(index);
            }

            let timeout = self.rtt.current_timeout();
            match self.wait(timeout).await? {
                None => {
                    let due = window.unacked();
                    warn!(
                        "[send] no answer within {timeout:?}; re-sending {} fragment(s) from index {}",
                        due.len(),
                        window.head()
                    );
                    for index in due {
                        if let Some(pkt) = window.packet(index) {
                            self.transmit(pkt).await?;
                        }
                        window.mark_sent(index);
                    }
                }
                Some(Ok(pkt)) => self.on_sender_packet(&mut window, pkt).await?,
                Some(Err(e)) => debug!("[send] dropping malformed datagram: {e}"),
            }
        }

        debug!("[send] all {} fragment(s) acknowledged", window.len());
        Ok(window.acked_count())
    }

    async fn on_sender_packet(
        &mut self,
        window: &mut SendWindow,
        pkt: Packet,
    ) -> Result<(), TransportError> {
        match pkt.kind() {
            Kind::Ack => match window.on_ack(pkt.seq()) {
                AckOutcome::Slid(n) => debug!(
                    "[send] ← ACK seq={} (slid {n}, window [{}, {}))",
                    pkt.seq(),
                    window.head(),
                    window.end()
                ),
                AckOutcome::Recorded => debug!("[send] ← ACK seq={} (out of order)", pkt.seq()),
                AckOutcome::Duplicate | AckOutcome::Ignored => {
                    debug!("[send] ← stale ACK seq={}", pkt.seq())
                }
            },
            Kind::Nak => {
                if let Some(index) = window.nak_target(pkt.seq()) {
                    debug!("[send] ← NAK seq={}; re-sending fragment {index}", pkt.seq());
                    if let Some(frag) = window.packet(index) {
                        self.transmit(frag).await?;
                    }
                }
            }
            Kind::SynAck if self.role == Some(Role::Initiator) => {
                if let Some(ack) = self.handshake_ack.clone() {
                    self.transmit(&ack).await?;
                }
            }
            // Stragglers of the request direction while the reply is sent.
            Kind::Data | Kind::Fin => self.reply(Kind::Ack, pkt.seq()).await?,
            _ => debug!("[send] ignoring {pkt}"),
        }
        Ok(())
    }

    async fn on_data(
        &mut self,
        reassembly: &mut Reassembly,
        pkt: &Packet,
    ) -> Result<Accepted, TransportError> {
        let accepted = reassembly.on_data(pkt.seq(), pkt.payload());
        debug!(
            "[recv] ← DATA seq={} len={} {:?}; → ACK",
            pkt.seq(),
            pkt.payload().len(),
            accepted
        );
        self.reply(Kind::Ack, pkt.seq()).await?;
        Ok(accepted)
    }

    /// NAK a damaged packet if its sequence number survived; drop it
    /// otherwise.
    async fn on_malformed(&mut self, err: PacketError) -> Result<(), TransportError> {
        match err.sequence_hint() {
            Some(seq) => {
                debug!("[recv] malformed datagram ({err}); → NAK seq={seq}");
                self.reply(Kind::Nak, seq).await?;
            }
            None => debug!("[recv] dropping malformed datagram: {err}"),
        }
        Ok(())
    }

    fn enter_receiving(&mut self) {
        if self.state == ConnectionState::Handshaking {
            self.transition(ConnectionState::Receiving);
        }
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn transition(&mut self, to: ConnectionState) {
        if self.state == to {
            return;
        }
        if let Some(role) = self.role {
            debug_assert!(
                is_legal_transition(role, self.state, to),
                "illegal {role:?} transition {} → {to}",
                self.state
            );
        }
        debug!("[conn] {} → {to}", self.state);
        self.state = to;
    }

    fn next_ctrl(&mut self) -> u64 {
        let seq = self.next_ctrl_seq;
        self.next_ctrl_seq += 1;
        seq
    }

    fn require_peer(&self, operation: &'static str) -> Result<SocketAddrV4, TransportError> {
        self.peer.ok_or(TransportError::InvalidState {
            operation,
            state: self.state,
        })
    }

    /// Send an empty control packet echoing `seq` to the current peer.
    async fn reply(&mut self, kind: Kind, seq: u64) -> Result<(), TransportError> {
        let peer = self.require_peer("reply")?;
        self.transmit(&Packet::control(kind, seq, peer)).await
    }

    async fn transmit(&mut self, pkt: &Packet) -> Result<(), TransportError> {
        let dest = self.remote.ok_or(TransportError::InvalidState {
            operation: "transmit",
            state: self.state,
        })?;
        self.socket.send_to(pkt, dest).await?;
        self.last_send = Some(Instant::now());
        debug!("→ {pkt}");
        Ok(())
    }

    async fn wait(&mut self, timeout: std::time::Duration) -> Result<Waited, TransportError> {
        self.wait_until(Instant::now() + timeout).await
    }

    /// Next datagram from the current remote, or `None` at `deadline`.
    ///
    /// Datagrams from anyone else are discarded without extending the
    /// deadline.  Behind a relay, the header names the originating peer and
    /// packets relayed on behalf of any other endpoint are discarded too.
    /// The first datagram after a send yields an RTT sample.
    async fn wait_until(&mut self, deadline: Instant) -> Result<Waited, TransportError> {
        loop {
            let Some(datagram) = self.socket.recv_until(deadline).await? else {
                return Ok(None);
            };
            if Some(datagram.from) != self.remote {
                debug!("ignoring datagram from stranger {}", datagram.from);
                continue;
            }
            if let (Some(_), Some(peer), Ok(pkt)) = (self.relay, self.peer, &datagram.packet) {
                if pkt.peer() != peer {
                    debug!("ignoring {pkt} relayed for {} instead of {peer}", pkt.peer());
                    continue;
                }
            }
            if let Some(sent) = self.last_send.take() {
                self.rtt.on_sample(sent.elapsed());
            }
            if let Ok(pkt) = &datagram.packet {
                debug!("← {pkt}");
            }
            return Ok(Some(datagram.packet));
        }
    }
}
