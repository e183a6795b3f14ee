//! `reliable-udp`: reliable blob transfer over UDP with selective repeat.
//!
//! Two endpoints exchange one request blob and one reply blob per
//! connection, optionally through a fault-injecting [`router`].
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  fragments  ┌────────────┐
//!  │ SendWindow │────────────▶│ Reassembly │
//!  └─────┬──────┘             └─────┬──────┘
//!        │        ACK / NAK         │
//!        │◀─────────────────────────┘
//!        │
//!  ┌─────▼─────────────────────────────┐
//!  │  Session ─▶ Connection            │
//!  │  (state machine, RTT estimator)   │
//!  └─────┬─────────────────────────────┘
//!        │ raw UDP datagrams
//!  ┌─────▼─────┐        ┌──────────┐
//!  │  Socket   │◀──────▶│  Router  │  (optional, lossy)
//!  └───────────┘        └──────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]      wire format (serialise / deserialise)
//! - [`fragment`]    blob to DATA packet splitting
//! - [`sender`]      selective-repeat send window
//! - [`receiver`]    out-of-order reassembly
//! - [`timer`]       adaptive retransmission timeout
//! - [`state`]       finite-state-machine types
//! - [`connection`]  handshake, transfer, teardown and role reversal
//! - [`session`]     public send/receive API
//! - [`socket`]      async UDP socket abstraction
//! - [`config`]      tunables
//! - [`error`]       error taxonomy
//! - [`router`]      lossy/reordering relay for testing and demos
//! - [`httpfs`]      tiny HTTP file server carried over a session

pub mod config;
pub mod connection;
pub mod error;
pub mod fragment;
pub mod httpfs;
pub mod packet;
pub mod receiver;
pub mod router;
pub mod sender;
pub mod session;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::{ReceivePolicy, TransportConfig};
pub use error::TransportError;
pub use session::{Delivery, Session};
