//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (kind, sequence number, peer endpoint,
//!   payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning errors
//!   for malformed or truncated input.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0      1                  9              13             17 (BYTE)
//!  +------+------------------+--------------+--------------+------------
//!  | kind | sequence (u64)   | port (u32)   | IPv4 address | payload ...
//!  +------+------------------+--------------+--------------+------------
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 17 bytes.
//! kind(1) + seq(8) + port(4) + addr(4)
//!
//! There is no length field: the payload runs to the end of the datagram.
//! There is no checksum either; a damaged datagram is only detected when it
//! no longer decodes.

use std::net::{Ipv4Addr, SocketAddrV4};

use thiserror::Error;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 17;

/// Largest payload a single packet may carry.
pub const MAX_PAYLOAD: usize = 1013;

/// Largest datagram the protocol ever produces or accepts.
pub const MAX_LEN: usize = HEADER_LEN + MAX_PAYLOAD;

// Byte offsets of each field within the serialised header.
const OFF_KIND: usize = 0;
const OFF_SEQ: usize = 1;
const OFF_PORT: usize = 9;
const OFF_ADDR: usize = 13;

/// Message type carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    /// One fragment of the blob being transferred.
    Data = 0,
    /// Open a connection.
    Syn = 1,
    /// Confirm a SYN.
    SynAck = 2,
    /// Positive acknowledgement of the echoed sequence number.
    Ack = 3,
    /// Negative acknowledgement: re-send the echoed sequence number.
    Nak = 4,
    /// All fragments sent; hand the turn to the peer.
    Fin = 5,
}

impl TryFrom<u8> for Kind {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Kind::Data),
            1 => Ok(Kind::Syn),
            2 => Ok(Kind::SynAck),
            3 => Ok(Kind::Ack),
            4 => Ok(Kind::Nak),
            5 => Ok(Kind::Fin),
            other => Err(other),
        }
    }
}

impl From<Kind> for u8 {
    fn from(kind: Kind) -> Self {
        kind as u8
    }
}

impl std::fmt::Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Kind::Data => "DATA",
            Kind::Syn => "SYN",
            Kind::SynAck => "SYN_ACK",
            Kind::Ack => "ACK",
            Kind::Nak => "NAK",
            Kind::Fin => "FIN",
        };
        f.write_str(name)
    }
}

/// A complete protocol datagram: header fields + payload bytes.
///
/// Packets are immutable once built.  The constructors reject payloads that
/// would push the datagram past [`MAX_LEN`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    kind: Kind,
    seq: u64,
    peer: SocketAddrV4,
    payload: Vec<u8>,
}

impl Packet {
    /// Build a packet of any kind.
    pub fn new(
        kind: Kind,
        seq: u64,
        peer: SocketAddrV4,
        payload: Vec<u8>,
    ) -> Result<Self, PacketError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge {
                len: payload.len(),
            });
        }
        Ok(Self {
            kind,
            seq,
            peer,
            payload,
        })
    }

    /// Build a DATA packet carrying one fragment.
    pub fn data(seq: u64, peer: SocketAddrV4, payload: Vec<u8>) -> Result<Self, PacketError> {
        Self::new(Kind::Data, seq, peer, payload)
    }

    /// DATA packet from a payload the caller already sized, such as a
    /// `chunks(MAX_PAYLOAD)` slice.
    pub(crate) fn data_unchecked(seq: u64, peer: SocketAddrV4, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        Self {
            kind: Kind::Data,
            seq,
            peer,
            payload,
        }
    }

    /// Build an empty control packet (SYN, SYN_ACK, ACK, NAK or FIN).
    pub fn control(kind: Kind, seq: u64, peer: SocketAddrV4) -> Self {
        Self {
            kind,
            seq,
            peer,
            payload: Vec::new(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Logical peer endpoint named in the header.
    pub fn peer(&self) -> SocketAddrV4 {
        self.peer
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Length of the serialised datagram.
    pub fn wire_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.wire_len()];

        buf[OFF_KIND] = self.kind.into();
        buf[OFF_SEQ..OFF_SEQ + 8].copy_from_slice(&self.seq.to_be_bytes());
        buf[OFF_PORT..OFF_PORT + 4].copy_from_slice(&u32::from(self.peer.port()).to_be_bytes());
        buf[OFF_ADDR..OFF_ADDR + 4].copy_from_slice(&self.peer.ip().octets());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        buf
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than [`HEADER_LEN`] or longer than [`MAX_LEN`],
    /// - the kind byte is not a known code, or
    /// - the port field does not fit in 16 bits.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::TooShort {
                len: buf.len(),
                seq: peek_seq(buf),
            });
        }
        let seq = read_u64(buf, OFF_SEQ);
        if buf.len() > MAX_LEN {
            return Err(PacketError::TooLong {
                len: buf.len(),
                seq,
            });
        }

        let kind =
            Kind::try_from(buf[OFF_KIND]).map_err(|code| PacketError::UnknownKind { code, seq })?;

        let port = read_u32(buf, OFF_PORT);
        let port = u16::try_from(port).map_err(|_| PacketError::InvalidPort { value: port, seq })?;
        let ip = Ipv4Addr::new(
            buf[OFF_ADDR],
            buf[OFF_ADDR + 1],
            buf[OFF_ADDR + 2],
            buf[OFF_ADDR + 3],
        );

        Ok(Packet {
            kind,
            seq,
            peer: SocketAddrV4::new(ip, port),
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

impl std::fmt::Display for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} seq={} peer={} len={}",
            self.kind,
            self.seq,
            self.peer,
            self.payload.len()
        )
    }
}

/// Overwrite the peer endpoint of an encoded datagram in place.
///
/// Used by the router, which rewrites the destination it read from the
/// header into the address the datagram actually came from.  Returns `false`
/// when `buf` is too short to carry a header.
pub fn rewrite_peer(buf: &mut [u8], peer: SocketAddrV4) -> bool {
    if buf.len() < HEADER_LEN {
        return false;
    }
    buf[OFF_PORT..OFF_PORT + 4].copy_from_slice(&u32::from(peer.port()).to_be_bytes());
    buf[OFF_ADDR..OFF_ADDR + 4].copy_from_slice(&peer.ip().octets());
    true
}

/// Read the peer endpoint of an encoded datagram without decoding the rest.
pub fn peek_peer(buf: &[u8]) -> Option<SocketAddrV4> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let port = u16::try_from(read_u32(buf, OFF_PORT)).ok()?;
    let ip = Ipv4Addr::new(
        buf[OFF_ADDR],
        buf[OFF_ADDR + 1],
        buf[OFF_ADDR + 2],
        buf[OFF_ADDR + 3],
    );
    Some(SocketAddrV4::new(ip, port))
}

/// Sequence number of a datagram that may be too short to decode.
fn peek_seq(buf: &[u8]) -> Option<u64> {
    (buf.len() >= OFF_SEQ + 8).then(|| read_u64(buf, OFF_SEQ))
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[off..off + 8]);
    u64::from_be_bytes(bytes)
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[off..off + 4]);
    u32::from_be_bytes(bytes)
}

/// Errors that arise when building or parsing a datagram (a malformed packet).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("datagram of {len} bytes is shorter than the {}-byte header", HEADER_LEN)]
    TooShort { len: usize, seq: Option<u64> },
    /// Buffer longer than any packet the protocol produces.
    #[error("datagram of {len} bytes exceeds the {}-byte limit", MAX_LEN)]
    TooLong { len: usize, seq: u64 },
    /// Kind byte is not one of the known codes.
    #[error("unknown packet kind {code}")]
    UnknownKind { code: u8, seq: u64 },
    /// Port field does not fit in 16 bits.
    #[error("peer port {value} out of range")]
    InvalidPort { value: u32, seq: u64 },
    /// Payload larger than [`MAX_PAYLOAD`] handed to a constructor.
    #[error("payload of {len} bytes exceeds the {}-byte limit", MAX_PAYLOAD)]
    PayloadTooLarge { len: usize },
}

impl PacketError {
    /// Best-known sequence number of the damaged packet, if the header
    /// carried one.
    pub fn sequence_hint(&self) -> Option<u64> {
        match *self {
            PacketError::TooShort { seq, .. } => seq,
            PacketError::TooLong { seq, .. }
            | PacketError::UnknownKind { seq, .. }
            | PacketError::InvalidPort { seq, .. } => Some(seq),
            PacketError::PayloadTooLarge { .. } => None,
        }
    }
}
