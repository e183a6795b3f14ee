//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Packet`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};

use crate::packet::{Packet, PacketError, MAX_LEN};

/// One received datagram: where it came from and what it decoded to.
///
/// A decode failure is not an I/O error; the caller decides whether to NAK
/// or drop it.
#[derive(Debug)]
pub struct Datagram {
    pub from: SocketAddr,
    pub packet: Result<Packet, PacketError>,
}

/// An async, packet-oriented UDP socket.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `packet` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> io::Result<()> {
        self.inner.send_to(&packet.encode(), dest).await?;
        Ok(())
    }

    /// Receive the next datagram and decode it.
    ///
    /// The buffer is one byte larger than [`MAX_LEN`] so oversized datagrams
    /// are reported as malformed instead of silently truncated.
    pub async fn recv_from(&self) -> io::Result<Datagram> {
        let mut buf = [0u8; MAX_LEN + 1];
        let (n, from) = self.inner.recv_from(&mut buf).await?;
        Ok(Datagram {
            from,
            packet: Packet::decode(&buf[..n]),
        })
    }

    /// Like [`recv_from`](Self::recv_from), but give up at `deadline`.
    ///
    /// Returns `Ok(None)` when the deadline passes without a datagram.
    pub async fn recv_until(&self, deadline: Instant) -> io::Result<Option<Datagram>> {
        match timeout_at(deadline, self.recv_from()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }
}
