//! Fault-injecting UDP relay.
//!
//! Endpoints that share a [`Router`] address every datagram to it and name
//! the real destination in the packet header.  For each datagram the router:
//!
//! 1. reads the destination from the header,
//! 2. rewrites the header endpoint to the datagram's actual source, so the
//!    receiver learns who sent it,
//! 3. applies the fault model and forwards what is left.
//!
//! | Fault        | Effect                                                   |
//! |--------------|----------------------------------------------------------|
//! | Loss         | Drop with probability `drop_rate`.                       |
//! | Corruption   | Overwrite the kind byte with [`CORRUPT_KIND`].           |
//! | Duplication  | Forward a second copy.                                   |
//! | Reordering   | Hold a copy back for up to `max_delay`.                  |
//!
//! Every decision comes from one `StdRng` seeded from
//! [`RouterConfig::seed`], so a run's fault sequence is reproducible given
//! the same arrival order.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::packet::{peek_peer, rewrite_peer, MAX_LEN};

/// Kind byte written into corrupted datagrams; no packet kind uses it.
pub const CORRUPT_KIND: u8 = 0xFF;

/// Fault model.  All rates are probabilities in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    pub drop_rate: f64,
    pub duplicate_rate: f64,
    /// Probability that a copy is delayed by a random amount.
    pub reorder_rate: f64,
    /// Upper bound for that delay.
    pub max_delay: Duration,
    pub corrupt_rate: f64,
    pub seed: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        // Transparent relay.
        Self {
            drop_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            max_delay: Duration::ZERO,
            corrupt_rate: 0.0,
            seed: 0,
        }
    }
}

impl RouterConfig {
    pub fn with_drop_rate(mut self, rate: f64) -> Self {
        self.drop_rate = rate;
        self
    }

    pub fn with_duplicate_rate(mut self, rate: f64) -> Self {
        self.duplicate_rate = rate;
        self
    }

    pub fn with_reordering(mut self, rate: f64, max_delay: Duration) -> Self {
        self.reorder_rate = rate;
        self.max_delay = max_delay;
        self
    }

    pub fn with_corrupt_rate(mut self, rate: f64) -> Self {
        self.corrupt_rate = rate;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Same model with every rate forced into `[0.0, 1.0]`.
    fn sanitized(mut self) -> Self {
        for rate in [
            &mut self.drop_rate,
            &mut self.duplicate_rate,
            &mut self.reorder_rate,
            &mut self.corrupt_rate,
        ] {
            *rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        }
        self
    }
}

/// What the fault model decided for one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Verdict {
    corrupt: bool,
    /// One delay per forwarded copy; empty when dropped.
    copies: Vec<Duration>,
}

pub struct Router {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    config: RouterConfig,
    rng: StdRng,
}

impl Router {
    pub async fn bind(addr: SocketAddr, config: RouterConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        let config = config.sanitized();
        Ok(Self {
            socket: Arc::new(socket),
            local_addr,
            rng: StdRng::seed_from_u64(config.seed),
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the relay loop on its own task.
    pub fn spawn(self) -> JoinHandle<io::Result<()>> {
        tokio::spawn(self.run())
    }

    /// Relay datagrams until the socket fails.
    pub async fn run(mut self) -> io::Result<()> {
        info!("[router] relaying on {} ({:?})", self.local_addr, self.config);
        let mut buf = [0u8; MAX_LEN + 1];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            let mut datagram = buf[..n].to_vec();

            let (Some(dest), SocketAddr::V4(source)) = (peek_peer(&datagram), from) else {
                debug!("[router] discarding unroutable datagram ({n} bytes) from {from}");
                continue;
            };
            rewrite_peer(&mut datagram, source);

            let verdict = self.decide();
            if verdict.copies.is_empty() {
                debug!("[router] drop {from} → {dest}");
                continue;
            }
            if verdict.corrupt {
                debug!("[router] corrupt {from} → {dest}");
                datagram[0] = CORRUPT_KIND;
            }
            if verdict.copies.len() > 1 {
                debug!("[router] duplicate {from} → {dest}");
            }
            for delay in verdict.copies {
                forward(
                    Arc::clone(&self.socket),
                    datagram.clone(),
                    SocketAddr::V4(dest),
                    delay,
                );
            }
        }
    }

    fn decide(&mut self) -> Verdict {
        let mut verdict = Verdict {
            corrupt: false,
            copies: Vec::new(),
        };
        if self.rng.gen_bool(self.config.drop_rate) {
            return verdict;
        }
        verdict.corrupt = self.rng.gen_bool(self.config.corrupt_rate);
        let copies = if self.rng.gen_bool(self.config.duplicate_rate) { 2 } else { 1 };
        for _ in 0..copies {
            let delay = if self.rng.gen_bool(self.config.reorder_rate) {
                let max = u64::try_from(self.config.max_delay.as_micros()).unwrap_or(u64::MAX);
                Duration::from_micros(self.rng.gen_range(0..=max))
            } else {
                Duration::ZERO
            };
            verdict.copies.push(delay);
        }
        verdict
    }
}

fn forward(socket: Arc<UdpSocket>, datagram: Vec<u8>, dest: SocketAddr, delay: Duration) {
    if delay.is_zero() {
        // Keep undelayed traffic in arrival order.
        if let Err(e) = socket.try_send_to(&datagram, dest) {
            warn!("[router] forwarding to {dest} failed: {e}");
        }
        return;
    }
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = socket.send_to(&datagram, dest).await {
            warn!("[router] delayed forward to {dest} failed: {e}");
        }
    });
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};

    use super::*;
    use crate::packet::{Kind, Packet};

    async fn bind_router(config: RouterConfig) -> Router {
        Router::bind("127.0.0.1:0".parse().unwrap(), config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn same_seed_same_faults() {
        let config = RouterConfig::default()
            .with_drop_rate(0.3)
            .with_duplicate_rate(0.3)
            .with_corrupt_rate(0.3)
            .with_reordering(0.3, Duration::from_millis(20))
            .with_seed(42);
        let mut a = bind_router(config.clone()).await;
        let mut b = bind_router(config).await;
        for _ in 0..200 {
            assert_eq!(a.decide(), b.decide());
        }
    }

    #[tokio::test]
    async fn delays_stay_within_max_delay() {
        let limit = Duration::from_millis(20);
        let mut router = bind_router(RouterConfig::default().with_reordering(1.0, limit)).await;
        for _ in 0..200 {
            let verdict = router.decide();
            assert_eq!(verdict.copies.len(), 1);
            assert!(verdict.copies[0] <= limit);
        }
    }

    #[tokio::test]
    async fn huge_max_delay_saturates() {
        let mut router =
            bind_router(RouterConfig::default().with_reordering(1.0, Duration::MAX)).await;
        for _ in 0..50 {
            for delay in router.decide().copies {
                assert!(delay <= Duration::from_micros(u64::MAX));
            }
        }
    }

    #[tokio::test]
    async fn rates_are_clamped() {
        let router = bind_router(
            RouterConfig::default()
                .with_drop_rate(1.5)
                .with_corrupt_rate(-1.0)
                .with_duplicate_rate(f64::NAN),
        )
        .await;
        assert_eq!(router.config.drop_rate, 1.0);
        assert_eq!(router.config.corrupt_rate, 0.0);
        assert_eq!(router.config.duplicate_rate, 0.0);
    }

    #[tokio::test]
    async fn relays_and_rewrites_the_header_endpoint() {
        let router = bind_router(RouterConfig::default()).await;
        let router_addr = router.local_addr();
        let _task = router.spawn();

        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let SocketAddr::V4(a_addr) = a.local_addr().unwrap() else { unreachable!() };
        let SocketAddr::V4(b_addr) = b.local_addr().unwrap() else { unreachable!() };

        let pkt = Packet::data(3, b_addr, b"via router".to_vec()).unwrap();
        a.send_to(&pkt.encode(), router_addr).await.unwrap();

        let mut buf = [0u8; MAX_LEN];
        let (n, from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, router_addr);
        let got = Packet::decode(&buf[..n]).unwrap();
        assert_eq!(got.kind(), Kind::Data);
        assert_eq!(got.seq(), 3);
        assert_eq!(got.peer(), a_addr);
        assert_eq!(got.payload(), b"via router");
    }

    #[tokio::test]
    async fn corruption_is_detectable() {
        let router = bind_router(RouterConfig::default().with_corrupt_rate(1.0)).await;
        let router_addr = router.local_addr();
        let _task = router.spawn();

        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let SocketAddr::V4(b_addr) = b.local_addr().unwrap() else { unreachable!() };
        let pkt = Packet::data(9, b_addr, b"x".to_vec()).unwrap();
        a.send_to(&pkt.encode(), router_addr).await.unwrap();

        let mut buf = [0u8; MAX_LEN];
        let (n, _) = b.recv_from(&mut buf).await.unwrap();
        let err = Packet::decode(&buf[..n]).unwrap_err();
        assert_eq!(err.sequence_hint(), Some(9));
    }

    #[test]
    fn unroutable_header_has_no_destination() {
        assert_eq!(peek_peer(&[0u8; 5]), None);
        let pkt = Packet::control(Kind::Ack, 1, SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7));
        assert_eq!(
            peek_peer(&pkt.encode()),
            Some(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 7))
        );
    }
}
