//! Tunable parameters for a [`crate::session::Session`].
//!
//! Defaults follow the protocol's reference behaviour: a 1 s RTT seed, four
//! FIN re-sends before giving up, an unbounded handshake and a window of
//! `max(1, N/2)` fragments.

use std::time::Duration;

/// RTT estimate used before the first sample exists.
pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(1000);

/// Floor for the retransmission timeout.
pub const DEFAULT_MIN_TIMEOUT: Duration = Duration::from_millis(50);

/// Ceiling for the retransmission timeout.
pub const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(60);

/// FIN re-sends attempted before a receive settles for a partial blob.
pub const DEFAULT_FIN_RETRIES: u32 = 4;

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Seed for the smoothed RTT estimate.
    pub initial_rtt: Duration,
    /// Lower clamp applied to the computed timeout.
    pub min_timeout: Duration,
    /// Upper clamp applied to the computed timeout.
    pub max_timeout: Duration,
    /// Retry ceiling for teardown (FIN) exchanges.
    pub fin_retries: u32,
    /// Give up on the handshake after this many unanswered SYNs.
    ///
    /// `None` retries forever.
    pub handshake_attempts: Option<u32>,
    /// Fixed window size in fragments; `None` uses `max(1, N/2)`.
    pub window_size: Option<usize>,
    /// Hard limit on a single `send` call.
    pub deadline: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            initial_rtt: DEFAULT_INITIAL_RTT,
            min_timeout: DEFAULT_MIN_TIMEOUT,
            max_timeout: DEFAULT_MAX_TIMEOUT,
            fin_retries: DEFAULT_FIN_RETRIES,
            handshake_attempts: None,
            window_size: None,
            deadline: None,
        }
    }
}

impl TransportConfig {
    pub fn with_initial_rtt(mut self, rtt: Duration) -> Self {
        self.initial_rtt = rtt;
        self
    }

    pub fn with_timeout_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_timeout = min;
        self.max_timeout = max.max(min);
        self
    }

    pub fn with_fin_retries(mut self, retries: u32) -> Self {
        self.fin_retries = retries;
        self
    }

    pub fn with_handshake_attempts(mut self, attempts: u32) -> Self {
        self.handshake_attempts = Some(attempts.max(1));
        self
    }

    pub fn with_window_size(mut self, size: usize) -> Self {
        self.window_size = Some(size.max(1));
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Window size for a transfer of `fragments` fragments.
    pub fn window_for(&self, fragments: usize) -> usize {
        self.window_size.unwrap_or_else(|| (fragments / 2).max(1))
    }

    /// Receive policy derived from this configuration.
    pub fn receive_policy(&self) -> ReceivePolicy {
        ReceivePolicy {
            retry_ceiling: self.fin_retries,
            deadline: None,
        }
    }
}

/// How long [`crate::session::Session::receive`] keeps waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceivePolicy {
    /// Consecutive idle timeouts tolerated once a connection is open.
    pub retry_ceiling: u32,
    /// Hard limit on the whole call, including listening for a SYN.
    pub deadline: Option<Duration>,
}

impl Default for ReceivePolicy {
    fn default() -> Self {
        TransportConfig::default().receive_policy()
    }
}

impl ReceivePolicy {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}
