//! Selective-repeat send window.
//!
//! [`SendWindow`] tracks which fragments of a [`FragmentSet`] have been sent
//! and acknowledged.  Unlike Go-Back-N, every fragment is acknowledged
//! individually, so a single loss only costs the re-send of the fragments
//! still unacknowledged inside the window.
//!
//! # Protocol contract
//!
//! - The window is the index range `[head, end)`; `end − head` never exceeds
//!   the window size chosen at construction and `head ≤ end ≤ N` always holds.
//! - An ACK marks exactly one fragment.  The window slides only while the
//!   fragment at `head` is acknowledged, so acks inside the window never
//!   shrink it on their own.
//! - On timeout the caller re-sends every unacked fragment in the window.
//! - On NAK the caller re-sends the named fragment immediately.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.
//!
//! ```text
//!            head                 end
//!              │                   │
//!  ──acked─────┼──in window────────┼──not yet eligible──▶ index
//! ```

use crate::fragment::FragmentSet;
use crate::packet::Packet;

/// Result of feeding one ACK into the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Newly acknowledged; the window advanced by this many slots.
    Slid(usize),
    /// Newly acknowledged, but an earlier fragment is still outstanding.
    Recorded,
    /// Already acknowledged earlier.
    Duplicate,
    /// Not a fragment of this set, or one that was never sent.
    Ignored,
}

/// Send-side window state for one transfer direction.
#[derive(Debug)]
pub struct SendWindow {
    fragments: FragmentSet,
    window_size: usize,
    head: usize,
    end: usize,
    acked: Vec<bool>,
    sent: Vec<bool>,
}

impl SendWindow {
    /// Open a window of `window_size` (≥ 1) fragments over `fragments`.
    pub fn new(fragments: FragmentSet, window_size: usize) -> Self {
        let window_size = window_size.max(1);
        let n = fragments.len();
        Self {
            window_size,
            head: 0,
            end: window_size.min(n),
            acked: vec![false; n],
            sent: vec![false; n],
            fragments,
        }
    }

    /// Left window edge: the oldest unacknowledged index (or `N`).
    pub fn head(&self) -> usize {
        self.head
    }

    /// Right window edge (exclusive).
    pub fn end(&self) -> usize {
        self.end
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Total number of fragments `N`.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Number of fragments acknowledged so far.
    pub fn acked_count(&self) -> usize {
        self.acked.iter().filter(|&&a| a).count()
    }

    /// Fragments sent but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        (self.head..self.end)
            .filter(|&i| self.sent[i] && !self.acked[i])
            .count()
    }

    /// `true` once every fragment has been acknowledged.
    pub fn is_complete(&self) -> bool {
        self.head == self.fragments.len()
    }

    pub fn packet(&self, index: usize) -> Option<&Packet> {
        self.fragments.get(index)
    }

    /// Indices in the window that have never been sent (the filling step).
    pub fn unsent(&self) -> Vec<usize> {
        (self.head..self.end)
            .filter(|&i| !self.sent[i] && !self.acked[i])
            .collect()
    }

    /// Indices in the window still awaiting an ACK, sent or not (the
    /// retransmission step after a timeout).
    pub fn unacked(&self) -> Vec<usize> {
        (self.head..self.end).filter(|&i| !self.acked[i]).collect()
    }

    /// Record that fragment `index` went out on the wire.
    pub fn mark_sent(&mut self, index: usize) {
        if let Some(slot) = self.sent.get_mut(index) {
            *slot = true;
        }
    }

    /// Map a NAKed sequence number to a fragment worth re-sending.
    ///
    /// Returns `None` for sequence numbers outside this set and for
    /// fragments already acknowledged.
    pub fn nak_target(&self, seq: u64) -> Option<usize> {
        let index = self.fragments.index_of(seq)?;
        (!self.acked[index] && index < self.end).then_some(index)
    }

    /// Process the ACK of sequence number `seq`.
    pub fn on_ack(&mut self, seq: u64) -> AckOutcome {
        let Some(index) = self.fragments.index_of(seq) else {
            return AckOutcome::Ignored;
        };
        if self.acked[index] {
            return AckOutcome::Duplicate;
        }
        if !self.sent[index] {
            return AckOutcome::Ignored;
        }
        self.acked[index] = true;

        let slid = self.slide();
        if slid > 0 {
            AckOutcome::Slid(slid)
        } else {
            AckOutcome::Recorded
        }
    }

    /// Advance the window past the acknowledged prefix.
    fn slide(&mut self) -> usize {
        let n = self.fragments.len();
        let mut slid = 0;
        while self.head < self.end && self.acked[self.head] {
            self.head += 1;
            if self.end < n {
                self.end += 1;
            }
            slid += 1;
        }
        debug_assert!(self.head <= self.end && self.end <= n);
        debug_assert!(self.end - self.head <= self.window_size);
        slid
    }
}
