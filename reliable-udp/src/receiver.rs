//! Out-of-order fragment collection and blob reassembly.
//!
//! [`Reassembly`] accepts DATA payloads in any order, keyed by sequence
//! number.  Duplicates are recognised and never overwrite or repeat an
//! entry.  The blob is only concatenated when the caller decides the
//! transfer is over (FIN seen, or the retry ceiling hit), never
//! incrementally.
//!
//! The [`Reassembly`] does **not** send ACKs itself; the connection replies
//! to every DATA packet, new or duplicate, with an ACK echoing its sequence
//! number.

use std::collections::BTreeMap;

/// Whether a DATA payload was new.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    New,
    Duplicate,
}

/// Receive-side state for one transfer direction.
#[derive(Debug, Default)]
pub struct Reassembly {
    fragments: BTreeMap<u64, Vec<u8>>,
    bytes: usize,
    /// Fragment count announced in the handshake ACK.  Advisory only.
    declared: Option<u64>,
}

impl Reassembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the payload of DATA packet `seq`.
    pub fn on_data(&mut self, seq: u64, payload: &[u8]) -> Accepted {
        if self.fragments.contains_key(&seq) {
            return Accepted::Duplicate;
        }
        self.bytes += payload.len();
        self.fragments.insert(seq, payload.to_vec());
        Accepted::New
    }

    /// Remember the fragment count the peer announced.
    pub fn declare(&mut self, count: u64) {
        self.declared = Some(count);
    }

    pub fn declared(&self) -> Option<u64> {
        self.declared
    }

    /// Number of distinct fragments stored.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Total payload bytes stored.
    pub fn byte_len(&self) -> usize {
        self.bytes
    }

    /// `true` when the announced count is known and not yet reached.
    pub fn falls_short(&self) -> bool {
        self.declared
            .is_some_and(|declared| (self.fragments.len() as u64) < declared)
    }

    /// Concatenate every stored payload in ascending sequence order.
    pub fn assemble(self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.bytes);
        for payload in self.fragments.into_values() {
            blob.extend_from_slice(&payload);
        }
        blob
    }
}
