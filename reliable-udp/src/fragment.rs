//! Splitting an application blob into DATA packets.
//!
//! A [`FragmentSet`] is built once per transfer direction and never changes
//! afterwards.  Fragment `i` carries sequence number `first_seq + i`, so the
//! send window can map an echoed sequence number straight back to an index.

use std::net::SocketAddrV4;

use crate::packet::{Packet, MAX_PAYLOAD};

/// Ordered DATA packets covering one blob, indices `0..len()`.
#[derive(Debug, Clone)]
pub struct FragmentSet {
    first_seq: u64,
    packets: Vec<Packet>,
}

impl FragmentSet {
    /// Cut `blob` into [`MAX_PAYLOAD`]-sized chunks addressed to `peer`.
    ///
    /// Every fragment but the last is exactly [`MAX_PAYLOAD`] bytes.  An empty
    /// blob produces an empty set.
    pub fn split(blob: &[u8], first_seq: u64, peer: SocketAddrV4) -> Self {
        let packets = blob
            .chunks(MAX_PAYLOAD)
            .zip(first_seq..)
            .map(|(chunk, seq)| Packet::data_unchecked(seq, peer, chunk.to_vec()))
            .collect();
        Self { first_seq, packets }
    }

    /// Number of fragments needed for a blob of `len` bytes.
    pub fn count_for(len: usize) -> usize {
        len.div_ceil(MAX_PAYLOAD)
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Sequence number of fragment 0.
    pub fn first_seq(&self) -> u64 {
        self.first_seq
    }

    /// First sequence number *after* this set.
    pub fn next_seq(&self) -> u64 {
        self.first_seq + self.packets.len() as u64
    }

    pub fn get(&self, index: usize) -> Option<&Packet> {
        self.packets.get(index)
    }

    /// Index of the fragment carrying `seq`, if it belongs to this set.
    pub fn index_of(&self, seq: u64) -> Option<usize> {
        let offset = seq.checked_sub(self.first_seq)?;
        let index = usize::try_from(offset).ok()?;
        (index < self.packets.len()).then_some(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Packet> {
        self.packets.iter()
    }
}
