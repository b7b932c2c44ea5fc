//! Go-Back-N receive-side state machine.
//!
//! [`GbnReceiver`] implements the receiver side of Go-Back-N:
//!
//! - Only **in-order** packets are accepted (`seq == expected`).
//! - Out-of-order, duplicate, or corrupted packets are discarded and the
//!   previous cumulative ACK is re-emitted.
//! - Every ACK names the highest in-order sequence received
//!   (`expected − 1`, modulo the space).
//!
//! This module only manages state; all socket I/O lives in
//! [`crate::gbn_endpoint`].

use crate::seq::SeqSpace;

/// Go-Back-N receive-side state for one endpoint.
#[derive(Debug)]
pub struct GbnReceiver {
    space: SeqSpace,
    /// Sequence number of the next in-order packet.
    pub expected: u32,
}

impl GbnReceiver {
    pub fn new(seq_bits: u32) -> Self {
        Self {
            space: SeqSpace::new(seq_bits),
            expected: 0,
        }
    }

    /// Process an inbound DATA packet.
    ///
    /// Returns `Some(payload)` when the packet is in order (the caller
    /// delivers it and ACKs with [`ack_seq`](Self::ack_seq)), `None`
    /// otherwise (the caller re-ACKs the unchanged [`ack_seq`](Self::ack_seq)).
    pub fn on_data(&mut self, seq: u32, payload: Vec<u8>) -> Option<Vec<u8>> {
        if seq == self.expected {
            self.expected = self.space.next(self.expected);
            Some(payload)
        } else {
            None
        }
    }

    /// Cumulative ACK value: the highest in-order sequence received.
    ///
    /// Before anything has arrived this is `2^k − 1`, which a correct sender
    /// rejects as out of window.
    pub fn ack_seq(&self) -> u32 {
        self.space.sub(self.expected, 1)
    }
}
