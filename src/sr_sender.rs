//! Selective Repeat send-side state machine.
//!
//! Unlike Go-Back-N, each in-flight packet has its own acknowledgement
//! state and its own retransmission timer; a timeout resends exactly one
//! packet.  The window may therefore contain an arbitrary mix of acked and
//! unacked slots, and `base` advances only past a contiguous acked prefix.
//!
//! # Protocol contract
//!
//! - `W ≤ 2^(k−1)` for a k-bit space — with a larger window the receiver
//!   cannot distinguish a retransmission of an old packet from a new packet
//!   one window later.  Violations are rejected at construction.
//! - ACKs are **selective**: `ACK n` acknowledges exactly sequence `n`.
//!
//! This module only manages state; socket I/O and the per-slot timers live
//! in [`crate::sr_endpoint`].

use std::collections::VecDeque;

use crate::error::ProtocolError;
use crate::packet::Packet;
use crate::seq::SeqSpace;

/// One window slot: a sent-but-possibly-unacked packet.
#[derive(Debug)]
struct Slot {
    packet: Packet,
    acked: bool,
    /// Total number of transmissions of this packet.
    tx_count: u32,
}

/// Result of processing a selective ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrAckOutcome {
    /// First ACK for this slot; `slots_freed` window slots opened up
    /// (non-zero only when the acked slot was `base`).
    Newly { slots_freed: u32 },
    /// The slot was already acked.
    Duplicate,
    /// `n` is outside `[base, next_seq)` and is ignored.
    OutOfWindow,
}

/// Selective Repeat send-side state for one endpoint.
#[derive(Debug)]
pub struct SrSender {
    space: SeqSpace,
    window: u32,
    /// Lowest unacknowledged sequence number (left window edge).
    pub base: u32,
    /// Sequence number to assign to the next new packet.
    pub next_seq: u32,
    /// Slots for `[base, next_seq)`; front corresponds to `base`.
    slots: VecDeque<Slot>,
}

impl SrSender {
    /// Create a sender over a `seq_bits`-bit space with window `W = window`.
    ///
    /// Rejects `window == 0` and `window > 2^(k−1)`.
    pub fn new(seq_bits: u32, window: u32) -> Result<Self, ProtocolError> {
        let space = SeqSpace::new(seq_bits);
        if window == 0 || window > space.size() / 2 {
            return Err(ProtocolError::Config(format!(
                "SR window {} outside 1..={} for a {}-bit sequence space",
                window,
                space.size() / 2,
                seq_bits
            )));
        }
        Ok(Self {
            space,
            window,
            base: 0,
            next_seq: 0,
            slots: VecDeque::with_capacity(window as usize),
        })
    }

    pub fn space(&self) -> SeqSpace {
        self.space
    }

    /// `true` when a new packet may enter the window.
    pub fn can_send(&self) -> bool {
        (self.slots.len() as u32) < self.window
    }

    /// `true` while any slot awaits acknowledgement.
    ///
    /// The slot at `base` is unacked by construction, so any occupied window
    /// has unacked packets.
    pub fn has_unacked(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Number of occupied window slots (acked or not).
    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Build a DATA packet carrying the next sequence number.
    pub fn data_packet(&self, payload: Vec<u8>) -> Packet {
        Packet::data(self.next_seq, payload)
    }

    /// Place a just-transmitted packet into its slot, `sent-unacked`.
    pub fn record_sent(&mut self, packet: Packet) {
        debug_assert!(self.can_send(), "record_sent on a full SR window");
        debug_assert_eq!(packet.seq, self.next_seq);
        self.slots.push_back(Slot {
            packet,
            acked: false,
            tx_count: 1,
        });
        self.next_seq = self.space.next(self.next_seq);
    }

    /// Process a selective ACK for sequence `n`.
    pub fn on_ack(&mut self, n: u32) -> SrAckOutcome {
        if !self.space.in_window(self.base, self.slots.len() as u32, n) {
            return SrAckOutcome::OutOfWindow;
        }
        let idx = self.space.offset(self.base, n) as usize;
        if self.slots[idx].acked {
            return SrAckOutcome::Duplicate;
        }
        self.slots[idx].acked = true;

        // Advance base past the contiguous acked prefix, freeing slots.
        let mut freed = 0u32;
        while self.slots.front().is_some_and(|s| s.acked) {
            self.slots.pop_front();
            freed += 1;
        }
        self.base = self.space.add(self.base, freed);
        SrAckOutcome::Newly { slots_freed: freed }
    }

    /// The packet to retransmit for slot `seq`, if it is still unacked.
    pub fn packet_for(&self, seq: u32) -> Option<&Packet> {
        if !self.space.in_window(self.base, self.slots.len() as u32, seq) {
            return None;
        }
        let slot = &self.slots[self.space.offset(self.base, seq) as usize];
        (!slot.acked).then_some(&slot.packet)
    }

    /// Record a retransmission of slot `seq`; returns the new transmission
    /// count.
    pub fn on_retransmit(&mut self, seq: u32) -> u32 {
        let idx = self.space.offset(self.base, seq) as usize;
        let slot = &mut self.slots[idx];
        slot.tx_count += 1;
        slot.tx_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(bits: u32, window: u32) -> SrSender {
        SrSender::new(bits, window).expect("valid config")
    }

    fn push(s: &mut SrSender, payload: &[u8]) -> u32 {
        let pkt = s.data_packet(payload.to_vec());
        let seq = pkt.seq;
        s.record_sent(pkt);
        seq
    }

    #[test]
    fn window_up_to_half_space_accepted() {
        assert!(SrSender::new(3, 4).is_ok());
    }

    #[test]
    fn window_beyond_half_space_rejected() {
        assert!(matches!(SrSender::new(3, 5), Err(ProtocolError::Config(_))));
    }

    #[test]
    fn ack_of_base_advances_window() {
        let mut s = sender(3, 4);
        push(&mut s, b"a");
        push(&mut s, b"b");
        assert_eq!(s.on_ack(0), SrAckOutcome::Newly { slots_freed: 1 });
        assert_eq!(s.base, 1);
        assert_eq!(s.in_flight(), 1);
    }

    #[test]
    fn ack_in_middle_does_not_advance() {
        let mut s = sender(3, 4);
        for p in [b"a", b"b", b"c"] {
            push(&mut s, p);
        }
        assert_eq!(s.on_ack(1), SrAckOutcome::Newly { slots_freed: 0 });
        assert_eq!(s.base, 0);
        assert_eq!(s.in_flight(), 3);
        assert!(s.has_unacked());
    }

    #[test]
    fn base_ack_skips_past_contiguous_acked_run() {
        let mut s = sender(3, 4);
        for p in [b"a", b"b", b"c", b"d"] {
            push(&mut s, p);
        }
        s.on_ack(1);
        s.on_ack(2);
        // Acking base releases 0, 1, and 2 in one step.
        assert_eq!(s.on_ack(0), SrAckOutcome::Newly { slots_freed: 3 });
        assert_eq!(s.base, 3);
        assert_eq!(s.in_flight(), 1);
        assert!(s.can_send());
    }

    #[test]
    fn duplicate_and_stray_acks_flagged() {
        let mut s = sender(3, 4);
        push(&mut s, b"a");
        push(&mut s, b"b");
        assert_eq!(s.on_ack(1), SrAckOutcome::Newly { slots_freed: 0 });
        assert_eq!(s.on_ack(1), SrAckOutcome::Duplicate);
        assert_eq!(s.on_ack(5), SrAckOutcome::OutOfWindow);
    }

    #[test]
    fn packet_for_skips_acked_slots() {
        let mut s = sender(3, 4);
        push(&mut s, b"a");
        push(&mut s, b"b");
        s.on_ack(1);
        assert!(s.packet_for(0).is_some());
        assert!(s.packet_for(1).is_none(), "acked slot never retransmits");
        assert!(s.packet_for(6).is_none(), "outside the window");
    }

    #[test]
    fn retransmit_count_accumulates() {
        let mut s = sender(3, 4);
        push(&mut s, b"a");
        assert_eq!(s.on_retransmit(0), 2);
        assert_eq!(s.on_retransmit(0), 3);
    }

    #[test]
    fn window_wraps_around_space() {
        let mut s = sender(3, 4);
        for i in 0..7u32 {
            push(&mut s, &[i as u8]);
            s.on_ack(i);
        }
        assert_eq!(s.base, 7);

        let seqs: Vec<u32> = (0..4).map(|_| push(&mut s, b"x")).collect();
        assert_eq!(seqs, vec![7, 0, 1, 2]);

        // Ack out of order across the wrap, then the base.
        s.on_ack(0);
        s.on_ack(1);
        assert_eq!(s.on_ack(7), SrAckOutcome::Newly { slots_freed: 3 });
        assert_eq!(s.base, 2);
    }
}
