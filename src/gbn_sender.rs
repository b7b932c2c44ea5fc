//! Go-Back-N send-side state machine.
//!
//! [`GbnSender`] maintains a sliding window of up to `W` in-flight packets.
//! Unlike stop-and-wait, multiple packets may be outstanding simultaneously.
//!
//! # Protocol contract
//!
//! - At most `W` packets may be in flight at once, with `W ≤ 2^k − 1` for a
//!   k-bit sequence space (checked at construction).
//! - ACKs are **cumulative**: `ACK n` acknowledges every sequence number up
//!   to and including `n`, modulo the space.
//! - On timeout, the caller retransmits **all** unacked packets from `base`
//!   onwards (go back to N).
//!
//! This module only manages state; all socket I/O and the single window
//! timer live in [`crate::gbn_endpoint`].

use std::collections::VecDeque;

use crate::error::ProtocolError;
use crate::packet::Packet;
use crate::seq::SeqSpace;

/// Go-Back-N send-side state for one endpoint.
///
/// # Sequence-number layout
///
/// ```text
///     base            next_seq
///      │                  │
///  ────┼──────────────────┼──────────────────▶ seq space (mod 2^k)
///      │ ◀── in flight ──▶│ ◀── sendable ───▶
/// ```
#[derive(Debug)]
pub struct GbnSender {
    space: SeqSpace,
    window: u32,
    /// Sequence number of the **oldest** unacked packet (left window edge).
    pub base: u32,
    /// Sequence number to assign to the **next** new packet.
    pub next_seq: u32,
    /// In-flight packets ordered by sequence number (front = `base`).
    in_flight: VecDeque<Packet>,
}

impl GbnSender {
    /// Create a sender over a `seq_bits`-bit space with window `W = window`.
    ///
    /// Rejects `window == 0` and `window > 2^k − 1` (with W equal to the
    /// space size, a full-window retransmission is indistinguishable from
    /// new data at the receiver).
    pub fn new(seq_bits: u32, window: u32) -> Result<Self, ProtocolError> {
        let space = SeqSpace::new(seq_bits);
        if window == 0 || window > space.size() - 1 {
            return Err(ProtocolError::Config(format!(
                "GBN window {} outside 1..={} for a {}-bit sequence space",
                window,
                space.size() - 1,
                seq_bits
            )));
        }
        Ok(Self {
            space,
            window,
            base: 0,
            next_seq: 0,
            in_flight: VecDeque::with_capacity(window as usize),
        })
    }

    pub fn space(&self) -> SeqSpace {
        self.space
    }

    /// `true` when there is room for at least one more in-flight packet.
    pub fn can_send(&self) -> bool {
        (self.in_flight.len() as u32) < self.window
    }

    /// Number of packets currently awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// `true` when at least one packet is awaiting acknowledgement.
    pub fn has_unacked(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Build a DATA packet carrying the next sequence number.
    ///
    /// Call [`record_sent`](Self::record_sent) immediately after transmission
    /// to advance `next_seq` and place the packet into the window.
    pub fn data_packet(&self, payload: Vec<u8>) -> Packet {
        Packet::data(self.next_seq, payload)
    }

    /// Place a just-transmitted packet into the window and advance `next_seq`.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if the window is already full.  Check
    /// [`can_send`](Self::can_send) before calling.
    pub fn record_sent(&mut self, packet: Packet) {
        debug_assert!(
            self.can_send(),
            "record_sent called on a full GBN window ({} / {})",
            self.in_flight.len(),
            self.window
        );
        debug_assert_eq!(packet.seq, self.next_seq);
        self.in_flight.push_back(packet);
        self.next_seq = self.space.next(self.next_seq);
    }

    /// Process a cumulative ACK for sequence `n`.
    ///
    /// Accepts only `n ∈ [base, next_seq)`; everything up to and including
    /// `n` leaves the window and `base` becomes `n + 1`.  Returns the number
    /// of newly acknowledged packets (`0` for duplicate or out-of-range
    /// ACKs, which the caller ignores).
    pub fn on_ack(&mut self, n: u32) -> usize {
        let outstanding = self.in_flight.len() as u32;
        if !self.space.in_window(self.base, outstanding, n) {
            return 0;
        }
        let acked = self.space.offset(self.base, n) + 1;
        self.in_flight.drain(..acked as usize);
        self.base = self.space.add(self.base, acked);
        acked as usize
    }

    /// Iterate over all in-flight packets from oldest to newest.
    ///
    /// Used by the endpoint to retransmit `[base, next_seq)` in order on
    /// timeout (the "go back N" step).
    pub fn window_packets(&self) -> impl Iterator<Item = &Packet> {
        self.in_flight.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(bits: u32, window: u32) -> GbnSender {
        GbnSender::new(bits, window).expect("valid config")
    }

    fn push(s: &mut GbnSender, payload: &[u8]) -> u32 {
        let pkt = s.data_packet(payload.to_vec());
        let seq = pkt.seq;
        s.record_sent(pkt);
        seq
    }

    #[test]
    fn initial_state() {
        let s = sender(3, 4);
        assert_eq!(s.base, 0);
        assert_eq!(s.next_seq, 0);
        assert!(s.can_send());
        assert!(!s.has_unacked());
    }

    #[test]
    fn window_up_to_space_minus_one_accepted() {
        assert!(GbnSender::new(3, 7).is_ok());
    }

    #[test]
    fn window_equal_to_space_rejected() {
        assert!(matches!(
            GbnSender::new(3, 8),
            Err(ProtocolError::Config(_))
        ));
    }

    #[test]
    fn zero_window_rejected() {
        assert!(matches!(GbnSender::new(3, 0), Err(ProtocolError::Config(_))));
    }

    #[test]
    fn record_sent_advances_next_seq() {
        let mut s = sender(3, 4);
        push(&mut s, b"a");
        assert_eq!(s.next_seq, 1);
        assert_eq!(s.base, 0); // not acked yet
        assert_eq!(s.in_flight(), 1);
    }

    #[test]
    fn window_full_blocks_send() {
        let mut s = sender(3, 2);
        push(&mut s, b"a");
        push(&mut s, b"b");
        assert!(!s.can_send());
    }

    #[test]
    fn cumulative_ack_slides_multiple() {
        let mut s = sender(3, 4);
        for p in [b"a", b"b", b"c"] {
            push(&mut s, p);
        }
        // ACK 2 covers sequences 0, 1, and 2 at once.
        assert_eq!(s.on_ack(2), 3);
        assert_eq!(s.base, 3);
        assert!(!s.has_unacked());
    }

    #[test]
    fn partial_cumulative_ack() {
        let mut s = sender(3, 4);
        for p in [b"a", b"b", b"c"] {
            push(&mut s, p);
        }
        assert_eq!(s.on_ack(1), 2);
        assert_eq!(s.base, 2);
        assert_eq!(s.in_flight(), 1);
        assert!(s.can_send());
    }

    #[test]
    fn duplicate_ack_ignored() {
        let mut s = sender(3, 4);
        push(&mut s, b"a");
        push(&mut s, b"b");
        assert_eq!(s.on_ack(0), 1);
        // ACK 0 again: base has moved past it.
        assert_eq!(s.on_ack(0), 0);
        assert_eq!(s.base, 1);
    }

    #[test]
    fn ack_beyond_next_seq_ignored() {
        let mut s = sender(3, 4);
        push(&mut s, b"a");
        assert_eq!(s.on_ack(5), 0);
        assert_eq!(s.base, 0);
    }

    #[test]
    fn initial_re_ack_of_minus_one_ignored() {
        // A receiver that has seen nothing re-ACKs `expected − 1`, which is
        // 2^k − 1.  The sender must not mistake it for a real ACK.
        let mut s = sender(3, 4);
        push(&mut s, b"a");
        assert_eq!(s.on_ack(7), 0);
        assert_eq!(s.base, 0);
    }

    #[test]
    fn window_wraps_around_space() {
        let mut s = sender(3, 4);
        // Consume sequences 0..6 so the window straddles the wrap point.
        for i in 0..6u32 {
            push(&mut s, &[i as u8]);
            assert_eq!(s.on_ack(i), 1);
        }
        assert_eq!(s.base, 6);

        let seqs: Vec<u32> = (0..4).map(|_| push(&mut s, b"x")).collect();
        assert_eq!(seqs, vec![6, 7, 0, 1]);
        assert!(!s.can_send());

        // Cumulative ACK for seq 0 covers 6, 7, and 0.
        assert_eq!(s.on_ack(0), 3);
        assert_eq!(s.base, 1);
        assert_eq!(s.in_flight(), 1);
    }

    #[test]
    fn retransmit_iterates_in_order() {
        let mut s = sender(3, 4);
        for p in [b"a", b"b", b"c"] {
            push(&mut s, p);
        }
        let seqs: Vec<u32> = s.window_packets().map(|p| p.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }
}
