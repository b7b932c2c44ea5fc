//! TCP send side: segmentation, the retransmission queue, and ACK clocking.
//!
//! [`TcpSender`] is responsible for everything that happens *after* the
//! application hands bytes to the connection layer and *before* they hit
//! the wire:
//! - Buffering unsent application data.
//! - Carving MSS-sized segments eligible under the peer's advertised window.
//! - Assigning 32-bit sequence numbers with wrap-around arithmetic.
//! - Maintaining the retransmission queue (sent-but-unacknowledged
//!   segments) with the per-segment metadata Karn's rule needs.
//! - Advancing `SND.UNA` / `SND.NXT` and counting duplicate ACKs for fast
//!   retransmit.
//!
//! It does **not** talk to the socket; [`crate::connection`] owns dispatch
//! and the retransmission timer.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::seq::{seq_between, seq_le};

/// Default maximum segment size (payload bytes per DATA packet).
pub const DEFAULT_MSS: usize = 1024;

/// An entry in the retransmission queue.
///
/// The metadata lives next to the bytes: `sent_at` feeds RTT sampling,
/// `retransmitted` implements Karn's rule (a retransmitted segment never
/// produces a sample), and `tx_count` drives the give-up cap.
#[derive(Debug, Clone)]
pub struct SegmentEntry {
    pub seq: u32,
    pub payload: Vec<u8>,
    pub sent_at: Instant,
    pub tx_count: u32,
    pub retransmitted: bool,
}

impl SegmentEntry {
    /// First sequence number after this segment's payload.
    fn end(&self) -> u32 {
        self.seq.wrapping_add(self.payload.len() as u32)
    }
}

/// Outcome of processing one acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckResult {
    /// `SND.UNA` advanced.  `rtt_sample` is present when the oldest newly
    /// acked segment had never been retransmitted (Karn's rule).
    Advanced {
        newly_acked: u32,
        rtt_sample: Option<Duration>,
    },
    /// `ack == SND.UNA` with data outstanding.  `fast_retransmit` is set on
    /// exactly the third consecutive duplicate.
    Duplicate { fast_retransmit: bool },
    /// Stale or out-of-range acknowledgement; ignored.
    Ignored,
}

/// Send-side state for one connection.
#[derive(Debug)]
pub struct TcpSender {
    /// Oldest unacknowledged sequence number.
    pub snd_una: u32,
    /// Next sequence number to assign.
    pub snd_nxt: u32,
    /// Send window: the peer's most recent advertisement.
    pub snd_wnd: u32,
    mss: usize,
    /// Application bytes accepted but not yet segmented.
    pending: VecDeque<u8>,
    /// Sent-but-unacked segments in sequence order (front = `snd_una`).
    queue: VecDeque<SegmentEntry>,
    dup_acks: u32,
}

impl TcpSender {
    /// `isn` is the initial sequence number; data starts at `isn + 1`
    /// (the SYN consumes one sequence number).
    pub fn new(isn: u32, mss: usize, snd_wnd: u32) -> Self {
        assert!(mss > 0, "MSS must be positive");
        let start = isn.wrapping_add(1);
        Self {
            snd_una: start,
            snd_nxt: start,
            snd_wnd,
            mss,
            pending: VecDeque::new(),
            queue: VecDeque::new(),
            dup_acks: 0,
        }
    }

    /// Accept application bytes into the send buffer.
    pub fn buffer(&mut self, data: &[u8]) {
        self.pending.extend(data.iter().copied());
    }

    /// `true` while buffered bytes await segmentation.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// `true` while any segment awaits acknowledgement.
    pub fn has_unacked(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Bytes in flight: `SND.NXT − SND.UNA`.
    pub fn in_flight(&self) -> u32 {
        self.snd_nxt.wrapping_sub(self.snd_una)
    }

    /// Window room left for new segments.
    pub fn window_available(&self) -> u32 {
        self.snd_wnd.saturating_sub(self.in_flight())
    }

    /// Carve the next eligible segment from the pending buffer.
    ///
    /// A segment is eligible while
    /// `SND.NXT − SND.UNA + segment_len ≤ SND.WND`.  The entry joins the
    /// retransmission queue stamped with the current time; the caller
    /// transmits it and arms the timer if idle.  Returns `None` when the
    /// buffer is empty or the window is exhausted.
    pub fn next_segment(&mut self) -> Option<SegmentEntry> {
        if self.pending.is_empty() {
            return None;
        }
        let room = self.window_available() as usize;
        if room == 0 {
            return None;
        }
        let len = self.mss.min(self.pending.len()).min(room);
        let payload: Vec<u8> = self.pending.drain(..len).collect();
        let entry = SegmentEntry {
            seq: self.snd_nxt,
            payload,
            sent_at: Instant::now(),
            tx_count: 1,
            retransmitted: false,
        };
        self.snd_nxt = self.snd_nxt.wrapping_add(len as u32);
        self.queue.push_back(entry.clone());
        Some(entry)
    }

    /// Process `ACK(ack, wnd)` against the retransmission queue.
    pub fn on_ack(&mut self, ack: u32, wnd: Option<u32>, now: Instant) -> AckResult {
        if seq_between(self.snd_una, ack, self.snd_nxt) {
            let newly_acked = ack.wrapping_sub(self.snd_una);
            self.snd_una = ack;
            if let Some(w) = wnd {
                self.snd_wnd = w;
            }
            self.dup_acks = 0;

            // Drop fully covered segments; sample RTT from the oldest one
            // that was never retransmitted (Karn's rule).
            let mut rtt_sample = None;
            while let Some(front) = self.queue.front() {
                if !seq_le(front.end(), ack) {
                    break;
                }
                let seg = self.queue.pop_front().expect("front checked");
                if rtt_sample.is_none() && !seg.retransmitted {
                    rtt_sample = Some(now.saturating_duration_since(seg.sent_at));
                }
            }
            AckResult::Advanced {
                newly_acked,
                rtt_sample,
            }
        } else if ack == self.snd_una && !self.queue.is_empty() {
            self.dup_acks += 1;
            AckResult::Duplicate {
                fast_retransmit: self.dup_acks == 3,
            }
        } else {
            AckResult::Ignored
        }
    }

    /// Oldest unacknowledged segment, if any.
    pub fn oldest_unacked(&self) -> Option<&SegmentEntry> {
        self.queue.front()
    }

    /// Mark the oldest segment retransmitted and return a copy to put on
    /// the wire.  The returned `tx_count` includes this transmission.
    pub fn retransmit_oldest(&mut self, now: Instant) -> Option<SegmentEntry> {
        let front = self.queue.front_mut()?;
        front.tx_count += 1;
        front.retransmitted = true;
        front.sent_at = now;
        Some(front.clone())
    }

    /// Claim the sequence number a FIN will occupy (it consumes one).
    pub fn take_fin_seq(&mut self) -> u32 {
        let seq = self.snd_nxt;
        self.snd_nxt = self.snd_nxt.wrapping_add(1);
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(wnd: u32) -> TcpSender {
        // ISN 99 → data starts at 100.
        TcpSender::new(99, 4, wnd)
    }

    #[test]
    fn segments_respect_mss() {
        let mut s = sender(100);
        s.buffer(b"abcdefghij");
        let a = s.next_segment().unwrap();
        let b = s.next_segment().unwrap();
        let c = s.next_segment().unwrap();
        assert_eq!((a.seq, a.payload.as_slice()), (100, b"abcd".as_slice()));
        assert_eq!((b.seq, b.payload.as_slice()), (104, b"efgh".as_slice()));
        assert_eq!((c.seq, c.payload.as_slice()), (108, b"ij".as_slice()));
        assert!(s.next_segment().is_none());
        assert_eq!(s.snd_nxt, 110);
    }

    #[test]
    fn window_gates_segmentation() {
        let mut s = sender(6);
        s.buffer(b"abcdefghij");
        assert_eq!(s.next_segment().unwrap().payload, b"abcd");
        // Only 2 window bytes left.
        assert_eq!(s.next_segment().unwrap().payload, b"ef");
        assert!(s.next_segment().is_none(), "window exhausted");
        assert_eq!(s.window_available(), 0);
        assert!(s.has_pending());
    }

    #[test]
    fn ack_advances_and_frees_window() {
        let mut s = sender(6);
        s.buffer(b"abcdefghij");
        s.next_segment();
        s.next_segment();

        let res = s.on_ack(104, Some(6), Instant::now());
        assert!(matches!(
            res,
            AckResult::Advanced { newly_acked: 4, rtt_sample: Some(_) }
        ));
        assert_eq!(s.snd_una, 104);
        assert_eq!(s.window_available(), 4);
        assert!(s.next_segment().is_some(), "window reopened");
    }

    #[test]
    fn stale_and_future_acks_ignored() {
        let mut s = sender(100);
        s.buffer(b"abcd");
        s.next_segment();
        assert_eq!(s.on_ack(99, None, Instant::now()), AckResult::Ignored);
        assert_eq!(s.on_ack(200, None, Instant::now()), AckResult::Ignored);
        assert_eq!(s.snd_una, 100);
    }

    #[test]
    fn third_duplicate_ack_signals_fast_retransmit() {
        let mut s = sender(100);
        s.buffer(b"abcdefgh");
        s.next_segment();
        s.next_segment();

        for expect_fire in [false, false, true, false] {
            let res = s.on_ack(100, None, Instant::now());
            assert_eq!(
                res,
                AckResult::Duplicate {
                    fast_retransmit: expect_fire
                }
            );
        }
    }

    #[test]
    fn advancing_ack_resets_duplicate_count() {
        let mut s = sender(100);
        s.buffer(b"abcdefgh");
        s.next_segment();
        s.next_segment();
        s.on_ack(100, None, Instant::now());
        s.on_ack(100, None, Instant::now());
        assert!(matches!(
            s.on_ack(104, None, Instant::now()),
            AckResult::Advanced { .. }
        ));
        // The counter starts over for the next hole.
        assert_eq!(
            s.on_ack(104, None, Instant::now()),
            AckResult::Duplicate {
                fast_retransmit: false
            }
        );
    }

    #[test]
    fn retransmitted_segment_yields_no_rtt_sample() {
        let mut s = sender(100);
        s.buffer(b"abcd");
        s.next_segment();
        s.retransmit_oldest(Instant::now());

        let res = s.on_ack(104, None, Instant::now());
        assert!(matches!(
            res,
            AckResult::Advanced {
                rtt_sample: None,
                ..
            }
        ));
    }

    #[test]
    fn retransmit_bumps_count_and_flags() {
        let mut s = sender(100);
        s.buffer(b"abcd");
        s.next_segment();

        let again = s.retransmit_oldest(Instant::now()).unwrap();
        assert_eq!(again.tx_count, 2);
        assert!(again.retransmitted);
        assert_eq!(again.seq, 100);
    }

    #[test]
    fn sequence_numbers_wrap() {
        let mut s = TcpSender::new(u32::MAX - 2, 4, 100);
        s.buffer(b"abcdefgh");
        let a = s.next_segment().unwrap();
        let b = s.next_segment().unwrap();
        assert_eq!(a.seq, u32::MAX - 1);
        assert_eq!(b.seq, 3);

        let res = s.on_ack(7, None, Instant::now());
        assert!(matches!(res, AckResult::Advanced { newly_acked: 8, .. }));
        assert!(!s.has_unacked());
    }

    #[test]
    fn fin_consumes_one_sequence_number() {
        let mut s = sender(100);
        assert_eq!(s.take_fin_seq(), 100);
        assert_eq!(s.snd_nxt, 101);
    }
}
