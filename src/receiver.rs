//! TCP receive side: reassembly and receive-window management.
//!
//! [`TcpReceiver`] is responsible for everything that happens *after* a raw
//! datagram is decoded into a packet and *before* the application reads
//! contiguous bytes:
//! - Accepting the in-order segment at `RCV.NXT` and appending its bytes.
//! - Buffering out-of-order segments (keyed by sequence number) until the
//!   gap in front of them fills.
//! - Discarding stale duplicates.
//! - Computing the acknowledgement number (`RCV.NXT`) and the advertised
//!   window (remaining buffer capacity) for outbound ACKs.
//!
//! It does **not** send ACKs itself; [`crate::connection`] constructs them
//! from [`ack_seq`](TcpReceiver::ack_seq) and [`window`](TcpReceiver::window).

use std::collections::{BTreeMap, VecDeque};

use crate::seq::seq_lt;

/// Default receive-buffer capacity in bytes (also the advertised window).
pub const DEFAULT_RCV_WND: u32 = 8192;

/// What became of an inbound segment, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentDisposition {
    /// In order; its bytes (plus any contiguous buffered run) are readable.
    Delivered,
    /// Ahead of `RCV.NXT` but within the window; buffered.
    Buffered,
    /// Stale duplicate or outside the window; dropped.
    Dropped,
}

/// Receive-side state for one connection.
#[derive(Debug)]
pub struct TcpReceiver {
    /// Next expected sequence number (`RCV.NXT`).
    pub rcv_nxt: u32,
    capacity: u32,
    /// In-order bytes ready for the application.
    ready: VecDeque<u8>,
    /// Out-of-order segments keyed by sequence number.
    ///
    /// Only exact-key lookups are used, so the map's ordering being
    /// non-circular is irrelevant.
    ooo: BTreeMap<u32, Vec<u8>>,
}

impl TcpReceiver {
    /// `irs` is the peer's initial sequence number; data starts at `irs + 1`.
    pub fn new(irs: u32, capacity: u32) -> Self {
        Self {
            rcv_nxt: irs.wrapping_add(1),
            capacity,
            ready: VecDeque::new(),
            ooo: BTreeMap::new(),
        }
    }

    /// Process an inbound data segment.
    pub fn on_segment(&mut self, seq: u32, payload: &[u8]) -> SegmentDisposition {
        if seq == self.rcv_nxt {
            self.ready.extend(payload.iter().copied());
            self.rcv_nxt = self.rcv_nxt.wrapping_add(payload.len() as u32);
            // Drain the contiguous run the gap was holding back.  Segments
            // are never split or overlapped by the sender, so exact-key
            // lookups suffice.
            while let Some(run) = self.ooo.remove(&self.rcv_nxt) {
                self.rcv_nxt = self.rcv_nxt.wrapping_add(run.len() as u32);
                self.ready.extend(run);
            }
            SegmentDisposition::Delivered
        } else if seq_lt(self.rcv_nxt, seq)
            && seq.wrapping_sub(self.rcv_nxt) < self.capacity
        {
            self.ooo.entry(seq).or_insert_with(|| payload.to_vec());
            SegmentDisposition::Buffered
        } else {
            SegmentDisposition::Dropped
        }
    }

    /// Advance `RCV.NXT` past an in-order FIN (which consumes one sequence
    /// number).  Returns `true` when the FIN was in order.
    pub fn on_fin(&mut self, fin_seq: u32) -> bool {
        if fin_seq == self.rcv_nxt {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            true
        } else {
            false
        }
    }

    /// Acknowledgement number for the next outbound ACK.
    pub fn ack_seq(&self) -> u32 {
        self.rcv_nxt
    }

    /// Advertised window: remaining buffer capacity.
    pub fn window(&self) -> u32 {
        let held = self.ready.len() + self.ooo.values().map(Vec::len).sum::<usize>();
        self.capacity.saturating_sub(held as u32)
    }

    /// `true` when in-order bytes await the application.
    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    /// Take up to `max` in-order bytes.
    pub fn read(&mut self, max: usize) -> Vec<u8> {
        let n = max.min(self.ready.len());
        self.ready.drain(..n).collect()
    }
}
