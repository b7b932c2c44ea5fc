//! Selective Repeat endpoints: socket I/O and per-slot timers.
//!
//! Each transmitted packet arms its own timer in a
//! [`TimerQueue`](crate::timer::TimerQueue); the ACK for a slot cancels that
//! slot's timer, and an expiry retransmits exactly that slot.  The event
//! loop sleeps until the earliest live deadline, so timer handling is
//! serialized with packet arrivals — there is no thread per timer.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ProtocolError;
use crate::packet::{Packet, PacketKind};
use crate::socket::Channel;
use crate::sr_receiver::{SrReceiver, SrRecvAction};
use crate::sr_sender::{SrAckOutcome, SrSender};
use crate::timer::TimerQueue;

/// Stand-in deadline while no slot timer is armed.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);

/// Tuning knobs shared by both SR endpoints.
#[derive(Debug, Clone)]
pub struct SrConfig {
    /// Sequence-number width in bits (space size `2^k`).
    pub seq_bits: u32,
    /// Window size `W`; must satisfy `W ≤ 2^(k−1)`.
    pub window: u32,
    /// Per-slot retransmission timeout.
    pub rto: Duration,
    /// Transmissions of a single packet before giving up.
    pub max_retries: u32,
}

impl Default for SrConfig {
    fn default() -> Self {
        Self {
            seq_bits: 8,
            window: 4,
            rto: Duration::from_millis(500),
            max_retries: 10,
        }
    }
}

/// Sending half of a Selective Repeat transfer.
pub struct SrSendEndpoint {
    channel: Arc<dyn Channel>,
    peer: SocketAddr,
    pub sender: SrSender,
    timers: TimerQueue<u32>,
    rto: Duration,
    max_retries: u32,
    /// Total packets retransmitted.
    pub retransmissions: u64,
}

impl SrSendEndpoint {
    pub fn new(
        channel: Arc<dyn Channel>,
        peer: SocketAddr,
        config: SrConfig,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel,
            peer,
            sender: SrSender::new(config.seq_bits, config.window)?,
            timers: TimerQueue::new(),
            rto: config.rto,
            max_retries: config.max_retries,
            retransmissions: 0,
        })
    }

    /// Queue one message for delivery, blocking while the window is full.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        while !self.sender.can_send() {
            self.pump().await?;
        }
        let pkt = self.sender.data_packet(payload.to_vec());
        let seq = pkt.seq;
        self.channel.send_packet(&pkt, self.peer).await?;
        self.sender.record_sent(pkt);
        self.timers.start(seq, self.rto);
        log::debug!("[sr] → DATA seq={seq} in_flight={}", self.sender.in_flight());
        Ok(())
    }

    /// Wait until every slot has been acknowledged.
    pub async fn flush(&mut self) -> Result<(), ProtocolError> {
        while self.sender.has_unacked() {
            self.pump().await?;
        }
        Ok(())
    }

    /// Flush outstanding packets and release the channel.
    pub async fn close(mut self) -> Result<(), ProtocolError> {
        self.flush().await
    }

    /// Wait for exactly one event (ACK arrival or slot expiry) and apply it.
    async fn pump(&mut self) -> Result<(), ProtocolError> {
        let next_deadline = self.timers.next_deadline();
        let sleep_at = next_deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE);

        tokio::select! {
            result = self.channel.recv(None) => {
                let (frame, from) = result?;
                self.on_frame(&frame, from);
            }
            _ = tokio::time::sleep_until(sleep_at), if next_deadline.is_some() => {
                self.on_expiries().await?;
            }
        }
        Ok(())
    }

    /// Handle one inbound frame (selective ACK or noise).
    fn on_frame(&mut self, frame: &[u8], from: SocketAddr) {
        if from != self.peer {
            return;
        }
        match Packet::decode(frame) {
            Ok(p) if p.kind == PacketKind::Ack => match self.sender.on_ack(p.seq) {
                SrAckOutcome::Newly { slots_freed } => {
                    self.timers.cancel(&p.seq);
                    log::debug!("[sr] ← ACK {} (freed {slots_freed} slot(s))", p.seq);
                }
                SrAckOutcome::Duplicate => {
                    log::debug!("[sr] ← duplicate ACK {}", p.seq);
                }
                SrAckOutcome::OutOfWindow => {
                    log::debug!("[sr] ← stray ACK {}", p.seq);
                }
            },
            Err(_) => log::debug!("[sr] corrupt frame ignored"),
            Ok(p) => log::debug!("[sr] ignoring unexpected {}", p.kind),
        }
    }

    /// Retransmit every slot whose timer has expired.
    async fn on_expiries(&mut self) -> Result<(), ProtocolError> {
        let now = Instant::now();
        while let Some(seq) = self.timers.pop_expired(now) {
            let Some(pkt) = self.sender.packet_for(seq).cloned() else {
                continue; // acked in the meantime
            };
            self.channel.send_packet(&pkt, self.peer).await?;
            let tx_count = self.sender.on_retransmit(seq);
            if tx_count > self.max_retries {
                return Err(ProtocolError::RetriesExhausted(self.max_retries));
            }
            self.retransmissions += 1;
            self.timers.start(seq, self.rto);
            log::debug!("[sr] slot {seq} timed out — retransmitted (tx {tx_count})");
        }
        Ok(())
    }
}

/// Receiving half of a Selective Repeat transfer.
pub struct SrRecvEndpoint {
    channel: Arc<dyn Channel>,
    pub receiver: SrReceiver,
}

impl SrRecvEndpoint {
    pub fn new(channel: Arc<dyn Channel>, config: SrConfig) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel,
            receiver: SrReceiver::new(config.seq_bits, config.window)?,
        })
    }

    /// Return the next in-order message, buffering gaps as they arrive.
    pub async fn recv(&mut self) -> Result<Vec<u8>, ProtocolError> {
        loop {
            if let Some(payload) = self.receiver.next_ready() {
                return Ok(payload);
            }
            let (frame, from) = self.channel.recv(None).await?;
            match Packet::decode(&frame) {
                Ok(p) if p.kind == PacketKind::Data => {
                    match self.receiver.on_data(p.seq, p.payload) {
                        SrRecvAction::Ack(n) => {
                            let ack = Packet::control(PacketKind::Ack, n, 0);
                            self.channel.send_packet(&ack, from).await?;
                            log::debug!("[sr] ← DATA seq={} ; → ACK {n}", p.seq);
                        }
                        SrRecvAction::Ignore => {
                            log::debug!("[sr] ← DATA seq={} outside windows", p.seq);
                        }
                    }
                }
                // Corrupt frames are dropped; the sender's slot timer covers.
                Err(_) => log::debug!("[sr] corrupt frame ignored"),
                Ok(p) => log::debug!("[sr] ignoring unexpected {}", p.kind),
            }
        }
    }

    pub fn close(self) {}
}
