//! rdt3.0 — the alternating-bit protocol with a retransmission timer.
//!
//! The sender is rdt2.1's augmented with a countdown timer: it is started
//! when DATA goes out, stopped by the matching ACK, and on expiry the packet
//! is retransmitted and the timer restarted.  Expiry is treated identically
//! to a lost ACK, which makes the protocol correct over a channel that
//! loses packets as well as corrupting them.  Stale or corrupt ACKs are
//! ignored while the timer runs; the timer alone drives retransmission.
//!
//! The receiver is unchanged from rdt2.1 and is re-exported here.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::ProtocolError;
use crate::packet::{Packet, PacketKind};
use crate::socket::{Channel, ChannelError};

pub use crate::rdt21::Rdt21Receiver as Rdt30Receiver;

/// Default retransmission timeout.  Must comfortably exceed the round trip
/// plus simulator jitter.
pub const DEFAULT_RTO: Duration = Duration::from_millis(500);

/// Alternating-bit sender with a retransmission timer.
pub struct Rdt30Sender {
    channel: Arc<dyn Channel>,
    peer: SocketAddr,
    seq: u32,
    rto: Duration,
    /// Give up after this many retransmissions of a single packet.
    max_retries: u32,
    /// Total retransmissions across all sends.
    pub retransmissions: u64,
}

impl Rdt30Sender {
    pub fn new(channel: Arc<dyn Channel>, peer: SocketAddr, rto: Duration) -> Self {
        Self {
            channel,
            peer,
            seq: 0,
            rto,
            max_retries: 50,
            retransmissions: 0,
        }
    }

    /// Cap the per-packet retransmission count (default 50).
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Transmit one message, retransmitting on timer expiry until the
    /// matching ACK arrives.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let pkt = Packet::data(self.seq, payload.to_vec());
        let mut attempts = 0u32;

        'retransmit: loop {
            self.channel.send_packet(&pkt, self.peer).await?;
            let deadline = Instant::now() + self.rto;

            // Wait out one timer period, absorbing stale and corrupt ACKs.
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                let reply = match self.channel.recv(Some(remaining)).await {
                    Ok(reply) => reply,
                    Err(ChannelError::Timeout) => {
                        attempts += 1;
                        if attempts > self.max_retries {
                            return Err(ProtocolError::RetriesExhausted(self.max_retries));
                        }
                        self.retransmissions += 1;
                        log::debug!("[rdt3.0] timeout, retransmitting seq {}", self.seq);
                        continue 'retransmit;
                    }
                    Err(e) => return Err(e.into()),
                };

                let (frame, from) = reply;
                if from != self.peer {
                    continue;
                }
                match Packet::decode(&frame) {
                    Ok(p) if p.kind == PacketKind::Ack && p.seq == self.seq => {
                        log::debug!("[rdt3.0] ACK {} accepted", p.seq);
                        self.seq ^= 1;
                        return Ok(());
                    }
                    Ok(p) if p.kind == PacketKind::Ack => {
                        log::debug!("[rdt3.0] stale ACK {} ignored", p.seq);
                    }
                    Err(_) => {
                        log::debug!("[rdt3.0] corrupt reply ignored");
                    }
                    Ok(p) => {
                        log::debug!("[rdt3.0] ignoring unexpected {}", p.kind);
                    }
                }
            }
        }
    }

    pub fn close(self) {}
}
