//! rdt2.1 — alternating-bit stop-and-wait without NAKs.
//!
//! Each DATA packet carries a one-bit sequence number.  The receiver ACKs
//! the sequence it delivered; when a packet is corrupted or duplicated it
//! re-ACKs the *previous* sequence instead of sending a NAK, which the
//! sender reads as "resend the current packet".  The alternating bit lets
//! the receiver recognise retransmitted duplicates and suppress them,
//! closing the corrupted-ACK hole of rdt2.0.
//!
//! rdt2.1 still has no timer — it recovers from corruption, not loss.  The
//! sender blocks until a reply arrives; see
//! [`Rdt30Sender`](crate::rdt30::Rdt30Sender) for the timer-augmented
//! variant that survives a lossy channel.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::ProtocolError;
use crate::packet::{Packet, PacketKind};
use crate::socket::Channel;

/// Alternating-bit sender: `WaitCall0 → WaitAck0 → WaitCall1 → WaitAck1 → …`
///
/// The `WaitCall` states are the gaps between [`send`](Rdt21Sender::send)
/// invocations; `seq` records which half of the cycle we are in.
pub struct Rdt21Sender {
    channel: Arc<dyn Channel>,
    peer: SocketAddr,
    /// Sequence bit for the next DATA packet.
    seq: u32,
    /// Total retransmissions across all sends.
    pub retransmissions: u64,
}

impl Rdt21Sender {
    pub fn new(channel: Arc<dyn Channel>, peer: SocketAddr) -> Self {
        Self {
            channel,
            peer,
            seq: 0,
            retransmissions: 0,
        }
    }

    /// Transmit one message and block until the matching ACK arrives.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        let pkt = Packet::data(self.seq, payload.to_vec());
        self.channel.send_packet(&pkt, self.peer).await?;

        loop {
            let (frame, from) = self.channel.recv(None).await?;
            if from != self.peer {
                continue;
            }
            match Packet::decode(&frame) {
                Ok(p) if p.kind == PacketKind::Ack && p.seq == self.seq => {
                    log::debug!("[rdt2.1] ACK {} accepted", p.seq);
                    self.seq ^= 1;
                    return Ok(());
                }
                // Re-ACK of the previous sequence or a garbled reply both
                // mean the receiver did not take this packet.
                Ok(p) if p.kind == PacketKind::Ack => {
                    self.retransmissions += 1;
                    log::debug!("[rdt2.1] stale ACK {}, retransmitting seq {}", p.seq, self.seq);
                    self.channel.send_packet(&pkt, self.peer).await?;
                }
                Err(_) => {
                    self.retransmissions += 1;
                    log::debug!("[rdt2.1] corrupt reply, retransmitting seq {}", self.seq);
                    self.channel.send_packet(&pkt, self.peer).await?;
                }
                Ok(p) => {
                    log::debug!("[rdt2.1] ignoring unexpected {}", p.kind);
                }
            }
        }
    }

    pub fn close(self) {}
}

/// Alternating-bit receiver: `WaitData0 ⇄ WaitData1`.
pub struct Rdt21Receiver {
    channel: Arc<dyn Channel>,
    /// Sequence bit of the next in-order packet.
    expected: u32,
}

impl Rdt21Receiver {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self {
            channel,
            expected: 0,
        }
    }

    /// Return the next in-order DATA payload.
    ///
    /// Corrupted or duplicate packets are answered with an ACK for the
    /// previously delivered sequence and never surface to the application.
    pub async fn recv(&mut self) -> Result<Vec<u8>, ProtocolError> {
        loop {
            let (frame, from) = self.channel.recv(None).await?;
            match Packet::decode(&frame) {
                Ok(p) if p.kind == PacketKind::Data && p.seq == self.expected => {
                    self.send_ack(self.expected, from).await?;
                    self.expected ^= 1;
                    log::debug!("[rdt2.1] delivered seq {} ({} bytes)", p.seq, p.payload.len());
                    return Ok(p.payload);
                }
                Ok(p) if p.kind == PacketKind::Data => {
                    // Duplicate of the previous packet: its ACK was lost or
                    // garbled.  Re-ACK so the sender can move on.
                    log::debug!("[rdt2.1] duplicate seq {}, re-ACKing", p.seq);
                    self.send_ack(p.seq, from).await?;
                }
                Err(_) => {
                    log::debug!("[rdt2.1] corrupt frame, re-ACKing seq {}", self.expected ^ 1);
                    self.send_ack(self.expected ^ 1, from).await?;
                }
                Ok(p) => {
                    log::debug!("[rdt2.1] ignoring unexpected {}", p.kind);
                }
            }
        }
    }

    async fn send_ack(&self, seq: u32, to: SocketAddr) -> Result<(), ProtocolError> {
        let ack = Packet::control(PacketKind::Ack, seq, 0);
        self.channel.send_packet(&ack, to).await?;
        Ok(())
    }

    pub fn close(self) {}
}
