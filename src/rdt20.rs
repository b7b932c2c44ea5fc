//! rdt2.0 — stop-and-wait with ACK/NAK and no sequence numbers.
//!
//! The sender transmits one DATA packet and waits for a reply: an
//! uncorrupted ACK completes the send, while a NAK or a corrupted reply
//! triggers retransmission.  The receiver NAKs corrupted DATA and ACKs (and
//! delivers) everything else.
//!
//! # The deliberate flaw
//!
//! With no sequence numbers, a corrupted ACK is indistinguishable from a NAK:
//! the sender retransmits and the receiver, unable to recognise the
//! duplicate, delivers the same message twice.  rdt2.0 exists to demonstrate
//! exactly this failure; [`Rdt21Sender`](crate::rdt21::Rdt21Sender) fixes it
//! with the alternating bit.  Duplicates are therefore delivered to the
//! application on purpose.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ProtocolError;
use crate::packet::{Packet, PacketKind};
use crate::socket::{Channel, ChannelError};

/// Stop-and-wait sender half of rdt2.0.
pub struct Rdt20Sender {
    channel: Arc<dyn Channel>,
    peer: SocketAddr,
    /// How long to wait for an ACK/NAK before retransmitting.  rdt2.0 has no
    /// retransmission timer proper; this only guards against a reply lost by
    /// the channel so a demo cannot wedge.
    reply_timeout: Duration,
    /// Total retransmissions across all sends.
    pub retransmissions: u64,
}

impl Rdt20Sender {
    pub fn new(channel: Arc<dyn Channel>, peer: SocketAddr, reply_timeout: Duration) -> Self {
        Self {
            channel,
            peer,
            reply_timeout,
            retransmissions: 0,
        }
    }

    /// Transmit one message and block until an uncorrupted ACK arrives.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        // seq is unused by rdt2.0; it stays 0 on the wire.
        let pkt = Packet::data(0, payload.to_vec());

        loop {
            self.channel.send_packet(&pkt, self.peer).await?;

            let reply = match self.channel.recv(Some(self.reply_timeout)).await {
                Ok(reply) => reply,
                Err(ChannelError::Timeout) => {
                    self.retransmissions += 1;
                    log::debug!("[rdt2.0] reply timeout, retransmitting");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let (frame, from) = reply;
            if from != self.peer {
                continue;
            }
            match Packet::decode(&frame) {
                Ok(p) if p.kind == PacketKind::Ack => {
                    log::debug!("[rdt2.0] ACK received");
                    return Ok(());
                }
                Ok(p) if p.kind == PacketKind::Nak => {
                    self.retransmissions += 1;
                    log::debug!("[rdt2.0] NAK received, retransmitting");
                }
                // A corrupted reply is indistinguishable from a NAK — this is
                // the protocol's documented weakness.
                _ => {
                    self.retransmissions += 1;
                    log::debug!("[rdt2.0] garbled reply, retransmitting");
                }
            }
        }
    }

    /// Release the channel.  No teardown packets exist at this layer.
    pub fn close(self) {}
}

/// Stop-and-wait receiver half of rdt2.0.
///
/// Keeps no sequence state, so retransmitted DATA is delivered again.
pub struct Rdt20Receiver {
    channel: Arc<dyn Channel>,
}

impl Rdt20Receiver {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self { channel }
    }

    /// Return the next DATA payload, ACKing it (or NAKing corruption).
    pub async fn recv(&mut self) -> Result<Vec<u8>, ProtocolError> {
        loop {
            let (frame, from) = self.channel.recv(None).await?;
            match Packet::decode(&frame) {
                Err(_) => {
                    log::debug!("[rdt2.0] corrupt frame, sending NAK");
                    let nak = Packet::control(PacketKind::Nak, 0, 0);
                    self.channel.send_packet(&nak, from).await?;
                }
                Ok(p) if p.kind == PacketKind::Data => {
                    let ack = Packet::control(PacketKind::Ack, 0, 0);
                    self.channel.send_packet(&ack, from).await?;
                    log::debug!("[rdt2.0] delivered {} bytes", p.payload.len());
                    return Ok(p.payload);
                }
                Ok(p) => {
                    log::debug!("[rdt2.0] ignoring unexpected {}", p.kind);
                }
            }
        }
    }

    pub fn close(self) {}
}
