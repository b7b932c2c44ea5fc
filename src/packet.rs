//! Wire-format definitions for protocol packets.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], returning
//!   [`CorruptionError`] for malformed, truncated, or bit-flipped input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Layout
//!
//! ```text
//!  0       1       2               6              10      12      14
//!  ┌───────┬───────┬───────────────┬──────────────┬───────┬───────┬─────────┐
//!  │ kind  │ flags │ seq (u32 BE)  │ ack (u32 BE) │ cksum │ plen  │ payload │
//!  └───────┴───────┴───────────────┴──────────────┴───────┴───────┴─────────┘
//! ```
//!
//! The checksum is the 16-bit ones'-complement sum of the whole frame with
//! the checksum field zeroed; an odd-length frame is padded with a single
//! zero byte for the computation only.  A decode failure is indistinguishable
//! from a packet that was never sent, which is exactly how the protocol state
//! machines treat it.

use thiserror::Error;

/// Fixed header size in bytes.
pub const HEADER_LEN: usize = 14;

/// Largest payload a single packet can carry (`payload_len` is a u16).
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Acknowledgement field is valid (piggybacked on data segments).
    pub const ACK: u8 = 0b0000_0001;
    /// Reset — the sender is aborting the conversation.
    pub const RST: u8 = 0b0000_0010;
}

/// Discriminant carried in the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    /// Application payload.
    Data = 0,
    /// Positive acknowledgement.
    Ack = 1,
    /// Negative acknowledgement (rdt2.0 only).
    Nak = 2,
    /// Handshake initiation.
    Syn = 3,
    /// Handshake reply.
    SynAck = 4,
    /// Sender has no more data.
    Fin = 5,
    /// Acknowledgement of a FIN.
    FinAck = 6,
}

impl PacketKind {
    fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => PacketKind::Data,
            1 => PacketKind::Ack,
            2 => PacketKind::Nak,
            3 => PacketKind::Syn,
            4 => PacketKind::SynAck,
            5 => PacketKind::Fin,
            6 => PacketKind::FinAck,
            _ => return None,
        })
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PacketKind::Data => "DATA",
            PacketKind::Ack => "ACK",
            PacketKind::Nak => "NAK",
            PacketKind::Syn => "SYN",
            PacketKind::SynAck => "SYN-ACK",
            PacketKind::Fin => "FIN",
            PacketKind::FinAck => "FIN-ACK",
        };
        f.write_str(name)
    }
}

/// A complete protocol datagram: header fields + payload bytes.
///
/// The checksum is not stored; it is computed on [`encode`](Packet::encode)
/// and verified on [`decode`](Packet::decode).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Sequence number (protocol-specific interpretation).
    pub seq: u32,
    /// Acknowledgement number (meaningful for ACK-bearing kinds).
    pub ack: u32,
    pub payload: Vec<u8>,
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorruptionError {
    /// Buffer shorter than the fixed header size.
    #[error("frame shorter than the {HEADER_LEN}-byte header")]
    Truncated,
    /// `payload_len` field does not match the actual remaining bytes.
    #[error("payload length field disagrees with frame size")]
    LengthMismatch,
    /// The kind byte is not a known packet kind.
    #[error("unknown packet kind {0}")]
    BadKind(u8),
    /// Checksum did not match the recomputed value.
    #[error("checksum mismatch")]
    Checksum,
}

impl Packet {
    /// Convenience constructor for a payload-free packet.
    pub fn control(kind: PacketKind, seq: u32, ack: u32) -> Self {
        Self {
            kind,
            flags: 0,
            seq,
            ack,
            payload: Vec::new(),
        }
    }

    /// Convenience constructor for a DATA packet.
    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        Self {
            kind: PacketKind::Data,
            flags: 0,
            seq,
            ack: 0,
            payload,
        }
    }

    /// Serialise this packet into a newly allocated byte vector.
    ///
    /// # Panics
    ///
    /// Panics if the payload exceeds [`MAX_PAYLOAD`]; senders segment data
    /// well below that bound.
    pub fn encode(&self) -> Vec<u8> {
        assert!(
            self.payload.len() <= MAX_PAYLOAD,
            "payload of {} bytes does not fit a single packet",
            self.payload.len()
        );
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(self.kind as u8);
        buf.push(self.flags);
        buf.extend_from_slice(&self.seq.to_be_bytes());
        buf.extend_from_slice(&self.ack.to_be_bytes());
        buf.extend_from_slice(&[0, 0]); // checksum placeholder
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);

        let cksum = checksum16(&buf);
        buf[10..12].copy_from_slice(&cksum.to_be_bytes());
        buf
    }

    /// Parse a [`Packet`] from a raw byte slice, verifying the checksum.
    pub fn decode(buf: &[u8]) -> Result<Self, CorruptionError> {
        if buf.len() < HEADER_LEN {
            return Err(CorruptionError::Truncated);
        }
        let payload_len = u16::from_be_bytes([buf[12], buf[13]]) as usize;
        if payload_len != buf.len() - HEADER_LEN {
            return Err(CorruptionError::LengthMismatch);
        }

        let stored = u16::from_be_bytes([buf[10], buf[11]]);
        let mut scratch = buf.to_vec();
        scratch[10] = 0;
        scratch[11] = 0;
        if checksum16(&scratch) != stored {
            return Err(CorruptionError::Checksum);
        }

        let kind = PacketKind::from_u8(buf[0]).ok_or(CorruptionError::BadKind(buf[0]))?;
        Ok(Self {
            kind,
            flags: buf[1],
            seq: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
            ack: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// 16-bit ones'-complement sum over `data`, odd length padded with a zero.
fn checksum16(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    for chunk in data.chunks(2) {
        let word = u16::from_be_bytes([chunk[0], *chunk.get(1).unwrap_or(&0)]);
        sum += u32::from(word);
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
