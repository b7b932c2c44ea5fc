//! `rdt-over-udp` — a family of reliable data transfer protocols layered
//! over an unreliable datagram substrate, culminating in a simplified
//! TCP-like byte stream.
//!
//! # Architecture
//!
//! ```text
//!  Application bytes
//!       │ send() / recv()
//!  ┌────▼────────────────────────────────────────────────┐
//!  │  Protocol endpoint (FSM + windows + timers)         │
//!  │   rdt2.0 / rdt2.1 / rdt3.0   GBN   SR   TcpConnection│
//!  └────┬────────────────────────────────────────────────┘
//!       │ Packet (encode / decode + checksum)
//!  ┌────▼──────────────┐     wraps      ┌────────────────┐
//!  │  Channel (trait)  │◀───────────────│  LossyChannel  │
//!  └────┬──────────────┘                └────────────────┘
//!       │ raw UDP datagrams
//!  ┌────▼──────┐
//!  │  Socket   │  (thin async wrapper around tokio UdpSocket)
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]       — wire format (serialise / deserialise, checksum)
//! - [`seq`]          — modular sequence-number arithmetic
//! - [`socket`]       — unreliable datagram channel + async UDP socket
//! - [`simulator`]    — seeded loss/corruption/duplication/reorder injection
//! - [`timer`]        — keyed single-shot timers and the adaptive RTO
//! - [`rdt20`] / [`rdt21`] / [`rdt30`] — the stop-and-wait family
//! - [`gbn_sender`] / [`gbn_receiver`] / [`gbn_endpoint`] — Go-Back-N
//! - [`sr_sender`] / [`sr_receiver`] / [`sr_endpoint`] — Selective Repeat
//! - [`state`] / [`sender`] / [`receiver`] / [`connection`] — simplified TCP
//!
//! Every protocol owns its channel, its state, and its timers exclusively;
//! all state mutation happens on one event loop per endpoint, which suspends
//! only in `Channel::recv` with a timeout equal to the earliest pending
//! timer deadline.

pub mod connection;
pub mod error;
pub mod gbn_endpoint;
pub mod gbn_receiver;
pub mod gbn_sender;
pub mod packet;
pub mod rdt20;
pub mod rdt21;
pub mod rdt30;
pub mod receiver;
pub mod sender;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod sr_endpoint;
pub mod sr_receiver;
pub mod sr_sender;
pub mod state;
pub mod timer;

pub use connection::{ConnError, TcpConfig, TcpConnection, TcpSession, TcpStats};
pub use error::ProtocolError;
pub use gbn_endpoint::{GbnConfig, GbnRecvEndpoint, GbnSendEndpoint, GbnSession};
pub use packet::{CorruptionError, Packet, PacketKind};
pub use simulator::{LossyChannel, SimulatorConfig};
pub use socket::{Channel, ChannelError, Socket};
pub use sr_endpoint::{SrConfig, SrRecvEndpoint, SrSendEndpoint};
pub use state::ConnectionState;
