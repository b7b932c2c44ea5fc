//! Go-Back-N endpoints: socket I/O and the single window timer.
//!
//! # Architecture
//!
//! ```text
//!  Application
//!      │  send(data) / flush()         GbnSession (concurrent mode)
//!      │                                ┌─────────────────────┐
//!      │  ─── or ───────────────────▶   │  send_tx (channel)  │
//!      ▼                                └──────────┬──────────┘
//!  GbnSendEndpoint                                 │ session_loop task
//!    ├── GbnSender   (window state, seq nums)      │
//!    └── Arc<dyn Channel>  (shared with the task) ─┘
//! ```
//!
//! One retransmission timer covers the whole window: it is armed when the
//! first packet enters an empty window, re-armed whenever `base` advances
//! with packets still outstanding, disarmed when the window drains, and on
//! expiry every packet in `[base, next_seq)` is retransmitted in order.
//!
//! # Two usage modes
//!
//! **Sequential** — call `send` / `flush` directly:
//! ```ignore
//! let mut tx = GbnSendEndpoint::new(channel, peer, GbnConfig::default())?;
//! tx.send(b"hello").await?;
//! tx.flush().await?;
//! ```
//!
//! **Concurrent** — spawn a background event loop via `run()`:
//! ```ignore
//! let session = GbnSendEndpoint::new(channel, peer, config)?.run();
//! session.send(b"msg1".to_vec()).await?;
//! session.send(b"msg2".to_vec()).await?;
//! session.close().await?;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::ProtocolError;
use crate::gbn_receiver::GbnReceiver;
use crate::gbn_sender::GbnSender;
use crate::packet::{Packet, PacketKind};
use crate::socket::Channel;

/// Stand-in deadline while the window timer is disarmed.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);

/// Tuning knobs shared by both GBN endpoints.
#[derive(Debug, Clone)]
pub struct GbnConfig {
    /// Sequence-number width in bits (space size `2^k`).
    pub seq_bits: u32,
    /// Window size `W`; must satisfy `W ≤ 2^k − 1`.
    pub window: u32,
    /// Retransmission timeout for the single window timer.
    pub rto: Duration,
    /// Consecutive expiries without progress before giving up.
    pub max_retries: u32,
}

impl Default for GbnConfig {
    fn default() -> Self {
        Self {
            seq_bits: 8,
            window: 4,
            rto: Duration::from_millis(500),
            max_retries: 10,
        }
    }
}

/// Sending half of a Go-Back-N transfer.
pub struct GbnSendEndpoint {
    channel: Arc<dyn Channel>,
    peer: SocketAddr,
    pub sender: GbnSender,
    rto: Duration,
    max_retries: u32,
    /// Deadline of the single window timer; `None` while disarmed.
    deadline: Option<Instant>,
    /// Consecutive expiries since the window last advanced.
    retries: u32,
    /// Total packets retransmitted.
    pub retransmissions: u64,
}

impl GbnSendEndpoint {
    pub fn new(
        channel: Arc<dyn Channel>,
        peer: SocketAddr,
        config: GbnConfig,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            channel,
            peer,
            sender: GbnSender::new(config.seq_bits, config.window)?,
            rto: config.rto,
            max_retries: config.max_retries,
            deadline: None,
            retries: 0,
            retransmissions: 0,
        })
    }

    /// Queue one message for delivery.
    ///
    /// If the window has space the packet is transmitted immediately and the
    /// call returns; successive sends therefore fill the pipe without
    /// waiting for individual acknowledgements.  If the window is full the
    /// call blocks, pumping ACKs and timeouts, until a slot opens.  Call
    /// [`flush`](Self::flush) after the last send to guarantee delivery.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), ProtocolError> {
        while !self.sender.can_send() {
            self.pump().await?;
        }
        self.transmit(payload.to_vec()).await
    }

    /// Wait until every in-flight packet has been acknowledged.
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

    /// Spawn a background event loop and return a [`GbnSession`] handle.
    ///
    /// The loop multiplexes outbound payloads (from the session's bounded
    /// queue), inbound ACKs, and the window timer.  Dropping or closing the
    /// session's sender signals end-of-stream; the loop then flushes the
    /// window and exits.
    pub fn run(self) -> GbnSession {
        let (send_tx, send_rx) = mpsc::channel::<Vec<u8>>(64);
        let handle = tokio::spawn(session_loop(self, send_rx));
        GbnSession { send_tx, handle }
    }

    /// Transmit a new DATA packet and arm the timer if the window was empty.
    async fn transmit(&mut self, payload: Vec<u8>) -> Result<(), ProtocolError> {
        let pkt = self.sender.data_packet(payload);
        self.channel.send_packet(&pkt, self.peer).await?;
        let was_idle = !self.sender.has_unacked();
        log::debug!(
            "[gbn] → DATA seq={} len={} in_flight={}",
            pkt.seq,
            pkt.payload.len(),
            self.sender.in_flight() + 1
        );
        self.sender.record_sent(pkt);
        if was_idle {
            self.deadline = Some(Instant::now() + self.rto);
        }
        Ok(())
    }

    /// Wait for exactly one event (ACK arrival or timer expiry) and apply it.
    async fn pump(&mut self) -> Result<(), ProtocolError> {
        let sleep_at = self
            .deadline
            .unwrap_or_else(|| Instant::now() + FAR_FUTURE);

        tokio::select! {
            result = self.channel.recv(None) => {
                let (frame, from) = result?;
                self.on_frame(&frame, from);
            }
            _ = tokio::time::sleep_until(sleep_at), if self.deadline.is_some() => {
                self.on_timeout().await?;
            }
        }
        Ok(())
    }

    /// Handle one inbound frame (cumulative ACK or noise).
    fn on_frame(&mut self, frame: &[u8], from: SocketAddr) {
        if from != self.peer {
            return;
        }
        match Packet::decode(frame) {
            Ok(p) if p.kind == PacketKind::Ack => {
                let acked = self.sender.on_ack(p.seq);
                if acked == 0 {
                    return;
                }
                log::debug!("[gbn] ← ACK {} (slid {} pkt)", p.seq, acked);
                self.retries = 0;
                // Restart the timer for the new oldest packet, or disarm it
                // once the window has drained.
                self.deadline = if self.sender.has_unacked() {
                    Some(Instant::now() + self.rto)
                } else {
                    None
                };
            }
            // Corrupted ACKs are ignored; the timer recovers.
            Err(_) => log::debug!("[gbn] corrupt frame ignored"),
            Ok(p) => log::debug!("[gbn] ignoring unexpected {}", p.kind),
        }
    }

    /// Timer expiry: go back N — retransmit the whole window.
    async fn on_timeout(&mut self) -> Result<(), ProtocolError> {
        self.retries += 1;
        if self.retries > self.max_retries {
            return Err(ProtocolError::RetriesExhausted(self.max_retries));
        }
        let pkts: Vec<Packet> = self.sender.window_packets().cloned().collect();
        log::debug!("[gbn] timeout — retransmitting {} packet(s)", pkts.len());
        for pkt in &pkts {
            self.channel.send_packet(pkt, self.peer).await?;
        }
        self.retransmissions += pkts.len() as u64;
        self.deadline = Some(Instant::now() + self.rto);
        Ok(())
    }
}

/// Handle returned by [`GbnSendEndpoint::run`] for concurrent sending.
pub struct GbnSession {
    send_tx: mpsc::Sender<Vec<u8>>,
    handle: JoinHandle<Result<(), ProtocolError>>,
}

impl GbnSession {
    /// Queue a payload for transmission (blocks only when the bounded
    /// hand-off queue is full).
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), ProtocolError> {
        self.send_tx
            .send(payload)
            .await
            .map_err(|_| ProtocolError::Closed)
    }

    /// Signal end-of-stream, wait for the window to drain, and surface any
    /// error the event loop hit.
    pub async fn close(self) -> Result<(), ProtocolError> {
        drop(self.send_tx);
        self.handle.await.map_err(|_| ProtocolError::Closed)?
    }
}

/// Background event loop behind a [`GbnSession`].
async fn session_loop(
    mut ep: GbnSendEndpoint,
    mut app_rx: mpsc::Receiver<Vec<u8>>,
) -> Result<(), ProtocolError> {
    loop {
        let sleep_at = ep.deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE);

        tokio::select! {
            // New data from the application, eligible only with window room.
            maybe_payload = app_rx.recv(), if ep.sender.can_send() => {
                match maybe_payload {
                    None => break, // application closed the session
                    Some(payload) => ep.transmit(payload).await?,
                }
            }
            result = ep.channel.recv(None) => {
                let (frame, from) = result?;
                ep.on_frame(&frame, from);
            }
            _ = tokio::time::sleep_until(sleep_at), if ep.deadline.is_some() => {
                ep.on_timeout().await?;
            }
        }
    }
    ep.flush().await
}

/// Receiving half of a Go-Back-N transfer.
pub struct GbnRecvEndpoint {
    channel: Arc<dyn Channel>,
    pub receiver: GbnReceiver,
}

impl GbnRecvEndpoint {
    pub fn new(channel: Arc<dyn Channel>, config: GbnConfig) -> Self {
        Self {
            channel,
            receiver: GbnReceiver::new(config.seq_bits),
        }
    }

    /// Return the next in-order message.
    ///
    /// Out-of-order, duplicate, and corrupted packets are answered with the
    /// current cumulative ACK and discarded (GBN semantics).
    pub async fn recv(&mut self) -> Result<Vec<u8>, ProtocolError> {
        loop {
            let (frame, from) = self.channel.recv(None).await?;
            match Packet::decode(&frame) {
                Ok(p) if p.kind == PacketKind::Data => {
                    let delivered = self.receiver.on_data(p.seq, p.payload);
                    let ack = Packet::control(PacketKind::Ack, self.receiver.ack_seq(), 0);
                    self.channel.send_packet(&ack, from).await?;
                    match delivered {
                        Some(payload) => {
                            log::debug!(
                                "[gbn] ← DATA seq={} delivered; → ACK {}",
                                p.seq,
                                ack.seq
                            );
                            return Ok(payload);
                        }
                        None => {
                            log::debug!("[gbn] ← DATA seq={} discarded; → ACK {}", p.seq, ack.seq);
                        }
                    }
                }
                Err(_) => {
                    // Corrupt data: re-emit the last cumulative ACK.
                    let ack = Packet::control(PacketKind::Ack, self.receiver.ack_seq(), 0);
                    self.channel.send_packet(&ack, from).await?;
                    log::debug!("[gbn] corrupt frame; → re-ACK {}", ack.seq);
                }
                Ok(p) => log::debug!("[gbn] ignoring unexpected {}", p.kind),
            }
        }
    }

    pub fn close(self) {}
}
