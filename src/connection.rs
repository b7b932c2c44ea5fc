//! Per-connection lifecycle: handshake, sliding-window transfer, teardown.
//!
//! A [`TcpConnection`] owns the complete state for one logical peer-to-peer
//! session.  Its responsibilities are:
//! - Driving the finite-state machine (see [`crate::state`]).
//! - Coordinating [`TcpSender`](crate::sender::TcpSender) and
//!   [`TcpReceiver`](crate::receiver::TcpReceiver).
//! - Dispatching inbound packets to the right handler.
//! - Running the single retransmission timer with the adaptive RTO from
//!   [`RetransmitTimer`](crate::timer::RetransmitTimer).
//!
//! # Two usage modes
//!
//! **Sequential** — call `send` / `recv` / `close` directly; each call pumps
//! the event loop (socket + timer) until it can make progress:
//! ```ignore
//! let mut conn = TcpConnection::connect(channel, peer, TcpConfig::default()).await?;
//! conn.send(b"hello").await?;
//! let reply = conn.recv(4096).await?;
//! conn.close().await?;
//! ```
//!
//! **Concurrent** — spawn a background event loop via `run()` and talk to it
//! through bounded queues:
//! ```ignore
//! let mut session = TcpConnection::connect(channel, peer, config).await?.run();
//! session.send(b"bulk".to_vec()).await?;
//! let data = session.recv().await?;
//! session.close().await;
//! ```
//!
//! # Window advertisement
//!
//! The 14-byte header has no window field, so the advertised receive window
//! rides as a 2-byte big-endian payload on pure ACK, SYN, SYN-ACK, and
//! FIN-ACK segments.  DATA segments carry application bytes and leave the
//! peer's last advertisement in force.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::packet::{flags, Packet, PacketKind};
use crate::receiver::{TcpReceiver, DEFAULT_RCV_WND};
use crate::sender::{AckResult, TcpSender, DEFAULT_MSS};
use crate::socket::{Channel, ChannelError};
use crate::state::ConnectionState;
use crate::timer::{RetransmitTimer, TimerConfig};

/// Stand-in deadline while the retransmission timer is disarmed.
const FAR_FUTURE: Duration = Duration::from_secs(365 * 24 * 3600);

/// Errors surfaced by the connection API.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// The three-way handshake did not complete within the retry budget.
    #[error("handshake failed")]
    HandshakeFailed,
    /// The connection was closed locally.
    #[error("connection closed")]
    Closed,
    /// Peer abort, or the retransmission cap was exceeded.
    #[error("connection reset")]
    Reset,
    /// An operation deadline elapsed.
    #[error("operation timed out")]
    Timeout,
    /// Non-blocking send found no window room.
    #[error("send window full")]
    WindowFull,
    /// The operation is not legal in the current state.
    #[error("invalid operation in state {0}")]
    BadState(ConnectionState),
}

/// Connection tuning knobs.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Maximum segment size (payload bytes per DATA packet).
    pub mss: usize,
    /// Receive-buffer capacity; also the advertised window.
    pub recv_window: u32,
    /// RTO bounds and initial value.
    pub timer: TimerConfig,
    /// Retransmissions of one segment (or handshake/teardown packet)
    /// before the connection aborts.
    pub max_retries: u32,
    /// Maximum segment lifetime; TIME_WAIT lingers for twice this.
    pub msl: Duration,
    /// Retransmit on the third duplicate ACK without waiting for the timer.
    pub fast_retransmit: bool,
    /// Pin the initial sequence number (random when `None`).
    pub isn: Option<u32>,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            mss: DEFAULT_MSS,
            recv_window: DEFAULT_RCV_WND,
            timer: TimerConfig::default(),
            max_retries: 6,
            msl: Duration::from_secs(30),
            fast_retransmit: true,
            isn: None,
        }
    }
}

/// Transfer counters, readable at any time.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpStats {
    /// Every packet put on the wire a second or later time.
    pub retransmissions: u64,
    /// Retransmissions triggered by a third duplicate ACK.
    pub fast_retransmits: u64,
    /// Valid RTT samples fed to the estimator.
    pub rtt_samples: u64,
    /// SYN retransmissions during the handshake.
    pub syn_retransmissions: u32,
}

/// A reliable byte-stream connection over an unreliable datagram channel.
pub struct TcpConnection {
    /// Current FSM state.
    pub state: ConnectionState,
    channel: Arc<dyn Channel>,
    peer: SocketAddr,
    snd: TcpSender,
    rcv: TcpReceiver,
    rtx: RetransmitTimer,
    /// Deadline of the single retransmission timer; `None` while idle.
    deadline: Option<Instant>,
    /// Sequence number our FIN occupies, once sent.
    fin_seq: Option<u32>,
    cfg: TcpConfig,
    pub stats: TcpStats,
}

fn wnd_payload(wnd: u32) -> Vec<u8> {
    (wnd.min(u32::from(u16::MAX)) as u16).to_be_bytes().to_vec()
}

fn parse_wnd(payload: &[u8]) -> Option<u32> {
    let bytes: [u8; 2] = payload.get(..2)?.try_into().ok()?;
    Some(u32::from(u16::from_be_bytes(bytes)))
}

impl TcpConnection {
    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Active open: send SYN, await SYN-ACK, reply ACK.
    ///
    /// The SYN is retransmitted with exponential back-off up to
    /// `config.max_retries` times before the attempt fails with
    /// [`ConnError::HandshakeFailed`].
    pub async fn connect(
        channel: Arc<dyn Channel>,
        peer: SocketAddr,
        config: TcpConfig,
    ) -> Result<Self, ConnError> {
        let isn: u32 = config.isn.unwrap_or_else(|| rand::rng().random());
        let mut rtx = RetransmitTimer::new(config.timer.clone());
        let mut stats = TcpStats::default();

        let mut syn = Packet::control(PacketKind::Syn, isn, 0);
        syn.payload = wnd_payload(config.recv_window);

        for attempt in 0..=config.max_retries {
            if attempt > 0 {
                stats.syn_retransmissions += 1;
                stats.retransmissions += 1;
                rtx.back_off();
            }
            channel.send_packet(&syn, peer).await?;
            log::debug!("[tcp] → SYN seq={isn} (attempt {})", attempt + 1);

            let deadline = Instant::now() + rtx.rto();
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break; // retransmit the SYN
                }
                let (frame, from) = match channel.recv(Some(remaining)).await {
                    Ok(reply) => reply,
                    Err(ChannelError::Timeout) => break,
                    Err(e) => return Err(e.into()),
                };
                if from != peer {
                    continue;
                }
                let Ok(p) = Packet::decode(&frame) else {
                    continue;
                };
                if p.kind == PacketKind::SynAck && p.ack == isn.wrapping_add(1) {
                    let snd_wnd = parse_wnd(&p.payload).unwrap_or(DEFAULT_RCV_WND);
                    let rcv = TcpReceiver::new(p.seq, config.recv_window);

                    let mut ack =
                        Packet::control(PacketKind::Ack, isn.wrapping_add(1), rcv.ack_seq());
                    ack.payload = wnd_payload(rcv.window());
                    channel.send_packet(&ack, peer).await?;
                    log::debug!("[tcp] ← SYN-ACK seq={}; → ACK; established", p.seq);

                    return Ok(Self {
                        state: ConnectionState::Established,
                        channel,
                        peer,
                        snd: TcpSender::new(isn, config.mss, snd_wnd),
                        rcv,
                        rtx,
                        deadline: None,
                        fin_seq: None,
                        cfg: config,
                        stats,
                    });
                }
                log::debug!("[tcp] ignoring {} while connecting", p.kind);
            }
        }
        log::warn!("[tcp] handshake gave up after {} SYNs", config.max_retries + 1);
        Err(ConnError::HandshakeFailed)
    }

    /// Passive open: wait in LISTEN for a SYN, reply SYN-ACK, await the ACK.
    ///
    /// An early DATA segment carrying the expected acknowledgement also
    /// completes the handshake (the pure ACK may have been lost).
    pub async fn accept(channel: Arc<dyn Channel>, config: TcpConfig) -> Result<Self, ConnError> {
        // LISTEN: everything that is not a SYN is protocol-impossible here
        // and is dropped without corrupting any state.
        let (peer, client_isn, client_wnd) = loop {
            let (frame, from) = channel.recv(None).await?;
            match Packet::decode(&frame) {
                Ok(p) if p.kind == PacketKind::Syn => {
                    log::debug!("[tcp] ← SYN seq={} from {from}", p.seq);
                    break (from, p.seq, parse_wnd(&p.payload).unwrap_or(DEFAULT_RCV_WND));
                }
                Ok(p) => log::debug!("[tcp] dropping {} while listening", p.kind),
                Err(_) => log::debug!("[tcp] dropping corrupt frame while listening"),
            }
        };

        let isn: u32 = config.isn.unwrap_or_else(|| rand::rng().random());
        let mut rtx = RetransmitTimer::new(config.timer.clone());
        let mut stats = TcpStats::default();
        let rcv = TcpReceiver::new(client_isn, config.recv_window);

        let mut syn_ack = Packet::control(PacketKind::SynAck, isn, rcv.ack_seq());
        syn_ack.payload = wnd_payload(rcv.window());

        for attempt in 0..=config.max_retries {
            if attempt > 0 {
                stats.retransmissions += 1;
                rtx.back_off();
            }
            channel.send_packet(&syn_ack, peer).await?;
            log::debug!("[tcp] → SYN-ACK seq={isn} (attempt {})", attempt + 1);

            let deadline = Instant::now() + rtx.rto();
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break; // retransmit the SYN-ACK
                }
                let (frame, from) = match channel.recv(Some(remaining)).await {
                    Ok(reply) => reply,
                    Err(ChannelError::Timeout) => break,
                    Err(e) => return Err(e.into()),
                };
                if from != peer {
                    continue;
                }
                let Ok(p) = Packet::decode(&frame) else {
                    continue;
                };
                match p.kind {
                    // The client never saw our SYN-ACK; resend it now.
                    PacketKind::Syn => break,
                    // A pure ACK completes the handshake; so does an early
                    // DATA or FIN segment carrying the expected ack (the
                    // pure ACK may have been lost).
                    PacketKind::Ack | PacketKind::Data | PacketKind::Fin
                        if p.ack == isn.wrapping_add(1) =>
                    {
                        log::debug!("[tcp] handshake complete with {peer}");
                        let mut conn = Self {
                            state: ConnectionState::Established,
                            channel,
                            peer,
                            snd: TcpSender::new(isn, config.mss, client_wnd),
                            rcv,
                            rtx,
                            deadline: None,
                            fin_seq: None,
                            cfg: config,
                            stats,
                        };
                        if p.kind != PacketKind::Ack {
                            conn.process_packet(p).await?;
                        }
                        return Ok(conn);
                    }
                    other => log::debug!("[tcp] ignoring {other} in SYN_RECEIVED"),
                }
            }
        }
        log::warn!("[tcp] accept gave up waiting for the handshake ACK");
        Err(ConnError::HandshakeFailed)
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Submit bytes to the stream, blocking while the window is full.
    ///
    /// Returns the number of bytes accepted (always `data.len()` unless the
    /// connection dies mid-transfer).
    pub async fn send(&mut self, data: &[u8]) -> Result<usize, ConnError> {
        if !self.state.can_send() {
            return Err(ConnError::BadState(self.state));
        }
        self.snd.buffer(data);
        self.push_segments().await?;
        while self.snd.has_pending() {
            self.pump().await?;
            if !self.state.can_send() {
                return Err(ConnError::Closed);
            }
            self.push_segments().await?;
        }
        Ok(data.len())
    }

    /// Non-blocking variant of [`send`](Self::send): accepts at most the
    /// current window room and fails with [`ConnError::WindowFull`] when
    /// there is none.
    pub async fn try_send(&mut self, data: &[u8]) -> Result<usize, ConnError> {
        if !self.state.can_send() {
            return Err(ConnError::BadState(self.state));
        }
        let room = self.snd.window_available() as usize;
        if room == 0 || self.snd.has_pending() {
            return Err(ConnError::WindowFull);
        }
        let accepted = data.len().min(room);
        self.snd.buffer(&data[..accepted]);
        self.push_segments().await?;
        Ok(accepted)
    }

    /// Read up to `max` in-order bytes, blocking until some are available.
    ///
    /// Returns an empty vector at orderly end-of-stream (peer FIN consumed
    /// and the buffer drained).
    pub async fn recv(&mut self, max: usize) -> Result<Vec<u8>, ConnError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        loop {
            if self.rcv.has_ready() {
                return Ok(self.rcv.read(max));
            }
            if matches!(
                self.state,
                ConnectionState::Closed
                    | ConnectionState::CloseWait
                    | ConnectionState::Closing
                    | ConnectionState::LastAck
                    | ConnectionState::TimeWait
            ) {
                return Ok(Vec::new());
            }
            self.pump().await?;
        }
    }

    /// Block until every submitted byte has been acknowledged.
    pub async fn flush(&mut self) -> Result<(), ConnError> {
        self.push_segments().await?;
        while self.snd.has_pending() || self.snd.has_unacked() {
            self.pump().await?;
            self.push_segments().await?;
        }
        Ok(())
    }

    /// Remote endpoint address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Bytes currently in flight (`SND.NXT − SND.UNA`).
    pub fn bytes_in_flight(&self) -> u32 {
        self.snd.in_flight()
    }

    /// Next sequence number this side will assign (`SND.NXT`).
    pub fn snd_nxt(&self) -> u32 {
        self.snd.snd_nxt
    }

    /// Next sequence number expected from the peer (`RCV.NXT`).
    pub fn rcv_nxt(&self) -> u32 {
        self.rcv.rcv_nxt
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Close the stream gracefully.
    ///
    /// Flushes in-flight data, sends FIN, and walks the teardown states:
    /// the active side `FIN_WAIT_1 → FIN_WAIT_2 → TIME_WAIT → CLOSED`
    /// (through `CLOSING` on simultaneous close), the passive side
    /// `CLOSE_WAIT → LAST_ACK → CLOSED`.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        use ConnectionState::*;
        match self.state {
            Closed => return Ok(()),
            Listen | SynSent | SynReceived => {
                self.state = Closed;
                return Ok(());
            }
            // Teardown already under way elsewhere.
            FinWait1 | FinWait2 | Closing | LastAck | TimeWait => return Ok(()),
            Established | CloseWait => {}
        }

        self.flush().await?;

        let fin_seq = self.snd.take_fin_seq();
        self.fin_seq = Some(fin_seq);
        self.state = if self.state == CloseWait { LastAck } else { FinWait1 };
        self.deadline = None;
        log::debug!("[tcp] → FIN seq={fin_seq}; now {}", self.state);

        let mut fin = Packet::control(PacketKind::Fin, fin_seq, self.rcv.ack_seq());
        fin.flags = flags::ACK;

        'attempts: for attempt in 0..=self.cfg.max_retries {
            if attempt > 0 {
                self.stats.retransmissions += 1;
                self.rtx.back_off();
                log::debug!("[tcp] retransmitting FIN (attempt {})", attempt + 1);
            }
            fin.ack = self.rcv.ack_seq();
            self.channel.send_packet(&fin, self.peer).await?;

            let deadline = Instant::now() + self.rtx.rto();
            loop {
                match self.state {
                    FinWait2 | TimeWait => break 'attempts,
                    Closed => return Ok(()), // LAST_ACK path finished
                    _ => {}
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    continue 'attempts;
                }
                match self.channel.recv(Some(remaining)).await {
                    Err(ChannelError::Timeout) => continue 'attempts,
                    Err(e) => return Err(e.into()),
                    Ok((frame, from)) if from == self.peer => {
                        if let Ok(p) = Packet::decode(&frame) {
                            self.process_packet(p).await?;
                        }
                    }
                    Ok(_) => {}
                }
            }
        }

        if matches!(self.state, FinWait1 | Closing | LastAck) {
            log::warn!("[tcp] FIN never acknowledged; force-closing");
            self.state = Closed;
            return Ok(());
        }

        // Active close: wait (bounded by 2·MSL) for the peer's FIN.
        if self.state == FinWait2 {
            let deadline = Instant::now() + self.cfg.msl * 2;
            while self.state == FinWait2 {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    log::warn!("[tcp] peer FIN never arrived; force-closing");
                    self.state = Closed;
                    return Ok(());
                }
                match self.channel.recv(Some(remaining)).await {
                    Err(ChannelError::Timeout) => {}
                    Err(e) => return Err(e.into()),
                    Ok((frame, from)) if from == self.peer => {
                        if let Ok(p) = Packet::decode(&frame) {
                            self.process_packet(p).await?;
                        }
                    }
                    Ok(_) => {}
                }
            }
        }

        if self.state == TimeWait {
            self.time_wait_linger().await?;
        }
        self.state = Closed;
        Ok(())
    }

    /// Linger 2·MSL re-acknowledging stray FIN retransmissions.
    async fn time_wait_linger(&mut self) -> Result<(), ConnError> {
        let hold = self.cfg.msl * 2;
        log::debug!("[tcp] TIME_WAIT for {hold:?}");
        let deadline = Instant::now() + hold;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.channel.recv(Some(remaining)).await {
                Err(ChannelError::Timeout) => break,
                Err(_) => break,
                Ok((frame, from)) if from == self.peer => {
                    if let Ok(p) = Packet::decode(&frame) {
                        if p.kind == PacketKind::Fin {
                            log::debug!("[tcp] stray FIN in TIME_WAIT; re-ACKing");
                            self.send_fin_ack().await?;
                        }
                    }
                }
                Ok(_) => {}
            }
        }
        self.state = ConnectionState::Closed;
        log::debug!("[tcp] TIME_WAIT elapsed — closed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Event pump
    // -----------------------------------------------------------------------

    /// Transmit every segment the window currently allows.
    async fn push_segments(&mut self) -> Result<(), ConnError> {
        while let Some(seg) = self.snd.next_segment() {
            let pkt = self.data_packet(seg.seq, seg.payload);
            self.channel.send_packet(&pkt, self.peer).await?;
            if self.deadline.is_none() {
                self.deadline = Some(Instant::now() + self.rtx.rto());
            }
            log::debug!(
                "[tcp] → DATA seq={} len={} in_flight={}",
                pkt.seq,
                pkt.payload.len(),
                self.snd.in_flight()
            );
        }
        Ok(())
    }

    /// Wait for exactly one event (packet arrival or timer expiry) and
    /// apply it.
    async fn pump(&mut self) -> Result<(), ConnError> {
        let sleep_at = self
            .deadline
            .unwrap_or_else(|| Instant::now() + FAR_FUTURE);

        tokio::select! {
            result = self.channel.recv(None) => {
                let (frame, from) = result?;
                if from != self.peer {
                    return Ok(());
                }
                match Packet::decode(&frame) {
                    Ok(p) => self.process_packet(p).await?,
                    // Loss and corruption are the state machine's job, not
                    // the application's.
                    Err(_) => log::debug!("[tcp] corrupt frame dropped"),
                }
            }
            _ = tokio::time::sleep_until(sleep_at), if self.deadline.is_some() => {
                self.on_rtx_timeout().await?;
            }
        }
        Ok(())
    }

    /// Dispatch one valid inbound packet against the FSM.
    async fn process_packet(&mut self, p: Packet) -> Result<(), ConnError> {
        if p.flags & flags::RST != 0 {
            log::warn!("[tcp] ← RST; connection reset");
            self.state = ConnectionState::Closed;
            return Err(ConnError::Reset);
        }

        let acks = matches!(p.kind, PacketKind::Ack | PacketKind::FinAck)
            || (p.flags & flags::ACK != 0
                && matches!(p.kind, PacketKind::Data | PacketKind::Fin));
        if acks {
            self.process_ack(&p).await?;
        }

        match p.kind {
            PacketKind::Data if !p.payload.is_empty() => {
                let disp = self.rcv.on_segment(p.seq, &p.payload);
                log::debug!(
                    "[tcp] ← DATA seq={} len={} ({disp:?}); → ACK {}",
                    p.seq,
                    p.payload.len(),
                    self.rcv.ack_seq()
                );
                self.send_ack().await?;
            }
            PacketKind::Data => {} // bare ACK carrier
            PacketKind::Fin => {
                let in_order = self.rcv.on_fin(p.seq);
                self.send_fin_ack().await?;
                if in_order {
                    use ConnectionState::*;
                    let next = match self.state {
                        Established => CloseWait,
                        FinWait1 => Closing, // simultaneous close
                        FinWait2 => TimeWait,
                        other => other,
                    };
                    log::debug!("[tcp] ← FIN; {} → {}", self.state, next);
                    self.state = next;
                }
            }
            // Our handshake ACK was lost and the peer is still replaying
            // the SYN-ACK; acknowledge it again.
            PacketKind::SynAck => self.send_ack().await?,
            PacketKind::Ack | PacketKind::FinAck => {}
            other => {
                // Protocol-impossible here; drop without corrupting state.
                log::debug!("[tcp] dropping unexpected {other} in {}", self.state);
            }
        }
        Ok(())
    }

    /// Apply the acknowledgement fields of an inbound packet.
    async fn process_ack(&mut self, p: &Packet) -> Result<(), ConnError> {
        // A FIN of ours is acknowledged outside the byte-stream machinery.
        if let Some(fin_seq) = self.fin_seq {
            if p.ack == fin_seq.wrapping_add(1) {
                use ConnectionState::*;
                let next = match self.state {
                    FinWait1 => FinWait2,
                    Closing => TimeWait,
                    LastAck => Closed,
                    other => other,
                };
                if next != self.state {
                    log::debug!("[tcp] FIN acked; {} → {next}", self.state);
                    self.state = next;
                }
            }
        }

        let wnd = match p.kind {
            PacketKind::Ack | PacketKind::SynAck | PacketKind::FinAck => parse_wnd(&p.payload),
            _ => None,
        };
        match self.snd.on_ack(p.ack, wnd, Instant::now()) {
            AckResult::Advanced {
                newly_acked,
                rtt_sample,
            } => {
                log::debug!("[tcp] ← ACK {} (+{newly_acked} bytes)", p.ack);
                if let Some(sample) = rtt_sample {
                    self.rtx.record_rtt_sample(sample);
                    self.stats.rtt_samples += 1;
                }
                // Restart the timer for the new oldest segment, or stop it.
                self.deadline = if self.snd.has_unacked() {
                    Some(Instant::now() + self.rtx.rto())
                } else {
                    None
                };
            }
            AckResult::Duplicate { fast_retransmit } => {
                if fast_retransmit && self.cfg.fast_retransmit {
                    self.fast_retransmit().await?;
                }
            }
            AckResult::Ignored => {}
        }
        Ok(())
    }

    /// Third duplicate ACK: resend the segment at `SND.UNA` immediately.
    async fn fast_retransmit(&mut self) -> Result<(), ConnError> {
        let Some(seg) = self.snd.retransmit_oldest(Instant::now()) else {
            return Ok(());
        };
        log::debug!("[tcp] fast retransmit of seq={}", seg.seq);
        let pkt = self.data_packet(seg.seq, seg.payload);
        self.channel.send_packet(&pkt, self.peer).await?;
        self.stats.retransmissions += 1;
        self.stats.fast_retransmits += 1;
        self.deadline = Some(Instant::now() + self.rtx.rto());
        Ok(())
    }

    /// Retransmission timer expiry: resend `SND.UNA`, back off, re-arm.
    async fn on_rtx_timeout(&mut self) -> Result<(), ConnError> {
        let now = Instant::now();
        let Some(seg) = self.snd.retransmit_oldest(now) else {
            self.deadline = None;
            return Ok(());
        };
        if seg.tx_count > self.cfg.max_retries + 1 {
            log::warn!(
                "[tcp] seq={} still unacked after {} transmissions; aborting",
                seg.seq,
                seg.tx_count - 1
            );
            self.state = ConnectionState::Closed;
            return Err(ConnError::Reset);
        }
        log::debug!("[tcp] RTO expired; retransmitting seq={}", seg.seq);
        let pkt = self.data_packet(seg.seq, seg.payload);
        self.channel.send_packet(&pkt, self.peer).await?;
        self.stats.retransmissions += 1;
        self.rtx.back_off();
        self.deadline = Some(now + self.rtx.rto());
        Ok(())
    }

    fn data_packet(&self, seq: u32, payload: Vec<u8>) -> Packet {
        Packet {
            kind: PacketKind::Data,
            flags: flags::ACK,
            seq,
            ack: self.rcv.ack_seq(),
            payload,
        }
    }

    async fn send_ack(&mut self) -> Result<(), ConnError> {
        let mut ack = Packet::control(PacketKind::Ack, self.snd.snd_nxt, self.rcv.ack_seq());
        ack.payload = wnd_payload(self.rcv.window());
        self.channel.send_packet(&ack, self.peer).await?;
        Ok(())
    }

    async fn send_fin_ack(&mut self) -> Result<(), ConnError> {
        let mut ack =
            Packet::control(PacketKind::FinAck, self.snd.snd_nxt, self.rcv.ack_seq());
        ack.payload = wnd_payload(self.rcv.window());
        self.channel.send_packet(&ack, self.peer).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Concurrent mode
    // -----------------------------------------------------------------------

    /// Spawn a background event loop and return a [`TcpSession`] handle.
    ///
    /// The loop multiplexes outbound data (bounded hand-off queue), inbound
    /// packets, and the retransmission timer.  Dropping or closing the
    /// session's send side flushes remaining data and runs the graceful
    /// teardown.
    pub fn run(self) -> TcpSession {
        let (send_tx, send_rx) = mpsc::channel::<Vec<u8>>(64);
        let (recv_tx, recv_rx) = mpsc::channel::<Result<Vec<u8>, ConnError>>(64);
        let handle = tokio::spawn(session_loop(self, send_rx, recv_tx));
        TcpSession {
            send_tx,
            recv_rx,
            handle,
        }
    }
}

/// Handle returned by [`TcpConnection::run`] for concurrent send/receive.
pub struct TcpSession {
    send_tx: mpsc::Sender<Vec<u8>>,
    recv_rx: mpsc::Receiver<Result<Vec<u8>, ConnError>>,
    handle: JoinHandle<()>,
}

impl TcpSession {
    /// Queue bytes for transmission (blocks only when the bounded hand-off
    /// queue is full).
    pub async fn send(&self, data: Vec<u8>) -> Result<(), ConnError> {
        self.send_tx.send(data).await.map_err(|_| ConnError::Closed)
    }

    /// Receive the next chunk of in-order bytes.
    ///
    /// Returns an empty vector at orderly end-of-stream.
    pub async fn recv(&mut self) -> Result<Vec<u8>, ConnError> {
        self.recv_rx.recv().await.unwrap_or_else(|| Ok(Vec::new()))
    }

    /// Signal end-of-stream and wait for the graceful close to finish.
    pub async fn close(self) {
        drop(self.send_tx);
        let _ = self.handle.await;
    }
}

/// Background event loop behind a [`TcpSession`].
async fn session_loop(
    mut conn: TcpConnection,
    mut app_rx: mpsc::Receiver<Vec<u8>>,
    app_tx: mpsc::Sender<Result<Vec<u8>, ConnError>>,
) {
    let mut eof_notified = false;
    loop {
        let sleep_at = conn
            .deadline
            .unwrap_or_else(|| Instant::now() + FAR_FUTURE);

        tokio::select! {
            // New data from the application, eligible only while the stream
            // can take it and nothing is stuck waiting for window room.
            maybe_data = app_rx.recv(), if conn.state.can_send() && !conn.snd.has_pending() => {
                match maybe_data {
                    None => break, // application closed the session
                    Some(data) => {
                        conn.snd.buffer(&data);
                        if let Err(e) = conn.push_segments().await {
                            let _ = app_tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }
            result = conn.channel.recv(None) => {
                let (frame, from) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        let _ = app_tx.send(Err(e.into())).await;
                        return;
                    }
                };
                if from != conn.peer {
                    continue;
                }
                let Ok(p) = Packet::decode(&frame) else {
                    continue;
                };
                if let Err(e) = conn.process_packet(p).await {
                    let _ = app_tx.send(Err(e)).await;
                    return;
                }
                // Window may have opened; keep the pipe full.
                if let Err(e) = conn.push_segments().await {
                    let _ = app_tx.send(Err(e)).await;
                    return;
                }
                if conn.rcv.has_ready() {
                    let data = conn.rcv.read(usize::MAX);
                    if app_tx.send(Ok(data)).await.is_err() {
                        break; // receiver side dropped; shut down
                    }
                } else if conn.state == ConnectionState::CloseWait && !eof_notified {
                    eof_notified = true;
                    if app_tx.send(Ok(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
            _ = tokio::time::sleep_until(sleep_at), if conn.deadline.is_some() => {
                if let Err(e) = conn.on_rtx_timeout().await {
                    let _ = app_tx.send(Err(e)).await;
                    return;
                }
            }
        }
    }
    if let Err(e) = conn.close().await {
        log::debug!("[tcp] close after session shutdown failed: {e}");
    }
}
