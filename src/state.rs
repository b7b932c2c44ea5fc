//! Connection finite-state machine (FSM) types.
//!
//! This module defines every possible state a
//! [`TcpConnection`](crate::connection::TcpConnection) can occupy, mirroring
//! the TCP state diagram (RFC 793 §3.2) adapted for this protocol.  State
//! transitions are *not* implemented here — they live in
//! [`crate::connection`] — but every legal transition is documented on its
//! source state so the enum doubles as the transition table.
//!
//! Keeping state types in their own module makes it easy to add guard logic
//! or tracing without touching connection plumbing.

/// All possible states of the connection FSM.
///
/// ```text
///  CLOSED ──SYN sent──▶ SYN_SENT ──SYN-ACK──▶ ESTABLISHED
///    ▲                                              │
///    │                                    FIN sent  │
///    │                                              ▼
///  TIME_WAIT ◀── LAST_ACK ◀── CLOSE_WAIT ◀── FIN_WAIT_1
///                                                   │
///                                         FIN rcvd  │
///                                                   ▼
///                               FIN_WAIT_2 ──FIN──▶ CLOSING
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial and terminal state.
    #[default]
    Closed,
    /// Passive side waiting for a SYN.
    ///
    /// Transitions to `SynReceived` on SYN.
    Listen,
    /// SYN has been sent; waiting for SYN-ACK.
    ///
    /// Transitions to `Established` on SYN-ACK, or back to `Closed` on
    /// handshake failure.
    SynSent,
    /// SYN received; SYN-ACK sent; waiting for ACK.
    ///
    /// Transitions to `Established` on ACK (or on data carrying the
    /// expected acknowledgement).
    SynReceived,
    /// Three-way handshake complete; data transfer in progress.
    ///
    /// Transitions to `FinWait1` on local close, `CloseWait` on peer FIN.
    Established,
    /// Local side sent FIN; waiting for its acknowledgement.
    ///
    /// Transitions to `FinWait2` on ACK of FIN, or `Closing` when the peer's
    /// FIN arrives first (simultaneous close).
    FinWait1,
    /// Local FIN acknowledged; waiting for the peer's FIN.
    ///
    /// Transitions to `TimeWait` on peer FIN.
    FinWait2,
    /// Peer's FIN received and acknowledged; local close pending.
    ///
    /// Transitions to `LastAck` when the application closes.
    CloseWait,
    /// Both sides sent FIN simultaneously; waiting for the ACK of ours.
    ///
    /// Transitions to `TimeWait` on ACK of FIN.
    Closing,
    /// FIN sent from `CloseWait`; waiting for its acknowledgement.
    ///
    /// Transitions to `Closed` on ACK.
    LastAck,
    /// Lingering 2×MSL to absorb stray retransmissions of the peer's FIN.
    ///
    /// Transitions to `Closed` when the linger expires.
    TimeWait,
}

impl ConnectionState {
    /// `true` in states where the application may still submit data.
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Established | Self::CloseWait)
    }

    /// `true` once the handshake has completed (data may arrive).
    pub fn is_synchronized(&self) -> bool {
        !matches!(self, Self::Closed | Self::Listen | Self::SynSent | Self::SynReceived)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
