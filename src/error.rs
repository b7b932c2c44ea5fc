//! Errors surfaced by the message-oriented protocols (rdt, GBN, SR).
//!
//! Corruption and loss are handled silently inside the state machines; only
//! conditions the application must act on cross the API boundary.

use thiserror::Error;

use crate::socket::ChannelError;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The underlying datagram channel failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),
    /// An operation deadline elapsed.
    #[error("operation timed out")]
    Timeout,
    /// The retransmission cap was reached without an acknowledgement.
    #[error("gave up after {0} retransmissions")]
    RetriesExhausted(u32),
    /// The endpoint was closed locally.
    #[error("endpoint closed")]
    Closed,
    /// Invalid construction parameters (window vs. sequence-space size).
    #[error("invalid configuration: {0}")]
    Config(String),
}
