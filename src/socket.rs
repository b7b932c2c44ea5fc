//! Unreliable datagram channel abstraction.
//!
//! [`Channel`] is the substrate every protocol in this crate runs over: an
//! addressed, unordered, lossy datagram port with `send` / `recv` / implicit
//! close-on-drop.  [`Socket`] is the real implementation, a thin wrapper
//! around `tokio::net::UdpSocket`; the fault-injecting
//! [`LossyChannel`](crate::simulator::LossyChannel) implements the same trait
//! so protocol code cannot tell whether it is being tested.
//!
//! The trait works on raw frames rather than [`Packet`]s on purpose: a
//! corrupted frame must reach the protocol state machine (which decodes it
//! and reacts with NAK / duplicate ACK / silence), not be swallowed here.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::net::UdpSocket;

use crate::packet::Packet;

/// Maximum UDP payload size (theoretical limit; in practice kept much smaller).
const MAX_DATAGRAM: usize = 65_535;

/// Errors that can arise from channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Underlying I/O error from the OS.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// `recv` deadline elapsed with nothing to deliver.
    #[error("receive timed out")]
    Timeout,
    /// The channel has been closed locally.
    #[error("channel closed")]
    Closed,
}

/// An unreliable, addressed datagram port.
///
/// `recv` is level-blocking up to `timeout`: `None` blocks indefinitely,
/// `Some(Duration::ZERO)` polls, and an elapsed deadline yields
/// [`ChannelError::Timeout`].  Dropping the channel releases the port.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Address this channel is bound to.
    fn local_addr(&self) -> SocketAddr;

    /// Send one frame to `dest`.
    async fn send(&self, frame: &[u8], dest: SocketAddr) -> Result<(), ChannelError>;

    /// Receive the next frame and its sender address.
    async fn recv(&self, timeout: Option<Duration>)
        -> Result<(Vec<u8>, SocketAddr), ChannelError>;

    /// Encode `packet` and send it as a single frame to `dest`.
    async fn send_packet(&self, packet: &Packet, dest: SocketAddr) -> Result<(), ChannelError> {
        self.send(&packet.encode(), dest).await
    }
}

/// An async UDP socket speaking raw frames.
///
/// All methods are `&self` so the socket can be shared across tasks via
/// `Arc`.
#[derive(Debug)]
pub struct Socket {
    local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port; the resolved
    /// address is available through [`Channel::local_addr`].
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, ChannelError> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }
}

#[async_trait]
impl Channel for Socket {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn send(&self, frame: &[u8], dest: SocketAddr) -> Result<(), ChannelError> {
        self.inner.send_to(frame, dest).await?;
        Ok(())
    }

    async fn recv(
        &self,
        timeout: Option<Duration>,
    ) -> Result<(Vec<u8>, SocketAddr), ChannelError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = match timeout {
            None => self.inner.recv_from(&mut buf).await?,
            Some(limit) => tokio::time::timeout(limit, self.inner.recv_from(&mut buf))
                .await
                .map_err(|_| ChannelError::Timeout)??,
        };
        buf.truncate(n);
        Ok((buf, addr))
    }
}
