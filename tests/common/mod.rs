//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use rdt_over_udp::socket::{Channel, ChannelError, Socket};

/// Bind a loopback socket on an OS-chosen port.
pub async fn loopback() -> Arc<Socket> {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Arc::new(Socket::bind(addr).await.expect("bind loopback socket"))
}

/// Test channel that swallows the first `n` outbound frames and forwards
/// everything after them.
///
/// Deterministic counterpart to probabilistic loss: "the first SYN is lost"
/// or "the whole first window of ACKs is lost" become exact statements.
pub struct DropFirst {
    inner: Arc<dyn Channel>,
    remaining: AtomicUsize,
}

impl DropFirst {
    pub fn new(inner: Arc<dyn Channel>, n: usize) -> Self {
        Self {
            inner,
            remaining: AtomicUsize::new(n),
        }
    }
}

#[async_trait]
impl Channel for DropFirst {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    async fn send(&self, frame: &[u8], dest: SocketAddr) -> Result<(), ChannelError> {
        let dropped = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if dropped {
            return Ok(());
        }
        self.inner.send(frame, dest).await
    }

    async fn recv(
        &self,
        timeout: Option<Duration>,
    ) -> Result<(Vec<u8>, SocketAddr), ChannelError> {
        self.inner.recv(timeout).await
    }
}
