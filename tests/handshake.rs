//! Integration tests for the three-way handshake.
//!
//! Each test spins up a real UDP socket pair on loopback, runs the passive
//! side in a background task, and verifies that both sides reach
//! `ConnectionState::Established` with agreeing sequence numbers.

mod common;

use std::sync::Arc;
use std::time::Duration;

use rdt_over_udp::connection::{ConnError, TcpConfig, TcpConnection};
use rdt_over_udp::socket::Channel;
use rdt_over_udp::state::ConnectionState;
use rdt_over_udp::timer::TimerConfig;

/// Handshake-friendly config: fast retries so failure tests stay quick.
fn fast_config() -> TcpConfig {
    TcpConfig {
        timer: TimerConfig {
            initial_rto: Duration::from_millis(100),
            min_rto: Duration::from_millis(50),
            max_rto: Duration::from_secs(2),
        },
        max_retries: 3,
        msl: Duration::from_millis(50),
        ..TcpConfig::default()
    }
}

#[tokio::test]
async fn handshake_both_sides_reach_established() {
    let server_sock = common::loopback().await;
    let server_addr = server_sock.local_addr();

    let server = tokio::spawn(async move {
        TcpConnection::accept(server_sock, fast_config()).await
    });

    let client_sock = common::loopback().await;
    let client = tokio::time::timeout(
        Duration::from_secs(5),
        TcpConnection::connect(client_sock, server_addr, fast_config()),
    )
    .await
    .expect("client connect timed out")
    .expect("client connect failed");

    let server = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server accept timed out")
        .expect("server task panicked")
        .expect("server accept failed");

    assert_eq!(client.state, ConnectionState::Established);
    assert_eq!(server.state, ConnectionState::Established);
}

/// After the handshake the server's `RCV.NXT` must equal the client's
/// `SND.NXT` (both are the client's ISN + 1 — the SYN consumed one
/// sequence number), and symmetrically in the other direction.
#[tokio::test]
async fn handshake_sequence_numbers_agree() {
    let server_sock = common::loopback().await;
    let server_addr = server_sock.local_addr();

    let server = tokio::spawn(async move {
        TcpConnection::accept(server_sock, fast_config()).await
    });

    let client_sock = common::loopback().await;
    let client = TcpConnection::connect(client_sock, server_addr, fast_config())
        .await
        .expect("connect");
    let server = server.await.expect("server task").expect("accept");

    assert_eq!(
        server.rcv_nxt(),
        client.snd_nxt(),
        "server RCV.NXT should equal client SND.NXT after the handshake"
    );
    assert_eq!(
        client.rcv_nxt(),
        server.snd_nxt(),
        "client RCV.NXT should equal server SND.NXT after the handshake"
    );
}

/// Losing the first SYN must not kill the attempt: the client retransmits
/// and both sides still establish (within the retry budget).
#[tokio::test]
async fn handshake_survives_lost_first_syn() {
    let server_sock = common::loopback().await;
    let server_addr = server_sock.local_addr();

    let server = tokio::spawn(async move {
        TcpConnection::accept(server_sock, fast_config()).await
    });

    let client_sock = common::loopback().await;
    let client_channel: Arc<dyn Channel> = Arc::new(common::DropFirst::new(client_sock, 1));

    let client = tokio::time::timeout(
        Duration::from_secs(5),
        TcpConnection::connect(client_channel, server_addr, fast_config()),
    )
    .await
    .expect("client connect timed out")
    .expect("client connect failed");

    let server = server.await.expect("server task").expect("accept");

    assert_eq!(client.state, ConnectionState::Established);
    assert_eq!(server.state, ConnectionState::Established);
    assert!(
        (1..=3).contains(&client.stats.syn_retransmissions),
        "expected 1-3 SYN retransmissions, saw {}",
        client.stats.syn_retransmissions
    );
}

/// Connecting to an address where nobody listens must fail with
/// `HandshakeFailed` rather than hang forever.
#[tokio::test]
async fn connect_to_silent_peer_fails_after_retries() {
    // Bind a socket and drop it so the port is dead.
    let silent_addr = common::loopback().await.local_addr();

    let client_sock = common::loopback().await;
    let result = TcpConnection::connect(client_sock, silent_addr, fast_config()).await;

    match result {
        Err(ConnError::HandshakeFailed) => {}
        Err(e) => panic!("expected HandshakeFailed, got error: {e}"),
        Ok(_) => panic!("expected HandshakeFailed, got a connection"),
    }
}
