//! Entry point for `rdt-over-udp`.
//!
//! Parses CLI arguments and dispatches into **sender** or **receiver** mode
//! for the chosen protocol.  All actual protocol work is delegated to
//! library modules; `main.rs` owns only process setup (logging, argument
//! parsing) and the demo driver loops.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use rdt_over_udp::connection::{TcpConfig, TcpConnection};
use rdt_over_udp::gbn_endpoint::{GbnConfig, GbnRecvEndpoint, GbnSendEndpoint};
use rdt_over_udp::rdt20::{Rdt20Receiver, Rdt20Sender};
use rdt_over_udp::rdt21::{Rdt21Receiver, Rdt21Sender};
use rdt_over_udp::rdt30::{Rdt30Sender, DEFAULT_RTO};
use rdt_over_udp::simulator::{LossyChannel, SimulatorConfig};
use rdt_over_udp::socket::{Channel, Socket};
use rdt_over_udp::sr_endpoint::{SrConfig, SrRecvEndpoint, SrSendEndpoint};

/// Reliable data transfer protocols over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Proto {
    Rdt20,
    Rdt21,
    Rdt30,
    Gbn,
    Sr,
    Tcp,
}

#[derive(Subcommand)]
enum Mode {
    /// Transmit a series of numbered test messages.
    Sender {
        /// Protocol to run.
        #[arg(short, long, value_enum, default_value_t = Proto::Rdt30)]
        proto: Proto,
        /// Local address to bind (e.g. 127.0.0.1:0).
        #[arg(short, long, default_value = "127.0.0.1:0")]
        bind: SocketAddr,
        /// Destination address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        dest: SocketAddr,
        /// How many messages to send.
        #[arg(short, long, default_value_t = 10)]
        count: u32,
        /// Window size for GBN/SR.
        #[arg(short, long, default_value_t = 4)]
        window: u32,
        /// Retransmission timeout in milliseconds.
        #[arg(short, long, default_value_t = 500)]
        timeout_ms: u64,
        #[command(flatten)]
        faults: FaultArgs,
    },
    /// Receive messages and print them.
    Receiver {
        /// Protocol to run.
        #[arg(short, long, value_enum, default_value_t = Proto::Rdt30)]
        proto: Proto,
        /// Local address to bind (e.g. 127.0.0.1:9000).
        #[arg(short, long, default_value = "127.0.0.1:9000")]
        bind: SocketAddr,
        /// Stop after this many messages (0 = run forever).
        #[arg(short, long, default_value_t = 0)]
        count: u32,
        /// Window size for GBN/SR.
        #[arg(short, long, default_value_t = 4)]
        window: u32,
        #[command(flatten)]
        faults: FaultArgs,
    },
}

/// Fault-injection knobs applied to this endpoint's outbound frames.
#[derive(clap::Args)]
struct FaultArgs {
    /// Packet loss probability in [0, 1].
    #[arg(long, default_value_t = 0.0)]
    loss: f64,
    /// Bit-corruption probability in [0, 1].
    #[arg(long, default_value_t = 0.0)]
    corrupt: f64,
    /// Duplication probability in [0, 1].
    #[arg(long, default_value_t = 0.0)]
    duplicate: f64,
    /// Reorder probability in [0, 1].
    #[arg(long, default_value_t = 0.0)]
    reorder: f64,
    /// Minimum extra delay in milliseconds.
    #[arg(long, default_value_t = 0)]
    delay_min: u64,
    /// Maximum extra delay in milliseconds.
    #[arg(long, default_value_t = 0)]
    delay_max: u64,
    /// RNG seed for reproducible fault sequences.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl FaultArgs {
    fn is_clean(&self) -> bool {
        self.loss == 0.0
            && self.corrupt == 0.0
            && self.duplicate == 0.0
            && self.reorder == 0.0
            && self.delay_max == 0
    }

    fn to_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            p_loss: self.loss,
            p_corrupt: self.corrupt,
            p_duplicate: self.duplicate,
            p_reorder: self.reorder,
            delay_min: Duration::from_millis(self.delay_min),
            delay_max: Duration::from_millis(self.delay_max),
            seed: self.seed,
        }
    }
}

/// Bind a socket and optionally wrap it in the fault simulator.
async fn open_channel(bind: SocketAddr, faults: &FaultArgs) -> Arc<dyn Channel> {
    let socket = Socket::bind(bind).await.expect("bind UDP socket");
    log::info!("bound to {}", socket.local_addr());
    if faults.is_clean() {
        Arc::new(socket)
    } else {
        Arc::new(LossyChannel::new(Arc::new(socket), faults.to_config()))
    }
}

#[tokio::main]
async fn main() {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();
    let cli = Cli::parse();

    match cli.mode {
        Mode::Sender {
            proto,
            bind,
            dest,
            count,
            window,
            timeout_ms,
            faults,
        } => {
            let channel = open_channel(bind, &faults).await;
            let rto = Duration::from_millis(timeout_ms);
            run_sender(proto, channel, dest, count, window, rto).await;
        }
        Mode::Receiver {
            proto,
            bind,
            count,
            window,
            faults,
        } => {
            let channel = open_channel(bind, &faults).await;
            run_receiver(proto, channel, count, window).await;
        }
    }
}

async fn run_sender(
    proto: Proto,
    channel: Arc<dyn Channel>,
    dest: SocketAddr,
    count: u32,
    window: u32,
    rto: Duration,
) {
    let payloads: Vec<Vec<u8>> = (0..count).map(|i| format!("m{i}").into_bytes()).collect();

    match proto {
        Proto::Rdt20 => {
            let mut tx = Rdt20Sender::new(channel, dest, rto);
            for p in &payloads {
                tx.send(p).await.expect("send");
            }
            println!("sent {count} messages, {} retransmissions", tx.retransmissions);
        }
        Proto::Rdt21 => {
            let mut tx = Rdt21Sender::new(channel, dest);
            for p in &payloads {
                tx.send(p).await.expect("send");
            }
            println!("sent {count} messages, {} retransmissions", tx.retransmissions);
        }
        Proto::Rdt30 => {
            let rto = if rto.is_zero() { DEFAULT_RTO } else { rto };
            let mut tx = Rdt30Sender::new(channel, dest, rto);
            for p in &payloads {
                tx.send(p).await.expect("send");
            }
            println!("sent {count} messages, {} retransmissions", tx.retransmissions);
        }
        Proto::Gbn => {
            let config = GbnConfig {
                window,
                rto,
                ..GbnConfig::default()
            };
            let mut tx = GbnSendEndpoint::new(channel, dest, config).expect("config");
            for p in &payloads {
                tx.send(p).await.expect("send");
            }
            tx.flush().await.expect("flush");
            println!("sent {count} messages, {} retransmissions", tx.retransmissions);
        }
        Proto::Sr => {
            let config = SrConfig {
                window,
                rto,
                ..SrConfig::default()
            };
            let mut tx = SrSendEndpoint::new(channel, dest, config).expect("config");
            for p in &payloads {
                tx.send(p).await.expect("send");
            }
            tx.flush().await.expect("flush");
            println!("sent {count} messages, {} retransmissions", tx.retransmissions);
        }
        Proto::Tcp => {
            let mut conn = TcpConnection::connect(channel, dest, TcpConfig::default())
                .await
                .expect("connect");
            let mut total = 0usize;
            for p in &payloads {
                total += conn.send(p).await.expect("send");
            }
            conn.close().await.expect("close");
            println!(
                "sent {total} bytes, {} retransmissions ({} fast)",
                conn.stats.retransmissions, conn.stats.fast_retransmits
            );
        }
    }
}

async fn run_receiver(proto: Proto, channel: Arc<dyn Channel>, count: u32, window: u32) {
    let mut delivered = 0u32;
    let unlimited = count == 0;

    macro_rules! deliver {
        ($bytes:expr) => {{
            println!("{}", String::from_utf8_lossy(&$bytes));
            delivered += 1;
            if !unlimited && delivered >= count {
                return;
            }
        }};
    }

    match proto {
        Proto::Rdt20 => {
            let mut rx = Rdt20Receiver::new(channel);
            loop {
                let bytes = rx.recv().await.expect("recv");
                deliver!(bytes);
            }
        }
        Proto::Rdt21 | Proto::Rdt30 => {
            let mut rx = Rdt21Receiver::new(channel);
            loop {
                let bytes = rx.recv().await.expect("recv");
                deliver!(bytes);
            }
        }
        Proto::Gbn => {
            let config = GbnConfig {
                window,
                ..GbnConfig::default()
            };
            let mut rx = GbnRecvEndpoint::new(channel, config);
            loop {
                let bytes = rx.recv().await.expect("recv");
                deliver!(bytes);
            }
        }
        Proto::Sr => {
            let config = SrConfig {
                window,
                ..SrConfig::default()
            };
            let mut rx = SrRecvEndpoint::new(channel, config).expect("config");
            loop {
                let bytes = rx.recv().await.expect("recv");
                deliver!(bytes);
            }
        }
        Proto::Tcp => {
            let mut conn = TcpConnection::accept(channel, TcpConfig::default())
                .await
                .expect("accept");
            let mut total = 0usize;
            loop {
                let bytes = conn.recv(4096).await.expect("recv");
                if bytes.is_empty() {
                    break; // peer closed
                }
                total += bytes.len();
                println!("{}", String::from_utf8_lossy(&bytes));
            }
            conn.close().await.expect("close");
            println!("received {total} bytes");
        }
    }
}
