//! Fault-injecting channel for deterministic testing.
//!
//! Real networks drop, corrupt, duplicate, and reorder packets.  To exercise
//! the reliability mechanisms without depending on actual network conditions,
//! [`LossyChannel`] wraps any [`Channel`] and applies a configurable fault
//! model on the send path:
//!
//! | Fault       | Behaviour                                                |
//! |-------------|----------------------------------------------------------|
//! | Loss        | Drop the frame with probability `p_loss`.                |
//! | Corruption  | Flip at least one bit with probability `p_corrupt`.      |
//! | Duplication | Deliver the frame twice with probability `p_duplicate`.  |
//! | Reordering  | Hold the frame back until a later frame passes it.       |
//! | Delay       | Defer delivery by a uniform draw from `[min, max]` ms.   |
//!
//! All randomness comes from one seeded [`StdRng`], so a failing test run is
//! reproducible from its seed.  Because [`LossyChannel`] implements
//! [`Channel`], protocol code is unaware it is being tested; wrapping each
//! endpoint's socket gives independent fault processes per direction.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::socket::{Channel, ChannelError};

/// Configuration for the fault-injection model.
///
/// All probabilities are in `[0.0, 1.0]`; delays are in milliseconds.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that any given frame is silently dropped.
    pub p_loss: f64,
    /// Probability that a frame has at least one bit flipped.
    pub p_corrupt: f64,
    /// Probability that a frame is delivered twice.
    pub p_duplicate: f64,
    /// Probability that a frame is held back until a later frame overtakes it.
    pub p_reorder: f64,
    /// Minimum extra delivery delay.
    pub delay_min: Duration,
    /// Maximum extra delivery delay.
    pub delay_max: Duration,
    /// RNG seed; identical seeds reproduce identical fault sequences.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default — the simulator is a transparent pass-through.
        Self {
            p_loss: 0.0,
            p_corrupt: 0.0,
            p_duplicate: 0.0,
            p_reorder: 0.0,
            delay_min: Duration::ZERO,
            delay_max: Duration::ZERO,
            seed: 0,
        }
    }
}

impl SimulatorConfig {
    /// A loss-only configuration, the most common test setup.
    pub fn loss(p_loss: f64, seed: u64) -> Self {
        Self {
            p_loss,
            seed,
            ..Self::default()
        }
    }

    fn validate(&self) {
        for (name, p) in [
            ("p_loss", self.p_loss),
            ("p_corrupt", self.p_corrupt),
            ("p_duplicate", self.p_duplicate),
            ("p_reorder", self.p_reorder),
        ] {
            assert!((0.0..=1.0).contains(&p), "{name} must be within [0, 1]");
        }
        assert!(self.delay_min <= self.delay_max, "delay_min > delay_max");
    }
}

/// Per-frame fault decisions, drawn under the RNG lock in one go.
struct Faults {
    drop: bool,
    corrupt_bit: Option<usize>,
    duplicate: bool,
    reorder: bool,
    delay: Duration,
}

/// A fault-injecting wrapper around any [`Channel`].
pub struct LossyChannel {
    inner: Arc<dyn Channel>,
    config: SimulatorConfig,
    rng: Mutex<StdRng>,
    /// Frame held back for reordering, released behind the next send.
    held: Mutex<Option<(Vec<u8>, SocketAddr)>>,
}

impl LossyChannel {
    /// Wrap `inner` with the given fault model.
    ///
    /// # Panics
    ///
    /// Panics if a probability lies outside `[0, 1]` or `delay_min`
    /// exceeds `delay_max`.
    pub fn new(inner: Arc<dyn Channel>, config: SimulatorConfig) -> Self {
        config.validate();
        let rng = Mutex::new(StdRng::seed_from_u64(config.seed));
        Self {
            inner,
            config,
            rng,
            held: Mutex::new(None),
        }
    }

    /// Draw every random decision for one frame while holding the RNG lock.
    fn draw_faults(&self, frame_len: usize) -> Faults {
        let mut rng = self.rng.lock().expect("rng lock");
        let cfg = &self.config;
        let drop = rng.random::<f64>() < cfg.p_loss;
        let corrupt_bit = if rng.random::<f64>() < cfg.p_corrupt && frame_len > 0 {
            Some(rng.random_range(0..frame_len * 8))
        } else {
            None
        };
        let duplicate = rng.random::<f64>() < cfg.p_duplicate;
        let reorder = rng.random::<f64>() < cfg.p_reorder;
        let delay = if cfg.delay_max > Duration::ZERO {
            let ms = rng.random_range(cfg.delay_min.as_millis()..=cfg.delay_max.as_millis());
            Duration::from_millis(ms as u64)
        } else {
            Duration::ZERO
        };
        Faults {
            drop,
            corrupt_bit,
            duplicate,
            reorder,
            delay,
        }
    }

    /// Hand a frame to the inner channel, either inline or on a delayed task.
    async fn deliver(&self, frame: Vec<u8>, dest: SocketAddr, delay: Duration) {
        if delay.is_zero() {
            if let Err(e) = self.inner.send(&frame, dest).await {
                log::warn!("[sim] delivery failed: {e}");
            }
        } else {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = inner.send(&frame, dest).await {
                    log::warn!("[sim] delayed delivery failed: {e}");
                }
            });
        }
    }
}

#[async_trait]
impl Channel for LossyChannel {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    async fn send(&self, frame: &[u8], dest: SocketAddr) -> Result<(), ChannelError> {
        let faults = self.draw_faults(frame.len());

        if faults.drop {
            log::debug!("[sim] dropped frame of {} bytes to {dest}", frame.len());
            // A later frame counts as "passing" a held one, even if lost.
            let released = self.held.lock().expect("held lock").take();
            if let Some((old, old_dest)) = released {
                self.deliver(old, old_dest, faults.delay).await;
            }
            return Ok(());
        }

        let mut out = frame.to_vec();
        if let Some(bit) = faults.corrupt_bit {
            out[bit / 8] ^= 1 << (bit % 8);
            log::debug!("[sim] corrupted bit {bit} of frame to {dest}");
        }

        if faults.reorder {
            let previous = self
                .held
                .lock()
                .expect("held lock")
                .replace((out, dest));
            log::debug!("[sim] holding frame back for reordering");
            // At most one frame is held; an older captive is released now.
            if let Some((old, old_dest)) = previous {
                self.deliver(old, old_dest, faults.delay).await;
            }
            return Ok(());
        }

        self.deliver(out.clone(), dest, faults.delay).await;
        if faults.duplicate {
            log::debug!("[sim] duplicating frame to {dest}");
            self.deliver(out, dest, faults.delay).await;
        }

        // This frame has overtaken whatever was being held back.
        let released = self.held.lock().expect("held lock").take();
        if let Some((old, old_dest)) = released {
            self.deliver(old, old_dest, faults.delay).await;
        }
        Ok(())
    }

    async fn recv(
        &self,
        timeout: Option<Duration>,
    ) -> Result<(Vec<u8>, SocketAddr), ChannelError> {
        self.inner.recv(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use crate::socket::Socket;

    async fn wrapped(config: SimulatorConfig) -> (LossyChannel, Socket) {
        let tx = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let rx = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        (LossyChannel::new(Arc::new(tx), config), rx)
    }

    #[tokio::test]
    async fn pass_through_preserves_frames() {
        let (tx, rx) = wrapped(SimulatorConfig::default()).await;
        let pkt = Packet::data(3, b"payload".to_vec());
        tx.send_packet(&pkt, rx.local_addr()).await.unwrap();

        let (frame, _) = rx.recv(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(Packet::decode(&frame).unwrap(), pkt);
    }

    #[tokio::test]
    async fn total_loss_drops_everything() {
        let (tx, rx) = wrapped(SimulatorConfig::loss(1.0, 7)).await;
        for i in 0..10u32 {
            let pkt = Packet::data(i, vec![0; 4]);
            tx.send_packet(&pkt, rx.local_addr()).await.unwrap();
        }
        let err = rx.recv(Some(Duration::from_millis(50))).await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));
    }

    #[tokio::test]
    async fn corruption_is_always_detectable() {
        let cfg = SimulatorConfig {
            p_corrupt: 1.0,
            seed: 99,
            ..SimulatorConfig::default()
        };
        let (tx, rx) = wrapped(cfg).await;
        for i in 0..20u32 {
            let pkt = Packet::data(i, b"abcdef".to_vec());
            tx.send_packet(&pkt, rx.local_addr()).await.unwrap();
            let (frame, _) = rx.recv(Some(Duration::from_secs(1))).await.unwrap();
            assert!(
                Packet::decode(&frame).is_err(),
                "single flipped bit must fail the checksum"
            );
        }
    }

    #[tokio::test]
    async fn duplication_delivers_twice() {
        let cfg = SimulatorConfig {
            p_duplicate: 1.0,
            seed: 1,
            ..SimulatorConfig::default()
        };
        let (tx, rx) = wrapped(cfg).await;
        let pkt = Packet::data(0, b"x".to_vec());
        tx.send_packet(&pkt, rx.local_addr()).await.unwrap();

        for _ in 0..2 {
            let (frame, _) = rx.recv(Some(Duration::from_secs(1))).await.unwrap();
            assert_eq!(Packet::decode(&frame).unwrap(), pkt);
        }
    }

    #[tokio::test]
    async fn reordering_holds_frames_back() {
        let cfg = SimulatorConfig {
            p_reorder: 1.0,
            seed: 5,
            ..SimulatorConfig::default()
        };
        let (tx, rx) = wrapped(cfg).await;
        // Every frame is held until its successor arrives, so after sending
        // 0, 1, 2 only 0 and 1 have been released and 2 is still captive.
        for i in 0..3u32 {
            tx.send_packet(&Packet::data(i, vec![]), rx.local_addr())
                .await
                .unwrap();
        }
        let (first, _) = rx.recv(Some(Duration::from_secs(1))).await.unwrap();
        let (second, _) = rx.recv(Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(Packet::decode(&first).unwrap().seq, 0);
        assert_eq!(Packet::decode(&second).unwrap().seq, 1);
        // Frame 2 is still captive; nothing else arrives.
        let err = rx.recv(Some(Duration::from_millis(50))).await.unwrap_err();
        assert!(matches!(err, ChannelError::Timeout));
    }

    #[test]
    #[should_panic]
    fn out_of_range_probability_rejected() {
        SimulatorConfig {
            p_loss: 1.5,
            ..SimulatorConfig::default()
        }
        .validate();
    }

    #[test]
    fn same_seed_same_decisions() {
        let cfg = SimulatorConfig::loss(0.5, 42);
        let mut a = StdRng::seed_from_u64(cfg.seed);
        let mut b = StdRng::seed_from_u64(cfg.seed);
        for _ in 0..100 {
            assert_eq!(a.random::<f64>() < 0.5, b.random::<f64>() < 0.5);
        }
    }
}
