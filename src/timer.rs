//! Retransmission timing: the RTO estimator and the keyed timer queue.
//!
//! Reliable delivery requires that unacknowledged packets are re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`RetransmitTimer`] — adaptive retransmission timeout per Jacobson's
//!   algorithm (RFC 6298): `RTO = SRTT + 4 × RTTVAR`, doubling on each
//!   consecutive timeout up to a configurable maximum.
//! - [`TimerQueue`] — single-shot timers keyed by an opaque identifier,
//!   backed by a min-heap of `(deadline, generation, key)` entries.  A
//!   generation counter per key lets `cancel` and `restart` invalidate
//!   in-flight heap entries without touching the heap, so a timer that
//!   expired after being cancelled is suppressed.
//!
//! Event loops feed [`TimerQueue::next_deadline`] into `sleep_until` and
//! drain [`TimerQueue::pop_expired`] when it fires; expiry handling thus runs
//! in the same serialized context as packet and application events.  A
//! thread-per-timer design was rejected: ordering with packet events becomes
//! fragile.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;

/// Adjustable retransmission-timeout parameters.
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Initial RTO before any RTT sample is available.
    pub initial_rto: Duration,
    /// Lower clamp applied to the computed RTO.
    pub min_rto: Duration,
    /// Maximum RTO after repeated back-off.
    pub max_rto: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            initial_rto: Duration::from_millis(1000),
            min_rto: Duration::from_millis(200),
            max_rto: Duration::from_secs(60),
        }
    }
}

/// Adaptive retransmission timeout for one connection.
#[derive(Debug)]
pub struct RetransmitTimer {
    pub config: TimerConfig,
    /// Current RTO, updated after each RTT sample or back-off.
    current_rto: Duration,
    /// Smoothed RTT estimate (SRTT).
    srtt: Option<Duration>,
    /// RTT variance estimate (RTTVAR).
    rttvar: Option<Duration>,
}

impl Default for RetransmitTimer {
    fn default() -> Self {
        Self::new(TimerConfig::default())
    }
}

impl RetransmitTimer {
    pub fn new(config: TimerConfig) -> Self {
        let rto = config.initial_rto;
        Self {
            config,
            current_rto: rto,
            srtt: None,
            rttvar: None,
        }
    }

    /// The timeout to arm for the next retransmission timer.
    pub fn rto(&self) -> Duration {
        self.current_rto
    }

    /// Record a new RTT sample and update SRTT / RTTVAR / RTO (RFC 6298 §2).
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2.
    /// Subsequent samples:   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                       SRTT   = 7/8·SRTT   + 1/8·R
    pub fn record_rtt_sample(&mut self, sample: Duration) {
        match (self.srtt, self.rttvar) {
            (None, _) => {
                // First measurement.
                self.srtt = Some(sample);
                self.rttvar = Some(sample / 2);
            }
            (Some(srtt), Some(rttvar)) => {
                let diff = sample.abs_diff(srtt);
                self.rttvar = Some(rttvar * 3 / 4 + diff / 4);
                self.srtt = Some(srtt * 7 / 8 + sample / 8);
            }
            _ => unreachable!(),
        }
        self.reset();
    }

    /// Double the RTO on retransmit timeout (exponential back-off, RFC 6298 §5.5).
    ///
    /// Capped at `config.max_rto` to prevent indefinite growth.
    pub fn back_off(&mut self) {
        self.current_rto = (self.current_rto * 2).min(self.config.max_rto);
    }

    /// Restore `current_rto` from the current SRTT / RTTVAR estimates,
    /// clamped to `[min_rto, max_rto]`.
    ///
    /// Falls back to `initial_rto` before the first RTT sample is available.
    pub fn reset(&mut self) {
        self.current_rto = match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => (srtt + rttvar * 4)
                .max(self.config.min_rto)
                .min(self.config.max_rto),
            _ => self.config.initial_rto,
        };
    }
}

#[derive(Debug)]
struct TimerEntry<K> {
    deadline: Instant,
    generation: u64,
    key: K,
}

// Heap order: earliest deadline first (via `Reverse`); generation breaks
// ties deterministically.
impl<K> PartialEq for TimerEntry<K> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}
impl<K> Eq for TimerEntry<K> {}
impl<K> PartialOrd for TimerEntry<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<K> Ord for TimerEntry<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.generation.cmp(&other.generation))
    }
}

/// Single-shot timers keyed by an opaque identifier.
///
/// `start` / `restart` replace any pending timer for the key; `cancel`
/// forgets it.  Stale heap entries left behind by either are discarded
/// lazily when the head of the heap is examined.
#[derive(Debug)]
pub struct TimerQueue<K> {
    heap: BinaryHeap<Reverse<TimerEntry<K>>>,
    live: HashMap<K, u64>,
    next_generation: u64,
}

impl<K: Eq + Hash + Clone> Default for TimerQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> TimerQueue<K> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            live: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Arm (or re-arm) the timer for `key` to fire after `delay`.
    pub fn start(&mut self, key: K, delay: Duration) {
        self.next_generation += 1;
        self.live.insert(key.clone(), self.next_generation);
        self.heap.push(Reverse(TimerEntry {
            deadline: Instant::now() + delay,
            generation: self.next_generation,
            key,
        }));
    }

    /// Alias of [`start`](Self::start); reads better at call sites that
    /// re-arm an existing timer.
    pub fn restart(&mut self, key: K, delay: Duration) {
        self.start(key, delay);
    }

    /// Disarm the timer for `key`.  A later expiry of a stale entry is
    /// suppressed.
    pub fn cancel(&mut self, key: &K) {
        self.live.remove(key);
    }

    /// `true` when a timer is armed for `key`.
    pub fn is_armed(&self, key: &K) -> bool {
        self.live.contains_key(key)
    }

    /// `true` when no timer is armed.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Deadline of the earliest live timer, pruning stale entries.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse(head)) = self.heap.peek() {
            if self.live.get(&head.key) == Some(&head.generation) {
                return Some(head.deadline);
            }
            self.heap.pop();
        }
        None
    }

    /// Pop the key of one timer whose deadline is at or before `now`.
    ///
    /// Returns `None` when nothing live has expired.  Call in a loop to
    /// drain every due timer.
    pub fn pop_expired(&mut self, now: Instant) -> Option<K> {
        while let Some(Reverse(head)) = self.heap.peek() {
            let stale = self.live.get(&head.key) != Some(&head.generation);
            if stale {
                self.heap.pop();
                continue;
            }
            if head.deadline > now {
                return None;
            }
            let entry = self.heap.pop().expect("peek then pop").0;
            self.live.remove(&entry.key);
            return Some(entry.key);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_initialises_estimates() {
        let mut t = RetransmitTimer::default();
        assert_eq!(t.rto(), Duration::from_millis(1000));

        t.record_rtt_sample(Duration::from_millis(400));
        // SRTT = 400ms, RTTVAR = 200ms, RTO = 400 + 4*200 = 1200ms.
        assert_eq!(t.rto(), Duration::from_millis(1200));
    }

    #[test]
    fn rto_clamped_to_floor() {
        let mut t = RetransmitTimer::default();
        t.record_rtt_sample(Duration::from_millis(10));
        t.record_rtt_sample(Duration::from_millis(10));
        t.record_rtt_sample(Duration::from_millis(10));
        assert!(t.rto() >= t.config.min_rto);
    }

    #[test]
    fn back_off_doubles_until_cap() {
        let mut t = RetransmitTimer::default();
        t.back_off();
        assert_eq!(t.rto(), Duration::from_millis(2000));
        for _ in 0..10 {
            t.back_off();
        }
        assert_eq!(t.rto(), t.config.max_rto);
    }

    #[test]
    fn sample_after_back_off_restores_estimate() {
        let mut t = RetransmitTimer::default();
        t.record_rtt_sample(Duration::from_millis(400));
        t.back_off();
        t.back_off();
        let inflated = t.rto();
        t.record_rtt_sample(Duration::from_millis(400));
        assert!(t.rto() < inflated);
    }

    #[test]
    fn queue_pops_in_deadline_order() {
        let mut q: TimerQueue<u32> = TimerQueue::new();
        q.start(2, Duration::from_millis(30));
        q.start(1, Duration::from_millis(10));
        q.start(3, Duration::from_millis(20));

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(q.pop_expired(later), Some(1));
        assert_eq!(q.pop_expired(later), Some(3));
        assert_eq!(q.pop_expired(later), Some(2));
        assert_eq!(q.pop_expired(later), None);
        assert!(q.is_empty());
    }

    #[test]
    fn unexpired_timer_stays_queued() {
        let mut q: TimerQueue<&str> = TimerQueue::new();
        q.start("rtx", Duration::from_secs(10));
        assert_eq!(q.pop_expired(Instant::now()), None);
        assert!(q.is_armed(&"rtx"));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut q: TimerQueue<u32> = TimerQueue::new();
        q.start(7, Duration::from_millis(1));
        q.cancel(&7);

        let later = Instant::now() + Duration::from_secs(1);
        assert_eq!(q.pop_expired(later), None);
        assert_eq!(q.next_deadline(), None);
    }

    #[test]
    fn restart_supersedes_previous_deadline() {
        let mut q: TimerQueue<u32> = TimerQueue::new();
        q.start(1, Duration::from_millis(5));
        q.restart(1, Duration::from_secs(60));

        // The original 5ms entry is stale; only the 60s one is live.
        let soon = Instant::now() + Duration::from_millis(100);
        assert_eq!(q.pop_expired(soon), None);
        assert!(q.is_armed(&1));

        let much_later = Instant::now() + Duration::from_secs(120);
        assert_eq!(q.pop_expired(much_later), Some(1));
    }

    #[test]
    fn next_deadline_skips_stale_entries() {
        let mut q: TimerQueue<u32> = TimerQueue::new();
        q.start(1, Duration::from_millis(1));
        q.start(2, Duration::from_secs(30));
        q.cancel(&1);

        let dl = q.next_deadline().expect("key 2 still armed");
        assert!(dl > Instant::now() + Duration::from_secs(10));
    }
}
