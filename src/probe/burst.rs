use std::time::{Duration, Instant};

use crate::probe::rate_estimator::{estimate_rate_mbps, span_rate_mbps};

/// The outcome of sending or receiving a single burst: one timestamp per packet that was
///  successfully sent (Sender) or accepted (Receiver), plus counters for diagnostics.
#[derive(Debug, Clone)]
pub struct BurstReport {
    pub level: u16,
    pub timestamps: Vec<Instant>,
    /// when the burst started: the first send on the Sender, the start of waiting on the Receiver
    pub started: Instant,
    /// the last send or arrival
    pub finished: Instant,
    pub num_bytes: usize,
    /// failed sends / receives
    pub num_errors: usize,
    /// Receiver only: datagrams that were discarded as foreign or belonging to an earlier burst
    pub num_discarded: usize,
    /// Receiver only: datagrams with a lower sequence number than their predecessor
    pub num_reordered: usize,
    /// Receiver only: the burst ended with a read timeout rather than a full count
    pub timed_out: bool,
}

impl BurstReport {
    pub fn new(level: u16, started: Instant) -> BurstReport {
        BurstReport {
            level,
            timestamps: Vec::new(),
            started,
            finished: started,
            num_bytes: 0,
            num_errors: 0,
            num_discarded: 0,
            num_reordered: 0,
            timed_out: false,
        }
    }

    pub fn num_packets(&self) -> usize {
        self.timestamps.len()
    }

    pub fn record(&mut self, at: Instant, num_bytes: usize) {
        self.timestamps.push(at);
        self.num_bytes += num_bytes;
        self.finished = at;
    }

    pub fn span(&self) -> Duration {
        self.finished.saturating_duration_since(self.started)
    }

    /// achieved rate based on the mean inter-packet interval, 0.0 if it can not be measured
    pub fn achieved_rate_mbps(&self, packet_bits: f64) -> f64 {
        estimate_rate_mbps(&self.timestamps, packet_bits)
    }

    /// naive total-bytes-over-span rate for diagnostics
    pub fn span_rate_mbps(&self) -> f64 {
        span_rate_mbps(self.num_bytes, self.span())
    }
}
