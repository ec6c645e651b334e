use std::time::{Duration, Instant};
use anyhow::{anyhow, bail};

use crate::util::safe_converter::PrecheckedCast;

/// How the packets of a burst are spaced
#[derive(Debug, Clone, Copy)]
pub enum Pacing {
    /// back-to-back, as fast as the socket accepts them - used for the calibration burst
    Unpaced,
    Paced(Pacer),
}

/// Schedules packet sends for a fixed target rate.
///
/// Sleep primitives have millisecond granularity, which is far too coarse for sub-millisecond
///  send intervals. The Pacer therefore sleeps only until `spin_threshold` before a
///  deadline and busy-waits for the rest, blocking the calling thread. Provided the timer
///  does not oversleep by more than the spin threshold, a deadline is met to within the
///  resolution of [Instant::now], i.e. a few microseconds.
///
/// Deadlines are absolute relative to the start of a burst, so lateness of one packet does not
///  shift the schedule of the following packets.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    interval: Duration,
    spin_threshold: Duration,
}

impl Pacer {
    pub fn for_rate(rate_bps: f64, packet_bits: f64, spin_threshold: Duration) -> anyhow::Result<Pacer> {
        Ok(Pacer {
            interval: send_interval(rate_bps, packet_bits)?,
            spin_threshold,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// the scheduled send time of the packet following packet number `packet_index`, or None
    ///  if that lies beyond the range of [Instant]
    pub fn deadline_after(&self, burst_start: Instant, packet_index: usize) -> Option<Instant> {
        let n: u32 = (packet_index + 1).prechecked_cast();
        burst_start.checked_add(self.interval.checked_mul(n)?)
    }

    pub async fn wait_until(&self, deadline: Instant) {
        wait_until(deadline, self.spin_threshold).await
    }
}

/// the time between two packet sends for a given target rate
pub fn send_interval(rate_bps: f64, packet_bits: f64) -> anyhow::Result<Duration> {
    if !rate_bps.is_finite() || rate_bps <= 0.0 {
        bail!("target rate must be a positive number, was {} bps", rate_bps);
    }
    Duration::try_from_secs_f64(packet_bits / rate_bps)
        .map_err(|e| anyhow!("no send interval for a target rate of {} bps: {}", rate_bps, e))
}

/// Blocks until `deadline`, sleeping on the runtime's timer for all but the last
///  `spin_threshold` and spinning for the rest.
pub async fn wait_until(deadline: Instant, spin_threshold: Duration) {
    if let Some(wake_up) = deadline.checked_sub(spin_threshold) {
        if wake_up > Instant::now() {
            tokio::time::sleep_until(wake_up.into()).await;
        }
    }

    while Instant::now() < deadline {
        std::hint::spin_loop();
    }
}
