use std::time::{Duration, Instant};

use crate::util::safe_converter::SafeCast;

/// Estimates the rate at which a burst's packets were sent or received, based on the mean
///  interval between consecutive timestamps. This is deliberately not total bytes over total
///  span: the mean of intervals reflects steady-state pacing and is robust against an outlier
///  in the first or last timestamp.
///
/// Returns the rate in bits per second, or 0.0 if the series holds no interval information
///  (fewer than two timestamps, or all timestamps identical).
pub fn estimate_rate_bps(timestamps: &[Instant], packet_bits: f64) -> f64 {
    match mean_interval_secs(timestamps) {
        Some(mean) if mean > 0.0 => packet_bits / mean,
        _ => 0.0,
    }
}

/// Same as [estimate_rate_bps], in Mbps
pub fn estimate_rate_mbps(timestamps: &[Instant], packet_bits: f64) -> f64 {
    bps_to_mbps(estimate_rate_bps(timestamps, packet_bits))
}

fn mean_interval_secs(timestamps: &[Instant]) -> Option<f64> {
    if timestamps.len() < 2 {
        return None;
    }

    let total: f64 = timestamps.windows(2)
        .map(|w| w[1].saturating_duration_since(w[0]).as_secs_f64())
        .sum();

    let num_intervals: f64 = (timestamps.len() - 1).safe_cast();
    Some(total / num_intervals)
}

/// total bits over the time between first and last event - the naive estimate, used for
///  diagnostic output only
pub fn span_rate_mbps(num_bytes: usize, span: Duration) -> f64 {
    if span.is_zero() {
        return 0.0;
    }
    let bits: f64 = (num_bytes * 8).safe_cast();
    bps_to_mbps(bits / span.as_secs_f64())
}

pub fn bps_to_mbps(bps: f64) -> f64 {
    bps / 1e6
}

pub fn mbps_to_bps(mbps: f64) -> f64 {
    mbps * 1e6
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    fn series(len: usize, interval: Duration) -> Vec<Instant> {
        let start = Instant::now();
        (0..len)
            .map(|i| start + interval * i as u32)
            .collect()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() <= expected * 1e-6, "expected {}, was {}", expected, actual);
    }

    #[rstest]
    #[case::two_packets(2, Duration::from_micros(15), 12000.0)]
    #[case::burst_1500(100, Duration::from_micros(300), 12000.0)]
    #[case::burst_small_packets(50, Duration::from_millis(1), 800.0)]
    #[case::slow(10, Duration::from_secs(1), 12000.0)]
    fn test_constant_interval(#[case] len: usize, #[case] interval: Duration, #[case] packet_bits: f64) {
        let timestamps = series(len, interval);
        assert_close(estimate_rate_bps(&timestamps, packet_bits), packet_bits / interval.as_secs_f64());
        assert_close(estimate_rate_mbps(&timestamps, packet_bits), packet_bits / interval.as_secs_f64() / 1e6);
    }

    #[rstest]
    #[case::empty(0)]
    #[case::single(1)]
    fn test_too_few_timestamps(#[case] len: usize) {
        let timestamps = series(len, Duration::from_millis(1));
        assert_eq!(estimate_rate_bps(&timestamps, 12000.0), 0.0);
        assert_eq!(mean_interval_secs(&timestamps), None);
    }

    #[test]
    fn test_identical_timestamps() {
        let timestamps = series(5, Duration::ZERO);
        assert_eq!(estimate_rate_bps(&timestamps, 12000.0), 0.0);
    }

    #[test]
    fn test_mean_of_intervals() {
        let start = Instant::now();
        let timestamps = vec![
            start,
            start + Duration::from_millis(1),
            start + Duration::from_millis(4),
            start + Duration::from_millis(5),
        ];
        // intervals 1ms, 3ms, 1ms -> mean 5/3 ms
        assert_close(estimate_rate_bps(&timestamps, 12000.0), 12000.0 / (5.0 / 3000.0));
    }

    #[test]
    fn test_idempotent() {
        let start = Instant::now();
        let timestamps = vec![
            start,
            start + Duration::from_micros(120),
            start + Duration::from_micros(250),
            start + Duration::from_micros(377),
        ];
        let first = estimate_rate_mbps(&timestamps, 12000.0);
        let second = estimate_rate_mbps(&timestamps, 12000.0);
        assert_eq!(first.to_bits(), second.to_bits());
    }

    #[rstest]
    #[case::one_second(150_000, Duration::from_secs(1), 1.2)]
    #[case::zero_span(1500, Duration::ZERO, 0.0)]
    fn test_span_rate(#[case] num_bytes: usize, #[case] span: Duration, #[case] expected: f64) {
        assert_close(span_rate_mbps(num_bytes, span), expected);
    }
}
