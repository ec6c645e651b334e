use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::bail;

use crate::probe::control_channel::is_transmittable_calibration;
use crate::probe::probe_header::ProbeHeader;

/// Largest UDP payload that fits into an IPv4 datagram
pub const MAX_UDP_PAYLOAD: usize = 65507;

/// Parameters of a probing session. Sender and Receiver must be configured with identical
///  values: there is no negotiation at runtime, apart from the calibration value itself.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// The Receiver's UDP address. The Receiver binds to it, the Sender sends probes to it.
    pub probe_addr: SocketAddr,
    /// The Receiver's TCP address for the control channel.
    pub control_addr: SocketAddr,

    /// UDP payload size of every probe packet in bytes, including the probe header
    pub packet_size: usize,
    /// number of packets per burst, both for the calibration burst and for every rate level
    pub num_packets: usize,
    /// number of rate levels in the sweep; level k is probed at `k * delta_r`, and the
    ///  calibration estimate is divided by this number to get `delta_r`
    pub num_levels: u16,

    /// The Receiver stops waiting for a burst's packets after this time has passed without a
    ///  packet arriving. This is the regular end-of-burst signal when packets were lost.
    pub read_timeout: Duration,
    /// pause on the Sender between two rate levels to let the path drain
    pub settle_delay: Duration,
    /// The Pacer sleeps on the runtime's timer until this much time is left before a scheduled
    ///  send, and busy-waits for the rest. Zero means busy-waiting all the way.
    pub pacer_spin_threshold: Duration,

    /// delta_r (in Mbps) the Receiver falls back to if the calibration burst yielded no rate
    pub fallback_delta_r_mbps: f64,

    pub max_control_message_len: usize,
    /// OS send / receive buffer size requested for the probe socket
    pub socket_buffer_size: usize,

    /// directory for the CSV files that sessions' results are appended to
    pub result_dir: PathBuf,
}

impl ProbeConfig {
    pub fn new(probe_addr: SocketAddr, control_addr: SocketAddr) -> ProbeConfig {
        ProbeConfig {
            probe_addr,
            control_addr,
            packet_size: 1500,
            num_packets: 100,
            num_levels: 20,
            read_timeout: Duration::from_secs(2),
            settle_delay: Duration::from_secs(1),
            pacer_spin_threshold: Duration::from_millis(2),
            fallback_delta_r_mbps: 1.0,
            max_control_message_len: 1024,
            socket_buffer_size: 1024*1024,
            result_dir: PathBuf::from("Data"),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.packet_size < ProbeHeader::SERIALIZED_LEN {
            bail!("packet size must be at least {} bytes to hold the probe header, was {}", ProbeHeader::SERIALIZED_LEN, self.packet_size);
        }
        if self.packet_size > MAX_UDP_PAYLOAD {
            bail!("packet size {} exceeds the maximum UDP payload of {} bytes", self.packet_size, MAX_UDP_PAYLOAD);
        }
        if self.num_packets < 2 || self.num_packets > u32::MAX as usize {
            bail!("a burst needs at least two packets to measure a rate, and the count must fit a sequence number; was {}", self.num_packets);
        }
        if self.num_levels == 0 || self.num_levels == u16::MAX {
            bail!("number of rate levels must be between 1 and {}, was {}", u16::MAX - 1, self.num_levels);
        }
        if self.read_timeout.is_zero() {
            bail!("read timeout must not be zero");
        }
        if !is_transmittable_calibration(self.fallback_delta_r_mbps) {
            bail!("fallback delta_r must stay positive when rounded to two decimals, was {}", self.fallback_delta_r_mbps);
        }
        if self.max_control_message_len < 16 {
            bail!("max control message length is too small: {}", self.max_control_message_len);
        }
        Ok(())
    }

    pub fn packet_bits(&self) -> f64 {
        (self.packet_size * 8) as f64
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use rstest::rstest;
    use super::*;

    fn config() -> ProbeConfig {
        ProbeConfig::new(
            SocketAddr::from_str("127.0.0.1:5005").unwrap(),
            SocketAddr::from_str("127.0.0.1:6000").unwrap(),
        )
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = config();
        assert!(config.validate().is_ok());
        assert_eq!(config.packet_size, 1500);
        assert_eq!(config.num_packets, 100);
        assert_eq!(config.num_levels, 20);
        assert_eq!(config.packet_bits(), 12000.0);
    }

    #[rstest]
    #[case::tiny_packet(|c: &mut ProbeConfig| c.packet_size = 4)]
    #[case::huge_packet(|c: &mut ProbeConfig| c.packet_size = 70000)]
    #[case::single_packet(|c: &mut ProbeConfig| c.num_packets = 1)]
    #[case::no_levels(|c: &mut ProbeConfig| c.num_levels = 0)]
    #[case::max_levels(|c: &mut ProbeConfig| c.num_levels = u16::MAX)]
    #[case::zero_timeout(|c: &mut ProbeConfig| c.read_timeout = Duration::ZERO)]
    #[case::zero_fallback(|c: &mut ProbeConfig| c.fallback_delta_r_mbps = 0.0)]
    #[case::nan_fallback(|c: &mut ProbeConfig| c.fallback_delta_r_mbps = f64::NAN)]
    #[case::fallback_rounds_to_zero(|c: &mut ProbeConfig| c.fallback_delta_r_mbps = 0.004)]
    #[case::small_control_messages(|c: &mut ProbeConfig| c.max_control_message_len = 8)]
    fn test_validate_rejects(#[case] modify: fn(&mut ProbeConfig)) {
        let mut config = config();
        modify(&mut config);
        assert!(config.validate().is_err());
    }
}
