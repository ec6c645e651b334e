use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::probe::burst::BurstReport;
use crate::probe::probe_config::ProbeConfig;
use crate::probe::probe_header::ProbeHeader;
use crate::probe::probe_socket::ProbeSocket;

#[derive(Debug, Clone, Copy)]
struct Arrival {
    header: ProbeHeader,
    at: Instant,
    num_bytes: usize,
}

/// Receives bursts, recording the arrival time of every packet that belongs to the burst.
///
/// There is no explicit end-of-burst message: a burst ends when `num_packets` packets were
///  received, or when no packet arrived for `read_timeout`.
pub struct BurstReceiver<S: ProbeSocket> {
    config: Arc<ProbeConfig>,
    socket: Arc<S>,
    buf: Vec<u8>,
    /// a packet of a later burst that arrived while an earlier burst was still being received
    carry_over: Option<Arrival>,
}

impl <S: ProbeSocket> BurstReceiver<S> {
    pub fn new(config: Arc<ProbeConfig>, socket: Arc<S>) -> BurstReceiver<S> {
        let buf = vec![0u8; config.packet_size];
        BurstReceiver {
            config,
            socket,
            buf,
            carry_over: None,
        }
    }

    pub async fn receive_burst(&mut self, level: u16) -> BurstReport {
        let num_packets = self.config.num_packets;
        let mut report = BurstReport::new(level, Instant::now());
        let mut last_sequence_number = None;

        if let Some(arrival) = self.carry_over.take() {
            if arrival.header.level == level {
                debug!(level, "starting burst with a packet that arrived early");
                accept(&mut report, &mut last_sequence_number, arrival);
            }
            else if arrival.header.level > level {
                self.carry_over = Some(arrival);
            }
            else {
                report.num_discarded += 1;
            }
        }

        while report.num_packets() < num_packets {
            let len = match timeout(self.config.read_timeout, self.socket.recv_probe(&mut self.buf)).await {
                Ok(Ok(len)) => len,
                Ok(Err(e)) => {
                    warn!(level, "error receiving probe packet: {}", e);
                    report.num_errors += 1;
                    if report.num_errors > num_packets {
                        warn!(level, "too many receive errors - ending burst");
                        break;
                    }
                    continue;
                }
                Err(_) => {
                    debug!(level, received = report.num_packets(), "timeout waiting for probe packets - ending burst");
                    report.timed_out = true;
                    break;
                }
            };
            let at = Instant::now();

            let header = match ProbeHeader::deser(&mut &self.buf[..len]) {
                Ok(header) => header,
                Err(e) => {
                    debug!(level, "discarding datagram: {}", e);
                    report.num_discarded += 1;
                    continue;
                }
            };

            let arrival = Arrival { header, at, num_bytes: len };
            if header.level == level {
                accept(&mut report, &mut last_sequence_number, arrival);
            }
            else if header.level < level {
                trace!(level, "discarding straggler packet of level {}", header.level);
                report.num_discarded += 1;
            }
            else {
                warn!(level, "packet of level {} arrived before the burst was complete - ending burst", header.level);
                self.carry_over = Some(arrival);
                break;
            }
        }

        if report.num_reordered > 0 {
            debug!(level, "{} packets arrived out of order", report.num_reordered);
        }
        report
    }
}

fn accept(report: &mut BurstReport, last_sequence_number: &mut Option<u32>, arrival: Arrival) {
    let sequence_number = arrival.header.sequence_number;
    if let Some(last) = *last_sequence_number {
        if sequence_number < last {
            report.num_reordered += 1;
        }
    }
    *last_sequence_number = Some(sequence_number);

    trace!(level = arrival.header.level, sequence_number, "received probe packet");
    report.record(arrival.at, arrival.num_bytes);
}
