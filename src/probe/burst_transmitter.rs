use std::sync::Arc;
use std::time::Instant;
use tracing::{trace, warn};

use crate::probe::burst::BurstReport;
use crate::probe::pacer::Pacing;
use crate::probe::probe_config::ProbeConfig;
use crate::probe::probe_header::ProbeHeader;
use crate::probe::probe_socket::ProbeSocket;
use crate::util::safe_converter::PrecheckedCast;

/// Sends bursts of `num_packets` datagrams of `packet_size` bytes each.
pub struct BurstTransmitter<S: ProbeSocket> {
    config: Arc<ProbeConfig>,
    socket: Arc<S>,
    packet_buf: Vec<u8>,
}

impl <S: ProbeSocket> BurstTransmitter<S> {
    pub fn new(config: Arc<ProbeConfig>, socket: Arc<S>) -> BurstTransmitter<S> {
        let packet_buf = vec![0u8; config.packet_size];
        BurstTransmitter {
            config,
            socket,
            packet_buf,
        }
    }

    /// Sends a single burst, recording the completion time of every successful send.
    ///
    /// A failed send is logged and skipped: loss is part of what is measured, so it must not
    ///  abort the burst.
    pub async fn send_burst(&mut self, level: u16, pacing: Pacing) -> BurstReport {
        let num_packets = self.config.num_packets;
        let burst_start = Instant::now();
        let mut report = BurstReport::new(level, burst_start);

        for i in 0..num_packets {
            ProbeHeader {
                level,
                sequence_number: i.prechecked_cast(),
            }.patch(&mut self.packet_buf);

            match self.socket.send_probe(&self.packet_buf).await {
                Ok(num_bytes) => {
                    trace!(level, packet = i, "sent probe packet");
                    report.record(Instant::now(), num_bytes);
                }
                Err(e) => {
                    warn!(level, packet = i, "error sending probe packet: {}", e);
                    report.num_errors += 1;
                }
            }

            if i + 1 < num_packets {
                if let Pacing::Paced(pacer) = &pacing {
                    match pacer.deadline_after(burst_start, i) {
                        Some(deadline) => pacer.wait_until(deadline).await,
                        None => {
                            warn!(level, packet = i, "next send time is out of range - ending burst");
                            break;
                        }
                    }
                }
            }
        }

        report
    }
}
