use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use crate::probe::burst_receiver::BurstReceiver;
use crate::probe::burst_transmitter::BurstTransmitter;
use crate::probe::control_channel::{is_transmittable_calibration, ControlChannel};
use crate::probe::pacer::{Pacer, Pacing};
use crate::probe::probe_config::ProbeConfig;
use crate::probe::probe_socket::ProbeSocket;
use crate::probe::rate_estimator::mbps_to_bps;
use crate::probe::session_result::{LevelResult, Role, SessionResult};
use crate::util::safe_converter::PrecheckedCast;

/// Level number of the calibration burst
pub const CALIBRATION_LEVEL: u16 = 0;

/// A session's progress. Both roles go through the calibration phase and then through the
///  rate levels `1..=num_levels` in order, never skipping or repeating a state.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SessionState {
    Idle,
    CalibrationSend,
    CalibrationReceive,
    AwaitDeltaR,
    ComputeDeltaR,
    Sweep(u16),
    Done,
}

/// The Receiver's step size for the sweep: the calibration estimate divided evenly across
///  the rate levels, so the last level probes at the calibration rate.
///
/// The step is announced with two decimals. If the calibration rate is unmeasurable, or if the
///  step would round to zero on the control channel, the fallback keeps the levels distinct
///  and positive on both sides.
pub fn derive_delta_r(calibration_rate_mbps: f64, num_levels: u16, fallback_delta_r_mbps: f64) -> f64 {
    let delta_r = calibration_rate_mbps / f64::from(num_levels);
    if calibration_rate_mbps > 0.0 && is_transmittable_calibration(delta_r) {
        delta_r
    }
    else {
        fallback_delta_r_mbps
    }
}

pub fn target_rate_mbps(delta_r_mbps: f64, level: u16) -> f64 {
    f64::from(level) * delta_r_mbps
}

/// The Sender's side of a probing session. It owns the connected probe socket and the
///  control stream for the session's lifetime.
pub struct SenderSession<P: ProbeSocket, C> {
    config: Arc<ProbeConfig>,
    transmitter: BurstTransmitter<P>,
    control: ControlChannel<C>,
    state: SessionState,
}

impl <P: ProbeSocket, C: AsyncRead + AsyncWrite + Unpin + Send> SenderSession<P, C> {
    pub fn new(config: Arc<ProbeConfig>, probe_socket: Arc<P>, control_stream: C) -> SenderSession<P, C> {
        SenderSession {
            transmitter: BurstTransmitter::new(config.clone(), probe_socket),
            control: ControlChannel::new(control_stream, config.max_control_message_len),
            config,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, state: SessionState) {
        debug!(from = ?self.state, to = ?state, "sender state transition");
        self.state = state;
    }

    #[tracing::instrument(name = "sender_session", skip_all)]
    pub async fn run(&mut self) -> anyhow::Result<SessionResult> {
        let packet_bits = self.config.packet_bits();
        let mut levels = Vec::with_capacity(usize::from(self.config.num_levels) + 1);

        self.transition(SessionState::CalibrationSend);
        info!("sending calibration burst of {} packets", self.config.num_packets);
        let report = self.transmitter.send_burst(CALIBRATION_LEVEL, Pacing::Unpaced).await;
        let r_in = report.achieved_rate_mbps(packet_bits);
        info!("calibration burst: {} packets in {:?}, estimated r_in: {:.2} Mbps", report.num_packets(), report.span(), r_in);
        levels.push(LevelResult {
            level: CALIBRATION_LEVEL,
            target_rate_mbps: None,
            achieved_rate_mbps: r_in,
            num_packets: report.num_packets(),
        });

        self.transition(SessionState::AwaitDeltaR);
        let delta_r = match self.control.recv_calibration().await {
            Ok(delta_r) => delta_r,
            Err(e) => {
                error!("did not receive a calibration value - aborting session: {}", e);
                return Err(e);
            }
        };
        info!("received delta_r: {:.2} Mbps", delta_r);

        for level in 1..=self.config.num_levels {
            self.transition(SessionState::Sweep(level));

            let target = target_rate_mbps(delta_r, level);
            let pacer = Pacer::for_rate(mbps_to_bps(target), packet_bits, self.config.pacer_spin_threshold)?;
            info!(level, "sending at {:.2} Mbps (interval: {:?})", target, pacer.interval());

            if let Err(e) = self.control.send_stream_start(level).await {
                error!(level, "error sending stream start marker - aborting session: {}", e);
                return Err(e);
            }

            let report = self.transmitter.send_burst(level, Pacing::Paced(pacer)).await;
            let num_intervals: u32 = (self.config.num_packets - 1).prechecked_cast();
            let scheduled = pacer.interval().checked_mul(num_intervals).unwrap_or(Duration::MAX);
            debug!(level, "burst duration: {:?} (scheduled: {:?}), {} send errors", report.span(), scheduled, report.num_errors);

            let achieved = report.achieved_rate_mbps(packet_bits);
            if report.num_packets() < 2 {
                warn!(level, "not enough packets sent to compute r_in");
            }
            info!(level, "achieved r_in: {:.2} Mbps (target {:.2} Mbps)", achieved, target);

            levels.push(LevelResult {
                level,
                target_rate_mbps: Some(target),
                achieved_rate_mbps: achieved,
                num_packets: report.num_packets(),
            });

            tokio::time::sleep(self.config.settle_delay).await;
        }

        self.transition(SessionState::Done);
        Ok(SessionResult {
            role: Role::Sender,
            delta_r_mbps: delta_r,
            levels,
        })
    }
}

/// The Receiver's side of a probing session
pub struct ReceiverSession<P: ProbeSocket, C> {
    config: Arc<ProbeConfig>,
    receiver: BurstReceiver<P>,
    control: ControlChannel<C>,
    state: SessionState,
}

impl <P: ProbeSocket, C: AsyncRead + AsyncWrite + Unpin + Send> ReceiverSession<P, C> {
    pub fn new(config: Arc<ProbeConfig>, probe_socket: Arc<P>, control_stream: C) -> ReceiverSession<P, C> {
        ReceiverSession {
            receiver: BurstReceiver::new(config.clone(), probe_socket),
            control: ControlChannel::new(control_stream, config.max_control_message_len),
            config,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, state: SessionState) {
        debug!(from = ?self.state, to = ?state, "receiver state transition");
        self.state = state;
    }

    #[tracing::instrument(name = "receiver_session", skip_all)]
    pub async fn run(&mut self) -> anyhow::Result<SessionResult> {
        let packet_bits = self.config.packet_bits();
        let mut levels = Vec::with_capacity(usize::from(self.config.num_levels) + 1);

        self.transition(SessionState::CalibrationReceive);
        info!("waiting for calibration burst");
        let report = self.receiver.receive_burst(CALIBRATION_LEVEL).await;
        let r_out = report.achieved_rate_mbps(packet_bits);
        info!("calibration burst: {} packets, {} bytes, span-based {:.2} Mbps, estimated r_out: {:.2} Mbps",
            report.num_packets(), report.num_bytes, report.span_rate_mbps(), r_out);
        levels.push(LevelResult {
            level: CALIBRATION_LEVEL,
            target_rate_mbps: None,
            achieved_rate_mbps: r_out,
            num_packets: report.num_packets(),
        });

        self.transition(SessionState::ComputeDeltaR);
        let delta_r = derive_delta_r(r_out, self.config.num_levels, self.config.fallback_delta_r_mbps);
        if r_out == 0.0 {
            warn!("calibration rate could not be measured - falling back to delta_r of {:.2} Mbps", delta_r);
        }
        else if delta_r != r_out / f64::from(self.config.num_levels) {
            warn!("calibration rate of {:.4} Mbps is too low for {} levels - falling back to delta_r of {:.2} Mbps", r_out, self.config.num_levels, delta_r);
        }
        info!("computed delta_r: {:.2} Mbps", delta_r);

        if let Err(e) = self.control.send_calibration(delta_r).await {
            error!("error sending calibration value - aborting session: {}", e);
            return Err(e);
        }

        for level in 1..=self.config.num_levels {
            self.transition(SessionState::Sweep(level));

            let marker = match self.control.recv_stream_start().await {
                Ok(marker) => marker,
                Err(e) => {
                    error!(level, "error reading stream start signal - aborting session: {}", e);
                    return Err(e);
                }
            };
            debug!(level, "stream start signal: {:?}", marker);

            let report = self.receiver.receive_burst(level).await;
            let achieved = report.achieved_rate_mbps(packet_bits);
            if report.num_packets() < 2 {
                warn!(level, "not enough packets received to compute r_out");
            }
            info!(level, "received {} packets ({} discarded), estimated r_out: {:.2} Mbps", report.num_packets(), report.num_discarded, achieved);

            levels.push(LevelResult {
                level,
                target_rate_mbps: Some(target_rate_mbps(delta_r, level)),
                achieved_rate_mbps: achieved,
                num_packets: report.num_packets(),
            });
        }

        self.transition(SessionState::Done);
        Ok(SessionResult {
            role: Role::Receiver,
            delta_r_mbps: delta_r,
            levels,
        })
    }
}
