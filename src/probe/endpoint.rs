use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{info, warn};

use crate::probe::probe_config::ProbeConfig;
use crate::probe::session::{ReceiverSession, SenderSession};
use crate::probe::session_result::SessionResult;

/// The Sender's connections: a UDP socket connected to the Receiver's probe address, and a
///  TCP connection to its control address.
pub struct SenderEndpoint {
    pub probe: Arc<UdpSocket>,
    pub control: TcpStream,
}

impl SenderEndpoint {
    pub async fn connect(config: &ProbeConfig) -> anyhow::Result<SenderEndpoint> {
        let unspecified = match config.probe_addr {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let probe = bind_udp(SocketAddr::new(unspecified, 0), config.socket_buffer_size, BufferKind::Send)?;
        probe.connect(config.probe_addr).await?;
        info!("probe socket {:?} sending to {:?}", probe.local_addr()?, config.probe_addr);

        let control = TcpStream::connect(config.control_addr).await?;
        control.set_nodelay(true)?;
        info!("control connection to {:?} established", config.control_addr);

        Ok(SenderEndpoint {
            probe: Arc::new(probe),
            control,
        })
    }
}

/// The Receiver's sockets before the Sender has connected. The probe socket is bound before
///  the Sender can connect, so no packet of the calibration burst can arrive at a closed port.
pub struct ReceiverListener {
    probe: UdpSocket,
    control_listener: TcpListener,
}

impl ReceiverListener {
    pub async fn bind(config: &ProbeConfig) -> anyhow::Result<ReceiverListener> {
        let probe = bind_udp(config.probe_addr, config.socket_buffer_size, BufferKind::Receive)?;
        info!("probe socket bound to {:?}", probe.local_addr()?);

        let control_listener = TcpListener::bind(config.control_addr).await?;
        info!("control listener bound to {:?}", control_listener.local_addr()?);

        Ok(ReceiverListener {
            probe,
            control_listener,
        })
    }

    pub fn local_probe_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.probe.local_addr()?)
    }

    pub fn local_control_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.control_listener.local_addr()?)
    }

    /// waits for a single Sender to connect
    pub async fn accept(self) -> anyhow::Result<ReceiverEndpoint> {
        info!("waiting for sender to connect");
        let (control, peer_addr) = self.control_listener.accept().await?;
        control.set_nodelay(true)?;
        info!("control connection from {:?} established", peer_addr);

        Ok(ReceiverEndpoint {
            probe: Arc::new(self.probe),
            control,
        })
    }
}

pub struct ReceiverEndpoint {
    pub probe: Arc<UdpSocket>,
    pub control: TcpStream,
}

#[derive(Debug, Clone, Copy)]
enum BufferKind {
    Send,
    Receive,
}

fn bind_udp(addr: SocketAddr, buffer_size: usize, buffer_kind: BufferKind) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;

    let buffer_result = match buffer_kind {
        BufferKind::Send => socket.set_send_buffer_size(buffer_size),
        BufferKind::Receive => socket.set_recv_buffer_size(buffer_size),
    };
    if let Err(e) = buffer_result {
        warn!("could not set {:?} buffer size of probe socket to {}: {}", buffer_kind, buffer_size, e);
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Runs the Sender's side of a complete session: connect, calibrate, sweep.
pub async fn run_sender(config: Arc<ProbeConfig>) -> anyhow::Result<SessionResult> {
    config.validate()?;
    let endpoint = SenderEndpoint::connect(&config).await?;
    SenderSession::new(config, endpoint.probe, endpoint.control)
        .run().await
}

/// Runs the Receiver's side of a complete session, serving a single Sender.
pub async fn run_receiver(config: Arc<ProbeConfig>) -> anyhow::Result<SessionResult> {
    config.validate()?;
    let endpoint = ReceiverListener::bind(&config).await?
        .accept().await?;
    ReceiverSession::new(config, endpoint.probe, endpoint.control)
        .run().await
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::time::Duration;
    use crate::probe::session_result::Role;
    use super::*;

    fn config() -> ProbeConfig {
        let mut config = ProbeConfig::new(
            SocketAddr::from_str("127.0.0.1:0").unwrap(),
            SocketAddr::from_str("127.0.0.1:0").unwrap(),
        );
        config.num_packets = 10;
        config.num_levels = 4;
        config.read_timeout = Duration::from_millis(300);
        config.settle_delay = Duration::from_millis(20);
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_session_over_loopback() {
        let receiver_config = Arc::new(config());
        let listener = ReceiverListener::bind(&receiver_config).await.unwrap();

        let mut sender_config = config();
        sender_config.probe_addr = listener.local_probe_addr().unwrap();
        sender_config.control_addr = listener.local_control_addr().unwrap();
        let sender_config = Arc::new(sender_config);

        let receiver_task = tokio::spawn(async move {
            let endpoint = listener.accept().await?;
            ReceiverSession::new(receiver_config, endpoint.probe, endpoint.control)
                .run().await
        });
        let sender_task = tokio::spawn(run_sender(sender_config));

        let sender_result = sender_task.await.unwrap().unwrap();
        let receiver_result = receiver_task.await.unwrap().unwrap();

        assert_eq!(sender_result.role, Role::Sender);
        assert_eq!(sender_result.levels.len(), 5);
        assert_eq!(receiver_result.role, Role::Receiver);
        assert_eq!(receiver_result.levels.len(), 5);
        assert!((sender_result.delta_r_mbps - receiver_result.delta_r_mbps).abs() <= 0.0051);
    }

    #[tokio::test]
    async fn test_sender_fails_without_receiver() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut config = config();
        config.control_addr = listener.local_addr().unwrap();
        config.probe_addr = SocketAddr::from_str("127.0.0.1:9").unwrap();
        drop(listener);

        assert!(run_sender(Arc::new(config)).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_connecting() {
        let mut config = config();
        config.num_packets = 1;
        assert!(run_receiver(Arc::new(config)).await.is_err());
    }
}
