use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::io;
use tokio::net::UdpSocket;
use tracing::trace;

/// This is an abstraction for the unreliable datagram channel that probes travel on,
///  introduced to decouple bursts from the actual socket so they can run on an in-memory
///  link or a mock for testing.
///
/// Implementations are expected to be connected to exactly one peer for the session.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ProbeSocket: Send + Sync + 'static {
    /// sends a single datagram, returning the number of bytes sent
    async fn send_probe(&self, packet_buf: &[u8]) -> io::Result<usize>;

    /// receives a single datagram into the buffer, returning its length
    async fn recv_probe(&self, buf: &mut [u8]) -> io::Result<usize>;
}

#[async_trait]
impl ProbeSocket for UdpSocket {
    async fn send_probe(&self, packet_buf: &[u8]) -> io::Result<usize> {
        self.send(packet_buf).await
    }

    async fn recv_probe(&self, buf: &mut [u8]) -> io::Result<usize> {
        let (len, from) = self.recv_from(buf).await?;
        trace!("received {} bytes from {:?}", len, from);
        Ok(len)
    }
}
