use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tracing::trace;

use crate::probe::probe_socket::ProbeSocket;

/// Loss injected by a [MemoryProbeSocket] on its sending side. Lost packets are reported as
///  successfully sent, the way a real datagram socket would.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LinkLoss {
    None,
    /// drops packets number n, 2n, 3n, ... (counting from 1, across bursts)
    EveryNth(usize),
    All,
}

impl LinkLoss {
    fn is_lost(&self, packet_number: usize) -> bool {
        match *self {
            LinkLoss::None => false,
            LinkLoss::EveryNth(n) => n > 0 && packet_number % n == 0,
            LinkLoss::All => true,
        }
    }
}

/// One end of an in-memory datagram link with zero delay
pub struct MemoryProbeSocket {
    tx: UnboundedSender<Bytes>,
    rx: Mutex<UnboundedReceiver<Bytes>>,
    loss: LinkLoss,
    num_sent: AtomicUsize,
}

/// creates both ends of an in-memory link, injecting the same loss pattern in both directions
pub fn memory_probe_link(loss: LinkLoss) -> (MemoryProbeSocket, MemoryProbeSocket) {
    let (tx_a, rx_a) = unbounded_channel();
    let (tx_b, rx_b) = unbounded_channel();

    let a = MemoryProbeSocket {
        tx: tx_a,
        rx: Mutex::new(rx_b),
        loss,
        num_sent: AtomicUsize::new(0),
    };
    let b = MemoryProbeSocket {
        tx: tx_b,
        rx: Mutex::new(rx_a),
        loss,
        num_sent: AtomicUsize::new(0),
    };
    (a, b)
}

#[async_trait]
impl ProbeSocket for MemoryProbeSocket {
    async fn send_probe(&self, packet_buf: &[u8]) -> io::Result<usize> {
        let packet_number = self.num_sent.fetch_add(1, Ordering::AcqRel) + 1;
        if self.loss.is_lost(packet_number) {
            trace!("dropping packet #{}", packet_number);
            return Ok(packet_buf.len());
        }

        // a datagram to a peer that went away is lost silently
        let _ = self.tx.send(Bytes::copy_from_slice(packet_buf));
        Ok(packet_buf.len())
    }

    async fn recv_probe(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(packet) => {
                let len = packet.len().min(buf.len());
                buf[..len].copy_from_slice(&packet[..len]);
                Ok(len)
            }
            None => {
                // like a socket whose peer is gone: nothing ever arrives again
                std::future::pending().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    #[rstest]
    #[case::none(LinkLoss::None, 0)]
    #[case::every_third(LinkLoss::EveryNth(3), 3)]
    #[case::all(LinkLoss::All, 10)]
    #[tokio::test]
    async fn test_loss(#[case] loss: LinkLoss, #[case] expected_lost: usize) {
        let (a, b) = memory_probe_link(loss);
        for i in 0..10u8 {
            assert_eq!(a.send_probe(&[i; 4]).await.unwrap(), 4);
        }
        drop(a);

        let mut num_received = 0;
        let mut buf = [0u8; 16];
        while let Ok(Ok(len)) = tokio::time::timeout(std::time::Duration::from_millis(20), b.recv_probe(&mut buf)).await {
            assert_eq!(len, 4);
            num_received += 1;
        }
        assert_eq!(num_received, 10 - expected_lost);
    }

    #[tokio::test]
    async fn test_truncates_to_buffer() {
        let (a, b) = memory_probe_link(LinkLoss::None);
        a.send_probe(b"0123456789").await.unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(b.recv_probe(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"0123");
    }
}
