use anyhow::{anyhow, bail};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::util::safe_converter::{PrecheckedCast, SafeCast};

/// The reliable control path between Sender and Receiver.
///
/// Every message is a 4-byte big-endian length followed by a UTF-8 text payload. The framing
///  makes message boundaries independent of how the stream happens to be segmented on the
///  way; the payloads themselves are plain text for readability on the wire.
///
/// There are two kinds of messages:
/// * the calibration announcement (Receiver to Sender, once per session): delta_r in Mbps as
///   decimal text with two decimals
/// * the stream-start marker (Sender to Receiver, once per rate level): a free-text tag that
///   unblocks the Receiver for the level's burst
pub struct ControlChannel<S> {
    stream: S,
    max_message_len: usize,
}

impl <S: AsyncRead + AsyncWrite + Unpin + Send> ControlChannel<S> {
    pub fn new(stream: S, max_message_len: usize) -> ControlChannel<S> {
        ControlChannel {
            stream,
            max_message_len,
        }
    }

    pub async fn send_calibration(&mut self, delta_r_mbps: f64) -> anyhow::Result<()> {
        let text = format_calibration(delta_r_mbps);
        debug!("sending calibration: {} Mbps", text);
        self.write_frame(text.as_bytes()).await
    }

    pub async fn recv_calibration(&mut self) -> anyhow::Result<f64> {
        let text = self.read_text_frame().await?;
        parse_calibration(&text)
    }

    pub async fn send_stream_start(&mut self, level: u16) -> anyhow::Result<()> {
        let marker = stream_start_marker(level);
        trace!("sending stream start marker {:?}", marker);
        self.write_frame(marker.as_bytes()).await
    }

    /// Blocks until the Sender announces the next burst, returning the marker's text
    pub async fn recv_stream_start(&mut self) -> anyhow::Result<String> {
        self.read_text_frame().await
    }

    async fn write_frame(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        if payload.len() > self.max_message_len {
            bail!("control message of {} bytes exceeds the configured maximum of {}", payload.len(), self.max_message_len);
        }

        let mut buf = BytesMut::with_capacity(size_of::<u32>() + payload.len());
        buf.put_u32(payload.len().prechecked_cast());
        buf.put_slice(payload);

        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_frame(&mut self) -> anyhow::Result<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).await
            .map_err(|e| anyhow!("control channel closed or broken while waiting for a message: {}", e))?;
        let msg_len: usize = u32::from_be_bytes(len_buf).safe_cast();

        if msg_len > self.max_message_len {
            bail!("received a control message of {} bytes, exceeding the configured maximum of {} - peer is misconfigured or not a probe peer", msg_len, self.max_message_len);
        }

        let mut msg_buf = vec![0u8; msg_len];
        self.stream.read_exact(&mut msg_buf).await?;
        Ok(msg_buf)
    }

    async fn read_text_frame(&mut self) -> anyhow::Result<String> {
        let buf = self.read_frame().await?;
        Ok(String::from_utf8(buf)?)
    }
}

pub fn format_calibration(delta_r_mbps: f64) -> String {
    format!("{:.2}", delta_r_mbps)
}

/// Parses a calibration announcement. Anything that is not a positive, finite number is
///  rejected: without a usable step size, no meaningful sweep is possible. So is a positive
///  value below two decimals' precision, which no Receiver announces.
pub fn parse_calibration(text: &str) -> anyhow::Result<f64> {
    let delta_r: f64 = text.trim().parse()
        .map_err(|e| anyhow!("calibration message {:?} is not a number: {}", text, e))?;

    if !is_transmittable_calibration(delta_r) {
        bail!("calibration value must be a positive number, was {:?}", text);
    }
    Ok(delta_r)
}

/// whether a step size is still a positive number after [format_calibration]'s rounding
pub fn is_transmittable_calibration(delta_r_mbps: f64) -> bool {
    delta_r_mbps.is_finite() && format_calibration(delta_r_mbps)
        .parse::<f64>()
        .is_ok_and(|rounded| rounded > 0.0)
}

pub fn stream_start_marker(level: u16) -> String {
    format!("Stream {} starting", level)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::io::duplex;
    use super::*;

    #[rstest]
    #[case::two_decimals(40.0, "40.00")]
    #[case::rounded(12.345678, "12.35")]
    #[case::small(0.5, "0.50")]
    fn test_format_calibration(#[case] delta_r: f64, #[case] expected: &str) {
        assert_eq!(format_calibration(delta_r), expected);
    }

    #[rstest]
    #[case::plain("40.00", Some(40.0))]
    #[case::whitespace(" 12.5\n", Some(12.5))]
    #[case::integer("7", Some(7.0))]
    #[case::zero("0.00", None)]
    #[case::negative("-1.00", None)]
    #[case::nan("NaN", None)]
    #[case::infinite("inf", None)]
    #[case::below_precision("1e-300", None)]
    #[case::exponent("4e1", Some(40.0))]
    #[case::garbage("Stream 1 starting", None)]
    #[case::empty("", None)]
    fn test_parse_calibration(#[case] text: &str, #[case] expected: Option<f64>) {
        match parse_calibration(text) {
            Ok(actual) => assert_eq!(Some(actual), expected),
            Err(_) => assert!(expected.is_none()),
        }
    }

    #[rstest]
    #[case::regular(40.0, true)]
    #[case::smallest(0.01, true)]
    #[case::rounds_up(0.006, true)]
    #[case::rounds_to_zero(0.0025, false)]
    #[case::zero(0.0, false)]
    #[case::infinite(f64::INFINITY, false)]
    fn test_is_transmittable_calibration(#[case] delta_r: f64, #[case] expected: bool) {
        assert_eq!(is_transmittable_calibration(delta_r), expected);
    }

    #[tokio::test]
    async fn test_calibration_exchange() {
        let (a, b) = duplex(1024);
        let mut receiver_side = ControlChannel::new(a, 64);
        let mut sender_side = ControlChannel::new(b, 64);

        receiver_side.send_calibration(40.004).await.unwrap();
        assert_eq!(sender_side.recv_calibration().await.unwrap(), 40.0);
    }

    #[tokio::test]
    async fn test_markers_keep_their_boundaries() {
        let (a, b) = duplex(1024);
        let mut sender_side = ControlChannel::new(a, 64);
        let mut receiver_side = ControlChannel::new(b, 64);

        // several markers in the stream before the first read would have been coalesced
        //  into a single read without framing
        for level in 1..=3 {
            sender_side.send_stream_start(level).await.unwrap();
        }
        for level in 1..=3 {
            assert_eq!(receiver_side.recv_stream_start().await.unwrap(), format!("Stream {} starting", level));
        }
    }

    #[tokio::test]
    async fn test_frame_split_across_writes() {
        let (mut raw, b) = duplex(1024);
        let mut receiver_side = ControlChannel::new(b, 64);

        let reader = tokio::spawn(async move {
            receiver_side.recv_calibration().await
        });

        raw.write_all(b"\0\0").await.unwrap();
        tokio::task::yield_now().await;
        raw.write_all(b"\0\x0512").await.unwrap();
        tokio::task::yield_now().await;
        raw.write_all(b".50").await.unwrap();

        assert_eq!(reader.await.unwrap().unwrap(), 12.5);
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let (mut raw, b) = duplex(1024);
        let mut receiver_side = ControlChannel::new(b, 16);

        raw.write_all(&1000u32.to_be_bytes()).await.unwrap();
        assert!(receiver_side.recv_stream_start().await.is_err());

        let mut sender_side = ControlChannel::new(raw, 16);
        assert!(sender_side.write_frame(&[b'x'; 17]).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_channel_is_an_error() {
        let (a, b) = duplex(1024);
        let mut receiver_side = ControlChannel::new(b, 64);
        drop(a);

        assert!(receiver_side.recv_stream_start().await.is_err());
        assert!(receiver_side.send_calibration(1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_an_error() {
        let (mut raw, b) = duplex(1024);
        let mut receiver_side = ControlChannel::new(b, 64);

        raw.write_all(b"\0\0\0\x02\xff\xfe").await.unwrap();
        assert!(receiver_side.recv_stream_start().await.is_err());
    }
}
