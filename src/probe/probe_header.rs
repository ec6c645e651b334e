use bytes::{Buf, BufMut};
use anyhow::bail;

/// Every probe datagram starts with this header. The rest of the datagram is filler that is
///  there only to give the packet its configured size.
///
/// The level allows the Receiver to tell stragglers of a previous burst from packets of the
///  burst it is waiting for, and the sequence number allows detecting reordering. Neither
///  is needed for the rate estimate itself.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ProbeHeader {
    /// 0 for the calibration burst, `k` for rate level `k`
    pub level: u16,
    pub sequence_number: u32,
}

impl ProbeHeader {
    pub const MAGIC: u32 = u32::from_be_bytes(*b"BWPR");
    pub const SERIALIZED_LEN: usize = size_of::<u32>() + size_of::<u16>() + size_of::<u32>();

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u32(Self::MAGIC);
        buf.put_u16(self.level);
        buf.put_u32(self.sequence_number);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ProbeHeader> {
        let magic = buf.try_get_u32()?;
        if magic != Self::MAGIC {
            bail!("not a probe packet: magic was {:08x}", magic);
        }

        let level = buf.try_get_u16()?;
        let sequence_number = buf.try_get_u32()?;
        Ok(ProbeHeader {
            level,
            sequence_number,
        })
    }

    /// overwrites the start of a packet buffer with this header, leaving the filler as it is
    pub fn patch(&self, packet: &mut [u8]) {
        let mut header_buf = &mut packet[..Self::SERIALIZED_LEN];
        self.ser(&mut header_buf);
    }
}
