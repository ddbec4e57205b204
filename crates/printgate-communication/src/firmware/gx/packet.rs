//! GX binary packet codec
//!
//! ```text
//! u32 length | u32 type | u8 version | u8 side | u32 magic1 | u32 magic2 | u16[5] header | payload
//! ```
//!
//! All integers are little-endian. `length` counts every byte after itself.
//! `type` is the numeric M-code of the command carried in the payload.

use super::protocol::GxCommand;
use crate::codec::{FieldReader, FieldWriter};
use bytes::Bytes;
use printgate_core::PacketError;

/// Bytes before the payload
pub const GX_HEADER_LEN: usize = 28;

/// Value of both magic words
pub const GX_MAGIC: u32 = 0xFFFF_FFFF;

/// One GX packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GxPacket {
    /// Packet type (M-code)
    pub kind: u32,
    /// Protocol version
    pub version: u8,
    /// 0 = client, 1 = device
    pub side: u8,
    /// Header words
    pub header: [u16; 5],
    /// Payload bytes
    pub payload: Bytes,
}

impl GxPacket {
    /// Client packet carrying a command line
    pub fn command(command: GxCommand, text: &str) -> Self {
        Self {
            kind: command.code(),
            version: 1,
            side: 0,
            header: [0; 5],
            payload: Bytes::copy_from_slice(text.as_bytes()),
        }
    }

    /// Command named by the packet type
    pub fn command_code(&self) -> Result<GxCommand, PacketError> {
        GxCommand::from_code(self.kind)
    }

    /// Payload as text
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Encode with the length field filled in
    pub fn encode(&self) -> Bytes {
        let mut w = FieldWriter::with_capacity(GX_HEADER_LEN + self.payload.len());
        w.u32_le(0)
            .u32_le(self.kind)
            .u8(self.version)
            .u8(self.side)
            .u32_le(GX_MAGIC)
            .u32_le(GX_MAGIC);
        for word in self.header {
            w.u16_le(word);
        }
        w.bytes(&self.payload);
        w.finish_with_length()
    }

    /// Decode one packet from the front of `buf`
    ///
    /// Returns the packet and the number of bytes it used.
    /// [`PacketError::Incomplete`] means more bytes are needed.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        if buf.len() < 4 {
            return Err(PacketError::Incomplete {
                needed: 4,
                available: buf.len(),
            });
        }
        let mut r = FieldReader::new(buf);
        let total = r.u32_le()? as usize + 4;
        if total < GX_HEADER_LEN {
            return Err(PacketError::Malformed {
                offset: 0,
                reason: format!("declared length {} shorter than header", total),
            });
        }
        if buf.len() < total {
            return Err(PacketError::Incomplete {
                needed: total,
                available: buf.len(),
            });
        }

        let mut r = FieldReader::new(&buf[..total]);
        r.seek(4)?;
        let kind = r.u32_le()?;
        let version = r.u8()?;
        let side = r.u8()?;
        for _ in 0..2 {
            let at = r.position();
            let magic = r.u32_le()?;
            if magic != GX_MAGIC {
                return Err(PacketError::Malformed {
                    offset: at,
                    reason: format!("bad magic {:#010x}", magic),
                });
            }
        }
        let mut header = [0u16; 5];
        for word in &mut header {
            *word = r.u16_le()?;
        }
        let payload = Bytes::copy_from_slice(r.rest());
        Ok((
            Self {
                kind,
                version,
                side,
                header,
                payload,
            },
            total,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_field() {
        let frame = GxPacket::command(GxCommand::GetTemp, "M105").encode();
        assert_eq!(frame.len(), GX_HEADER_LEN + 4);
        assert_eq!(&frame[..4], &((frame.len() - 4) as u32).to_le_bytes());
        assert_eq!(&frame[4..8], &105u32.to_le_bytes());
    }

    #[test]
    fn test_bad_magic() {
        let mut frame = GxPacket::command(GxCommand::GetTemp, "M105").encode().to_vec();
        frame[10] = 0;
        assert!(matches!(
            GxPacket::decode(&frame),
            Err(PacketError::Malformed { offset: 10, .. })
        ));
    }
}
