//! Bounds-checked field access over byte buffers
//!
//! Every read checks the remaining length first and reports an overrun as
//! [`PacketError::Malformed`] with the offset of the field. Nothing here
//! indexes past the end of a slice.

use bytes::{BufMut, Bytes, BytesMut};
use printgate_core::PacketError;

/// Cursor over a complete frame
#[derive(Debug, Clone)]
pub struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    /// Start reading at offset 0
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], PacketError> {
        if self.remaining() < len {
            return Err(PacketError::Malformed {
                offset: self.pos,
                reason: format!("{} needs {} bytes, {} left", what, len, self.remaining()),
            });
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(out)
    }

    fn array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], PacketError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    /// Read one byte
    pub fn u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.array::<1>("u8")?[0])
    }

    /// Read a little-endian u16
    pub fn u16_le(&mut self) -> Result<u16, PacketError> {
        Ok(u16::from_le_bytes(self.array("u16")?))
    }

    /// Read a little-endian u32
    pub fn u32_le(&mut self) -> Result<u32, PacketError> {
        Ok(u32::from_le_bytes(self.array("u32")?))
    }

    /// Read a big-endian u32
    pub fn u32_be(&mut self) -> Result<u32, PacketError> {
        Ok(u32::from_be_bytes(self.array("u32")?))
    }

    /// Read a little-endian u64
    pub fn u64_le(&mut self) -> Result<u64, PacketError> {
        Ok(u64::from_le_bytes(self.array("u64")?))
    }

    /// Borrow `len` raw bytes
    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], PacketError> {
        self.take(len, "block")
    }

    /// Borrow everything after the cursor
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    /// Move the cursor to an absolute offset
    pub fn seek(&mut self, pos: usize) -> Result<(), PacketError> {
        if pos > self.buf.len() {
            return Err(PacketError::Malformed {
                offset: pos,
                reason: format!("seek past end of {} byte frame", self.buf.len()),
            });
        }
        self.pos = pos;
        Ok(())
    }
}

/// Growable frame builder
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: BytesMut,
}

impl FieldWriter {
    /// Empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty writer with reserved capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write one byte
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.put_u8(v);
        self
    }

    /// Write a little-endian u16
    pub fn u16_le(&mut self, v: u16) -> &mut Self {
        self.buf.put_u16_le(v);
        self
    }

    /// Write a little-endian u32
    pub fn u32_le(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32_le(v);
        self
    }

    /// Write a big-endian u32
    pub fn u32_be(&mut self, v: u32) -> &mut Self {
        self.buf.put_u32(v);
        self
    }

    /// Write a little-endian u64
    pub fn u64_le(&mut self, v: u64) -> &mut Self {
        self.buf.put_u64_le(v);
        self
    }

    /// Write raw bytes
    pub fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.buf.put_slice(v);
        self
    }

    /// Write `count` zero bytes
    pub fn zeros(&mut self, count: usize) -> &mut Self {
        self.buf.put_bytes(0, count);
        self
    }

    /// Overwrite a little-endian u32 at `offset`
    pub fn patch_u32_le(&mut self, offset: usize, v: u32) -> &mut Self {
        if let Some(slot) = self.buf.get_mut(offset..offset + 4) {
            slot.copy_from_slice(&v.to_le_bytes());
        }
        self
    }

    /// Finish the frame as-is
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Rewrite the leading u32 to `total - 4` and finish
    pub fn finish_with_length(mut self) -> Bytes {
        let body = self.buf.len().saturating_sub(4) as u32;
        self.patch_u32_le(0, body);
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_overrun_reports_offset() {
        let mut r = FieldReader::new(&[1, 0, 2]);
        assert_eq!(r.u16_le().unwrap(), 1);
        match r.u32_le() {
            Err(PacketError::Malformed { offset, .. }) => assert_eq!(offset, 2),
            other => panic!("unexpected {:?}", other),
        }
        // failed read does not move the cursor
        assert_eq!(r.u8().unwrap(), 2);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_writer_length_prefix() {
        let mut w = FieldWriter::new();
        w.u32_le(0).u32_le(0x0a).u8(1).u32_be(0x0102_0304);
        let frame = w.finish_with_length();
        assert_eq!(&frame[..4], &(frame.len() as u32 - 4).to_le_bytes());
        assert_eq!(&frame[9..], &[1, 2, 3, 4]);
    }
}
