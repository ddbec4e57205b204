//! GX file upload chunk framing
//!
//! Between `M28 <length> 0:/user/<name>` and `M29` the file is sent as
//! fixed-size blocks:
//!
//! ```text
//! 5A 5A A5 A5 | u32 seq | u32 len | u32 crc32 | 4096 bytes payload
//! ```
//!
//! The three u32 fields are big-endian. `len` and `crc32` cover the real
//! bytes of the slice; the final block is zero padded to full size.

use crate::codec::FieldWriter;
use bytes::Bytes;
use crc::{Crc, CRC_32_ISO_HDLC};

/// Payload bytes per chunk
pub const GX_CHUNK_SIZE: usize = 4096;

/// Chunk preamble
pub const GX_CHUNK_MAGIC: [u8; 4] = [0x5A, 0x5A, 0xA5, 0xA5];

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Frame one slice as chunk `seq`
pub fn frame_chunk(seq: u32, slice: &[u8]) -> Bytes {
    let mut w = FieldWriter::with_capacity(16 + GX_CHUNK_SIZE);
    w.bytes(&GX_CHUNK_MAGIC)
        .u32_be(seq)
        .u32_be(slice.len() as u32)
        .u32_be(CRC32.checksum(slice))
        .bytes(slice)
        .zeros(GX_CHUNK_SIZE.saturating_sub(slice.len()));
    w.finish()
}

/// Split a file into framed chunks, numbered from 0
pub fn chunk_frames(data: &[u8]) -> Vec<Bytes> {
    data.chunks(GX_CHUNK_SIZE)
        .enumerate()
        .map(|(seq, slice)| frame_chunk(seq as u32, slice))
        .collect()
}

/// Path of an uploaded file on the device
pub fn device_path(name: &str) -> String {
    format!("0:/user/{}", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_chunk_padded() {
        let data = vec![7u8; GX_CHUNK_SIZE + 10];
        let chunks = chunk_frames(&data);
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert_eq!(chunk.len(), 16 + GX_CHUNK_SIZE);
            assert_eq!(&chunk[..4], &GX_CHUNK_MAGIC);
        }
        assert_eq!(&chunks[1][4..8], &1u32.to_be_bytes());
        assert_eq!(&chunks[1][8..12], &10u32.to_be_bytes());
        assert!(chunks[1][26..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_crc_of_real_bytes() {
        // standard check value for CRC-32/ISO-HDLC
        let chunk = frame_chunk(0, b"123456789");
        assert_eq!(&chunk[12..16], &0xCBF4_3926u32.to_be_bytes());
    }
}
