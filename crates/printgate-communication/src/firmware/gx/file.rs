//! `.gx` print container
//!
//! A 58-byte header, an 80x60 BMP thumbnail, then the raw G-code. Most header
//! fields after the print time and filament length are fixed values the
//! firmware expects.

use crate::codec::{FieldReader, FieldWriter};
use bytes::Bytes;
use printgate_core::PacketError;

/// Header length
pub const GX_FILE_HEADER_LEN: usize = 58;

/// File magic, NUL padded to 16 bytes
pub const GX_FILE_MAGIC: &[u8] = b"xgcode 1.0\n";

const MAGIC_FIELD_LEN: usize = 16;
const FIXED_WORDS: [u16; 8] = [1, 200, 20, 3, 60, 110, 220, 220];

/// Thumbnail width in pixels
pub const THUMB_WIDTH: u32 = 80;
/// Thumbnail height in pixels
pub const THUMB_HEIGHT: u32 = 60;

/// Decoded or to-be-written `.gx` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GxFile {
    /// Estimated print time in seconds
    pub print_seconds: u32,
    /// Estimated filament in millimetres
    pub filament_mm: u32,
    /// BMP thumbnail bytes
    pub thumbnail: Bytes,
    /// G-code bytes
    pub gcode: Bytes,
}

impl GxFile {
    /// Wrap G-code with a blank thumbnail and default estimates
    pub fn new(gcode: impl Into<Bytes>) -> Self {
        Self {
            print_seconds: 100,
            filament_mm: 100,
            thumbnail: blank_thumbnail(),
            gcode: gcode.into(),
        }
    }

    /// Set estimates, keeping the defaults for zero values
    pub fn with_estimates(mut self, seconds: Option<u32>, filament_mm: Option<u32>) -> Self {
        if let Some(s) = seconds.filter(|s| *s > 0) {
            self.print_seconds = s;
        }
        if let Some(f) = filament_mm.filter(|f| *f > 0) {
            self.filament_mm = f;
        }
        self
    }

    /// Encode the container
    pub fn to_bytes(&self) -> Bytes {
        let gcode_at = (GX_FILE_HEADER_LEN + self.thumbnail.len()) as u32;
        let mut w = FieldWriter::with_capacity(gcode_at as usize + self.gcode.len());
        w.bytes(GX_FILE_MAGIC)
            .zeros(MAGIC_FIELD_LEN - GX_FILE_MAGIC.len())
            .u32_le(GX_FILE_HEADER_LEN as u32)
            .u32_le(gcode_at)
            .u32_le(gcode_at)
            .u32_le(self.print_seconds)
            .u32_le(self.filament_mm)
            .u32_le(0);
        for word in FIXED_WORDS {
            w.u16_le(word);
        }
        w.u8(1).u8(1);
        w.bytes(&self.thumbnail).bytes(&self.gcode);
        w.finish()
    }

    /// Decode a container
    pub fn parse(buf: &[u8]) -> Result<Self, PacketError> {
        let mut r = FieldReader::new(buf);
        let magic = r.bytes(MAGIC_FIELD_LEN)?;
        if !magic.starts_with(GX_FILE_MAGIC) {
            return Err(PacketError::Malformed {
                offset: 0,
                reason: "missing xgcode magic".to_string(),
            });
        }
        let bmp_at = r.u32_le()? as usize;
        let gcode_at = r.u32_le()? as usize;
        let _gcode2_at = r.u32_le()?;
        let print_seconds = r.u32_le()?;
        let filament_mm = r.u32_le()?;
        if bmp_at > gcode_at || gcode_at > buf.len() {
            return Err(PacketError::Malformed {
                offset: 16,
                reason: format!(
                    "section offsets {}..{} outside {} byte file",
                    bmp_at,
                    gcode_at,
                    buf.len()
                ),
            });
        }
        Ok(Self {
            print_seconds,
            filament_mm,
            thumbnail: Bytes::copy_from_slice(&buf[bmp_at..gcode_at]),
            gcode: Bytes::copy_from_slice(&buf[gcode_at..]),
        })
    }
}

/// White 80x60 24-bit BMP
pub fn blank_thumbnail() -> Bytes {
    let row = (THUMB_WIDTH * 3).div_ceil(4) * 4;
    let pixels = row * THUMB_HEIGHT;
    let mut w = FieldWriter::with_capacity(54 + pixels as usize);
    w.bytes(b"BM")
        .u32_le(54 + pixels)
        .u32_le(0)
        .u32_le(54)
        .u32_le(40)
        .u32_le(THUMB_WIDTH)
        .u32_le(THUMB_HEIGHT)
        .u16_le(1)
        .u16_le(24)
        .u32_le(0)
        .u32_le(pixels)
        .u32_le(2835)
        .u32_le(2835)
        .u32_le(0)
        .u32_le(0);
    w.bytes(&vec![0xFF; pixels as usize]);
    w.finish()
}
