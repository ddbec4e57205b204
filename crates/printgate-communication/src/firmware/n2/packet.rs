//! N2 binary packet codec
//!
//! ```text
//! u32 length | u32 type | u8 version | u8 side | u32 magic1 | u32 magic2
//! u16 nbytes | u16 nshorts | u16 nints | u16 nlongs | u16 nstrings
//! bytes | shorts | ints | longs | strings
//! ```
//!
//! Numbers are little-endian. Each string is a u32 byte length followed by
//! that many bytes, normally UTF-16LE text. File chunks reuse the string
//! section for raw data, so strings are kept as byte blocks here and decoded
//! on access.

use crate::codec::{FieldReader, FieldWriter};
use bytes::Bytes;
use printgate_core::PacketError;
use std::fmt;

/// Bytes before the first section
pub const N2_HEADER_LEN: usize = 28;

/// Magic words sent by this client; received values are kept as-is
pub const N2_MAGIC: u32 = 0xFFFF_FFFF;

/// Known packet types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum N2Command {
    /// Client string command (`home.getinfo`, `setting.getinfo`)
    ClientString,
    /// Server home info
    HomeInfo,
    /// Client G-code line
    ClientGcode,
    /// Client directory query
    DirQuery,
    /// Server directory info
    DirInfo,
    /// Client file query
    FileQuery,
    /// Server file info
    FileInfo,
    /// Client start or cancel print
    StartPrint,
    /// Server print acknowledgment
    PrintAck,
    /// Server settings info
    SettingsInfo,
    /// Client file transfer begin
    TransferBegin,
    /// Server transfer ready
    TransferReady,
    /// Client file chunk, server chunk ack
    TransferChunk,
}

impl N2Command {
    /// Every known command
    pub const ALL: [N2Command; 13] = [
        N2Command::ClientString,
        N2Command::HomeInfo,
        N2Command::ClientGcode,
        N2Command::DirQuery,
        N2Command::DirInfo,
        N2Command::FileQuery,
        N2Command::FileInfo,
        N2Command::StartPrint,
        N2Command::PrintAck,
        N2Command::SettingsInfo,
        N2Command::TransferBegin,
        N2Command::TransferReady,
        N2Command::TransferChunk,
    ];

    /// Wire id
    pub fn id(&self) -> u32 {
        match self {
            N2Command::ClientString => 0x01,
            N2Command::HomeInfo => 0x02,
            N2Command::ClientGcode => 0x03,
            N2Command::DirQuery => 0x04,
            N2Command::DirInfo => 0x05,
            N2Command::FileQuery => 0x06,
            N2Command::FileInfo => 0x07,
            N2Command::StartPrint => 0x08,
            N2Command::PrintAck => 0x09,
            N2Command::SettingsInfo => 0x0a,
            N2Command::TransferBegin => 0x0c,
            N2Command::TransferReady => 0x0d,
            N2Command::TransferChunk => 0x0e,
        }
    }

    /// Look up a wire id
    pub fn from_id(id: u32) -> Result<Self, PacketError> {
        Self::ALL
            .into_iter()
            .find(|c| c.id() == id)
            .ok_or(PacketError::UnrecognizedCommand { id })
    }
}

impl fmt::Display for N2Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02x})", self, self.id())
    }
}

/// One N2 packet
#[derive(Clone, PartialEq, Eq)]
pub struct N2Packet {
    /// Packet type
    pub kind: u32,
    /// Protocol version
    pub version: u8,
    /// 0 = client, 1 = server
    pub side: u8,
    /// First magic word
    pub magic1: u32,
    /// Second magic word
    pub magic2: u32,
    /// Byte section
    pub bytes: Vec<u8>,
    /// Short section
    pub shorts: Vec<u16>,
    /// Int section
    pub ints: Vec<u32>,
    /// Long section
    pub longs: Vec<u64>,
    /// String section as raw blocks
    pub strings: Vec<Bytes>,
}

impl fmt::Debug for N2Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("N2Packet")
            .field("kind", &format_args!("0x{:02x}", self.kind))
            .field("side", &self.side)
            .field("magic", &format_args!("{:#010x}/{:#010x}", self.magic1, self.magic2))
            .field("bytes", &self.bytes)
            .field("shorts", &self.shorts)
            .field("ints", &self.ints)
            .field("longs", &self.longs)
            .field("strings", &self.strings.iter().map(Bytes::len).collect::<Vec<_>>())
            .finish()
    }
}

impl Default for N2Packet {
    fn default() -> Self {
        Self {
            kind: 0,
            version: 1,
            side: 0,
            magic1: N2_MAGIC,
            magic2: N2_MAGIC,
            bytes: Vec::new(),
            shorts: Vec::new(),
            ints: Vec::new(),
            longs: Vec::new(),
            strings: Vec::new(),
        }
    }
}

impl N2Packet {
    /// Empty client packet of a known type
    pub fn new(command: N2Command) -> Self {
        Self {
            kind: command.id(),
            ..Self::default()
        }
    }

    /// Add a byte
    pub fn with_byte(mut self, v: u8) -> Self {
        self.bytes.push(v);
        self
    }

    /// Add an int
    pub fn with_int(mut self, v: u32) -> Self {
        self.ints.push(v);
        self
    }

    /// Add a long
    pub fn with_long(mut self, v: u64) -> Self {
        self.longs.push(v);
        self
    }

    /// Add a UTF-16LE string
    pub fn with_string(mut self, s: &str) -> Self {
        self.strings.push(utf16le_encode(s));
        self
    }

    /// Add a raw block to the string section
    pub fn with_block(mut self, data: Bytes) -> Self {
        self.strings.push(data);
        self
    }

    /// Known command of this packet
    pub fn command(&self) -> Result<N2Command, PacketError> {
        N2Command::from_id(self.kind)
    }

    /// String `index` decoded from UTF-16LE, empty when absent
    pub fn string(&self, index: usize) -> String {
        self.strings
            .get(index)
            .map(|b| utf16le_decode(b))
            .unwrap_or_default()
    }

    /// Int `index`, zero when absent
    pub fn int(&self, index: usize) -> u32 {
        self.ints.get(index).copied().unwrap_or(0)
    }

    /// Int `index` reinterpreted as an IEEE-754 float
    pub fn float(&self, index: usize) -> f32 {
        f32::from_bits(self.int(index))
    }

    /// Long `index`, zero when absent
    pub fn long(&self, index: usize) -> u64 {
        self.longs.get(index).copied().unwrap_or(0)
    }

    /// Encoded size
    pub fn encoded_len(&self) -> usize {
        N2_HEADER_LEN
            + self.bytes.len()
            + self.shorts.len() * 2
            + self.ints.len() * 4
            + self.longs.len() * 8
            + self.strings.iter().map(|s| 4 + s.len()).sum::<usize>()
    }

    /// Encode with the length field filled in
    pub fn encode(&self) -> Bytes {
        let mut w = FieldWriter::with_capacity(self.encoded_len());
        w.u32_le(0)
            .u32_le(self.kind)
            .u8(self.version)
            .u8(self.side)
            .u32_le(self.magic1)
            .u32_le(self.magic2)
            .u16_le(self.bytes.len() as u16)
            .u16_le(self.shorts.len() as u16)
            .u16_le(self.ints.len() as u16)
            .u16_le(self.longs.len() as u16)
            .u16_le(self.strings.len() as u16);
        w.bytes(&self.bytes);
        for v in &self.shorts {
            w.u16_le(*v);
        }
        for v in &self.ints {
            w.u32_le(*v);
        }
        for v in &self.longs {
            w.u64_le(*v);
        }
        for s in &self.strings {
            w.u32_le(s.len() as u32).bytes(s);
        }
        w.finish_with_length()
    }

    /// Decode one packet from the front of `buf`
    ///
    /// Returns the packet and the bytes it used. [`PacketError::Incomplete`]
    /// means the frame has not fully arrived; [`PacketError::Malformed`]
    /// means a section runs past the declared length. Unknown types decode
    /// structurally; check [`N2Packet::command`].
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), PacketError> {
        if buf.len() < 4 {
            return Err(PacketError::Incomplete {
                needed: 4,
                available: buf.len(),
            });
        }
        let mut r = FieldReader::new(buf);
        let total = r.u32_le()? as usize + 4;
        if total < N2_HEADER_LEN {
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
        let magic1 = r.u32_le()?;
        let magic2 = r.u32_le()?;
        let mut counts = [0usize; 5];
        for count in &mut counts {
            *count = r.u16_le()? as usize;
        }

        let bytes = r.bytes(counts[0])?.to_vec();
        let shorts = (0..counts[1]).map(|_| r.u16_le()).collect::<Result<_, _>>()?;
        let ints = (0..counts[2]).map(|_| r.u32_le()).collect::<Result<_, _>>()?;
        let longs = (0..counts[3]).map(|_| r.u64_le()).collect::<Result<_, _>>()?;
        let mut strings = Vec::with_capacity(counts[4]);
        for _ in 0..counts[4] {
            let len = r.u32_le()? as usize;
            strings.push(Bytes::copy_from_slice(r.bytes(len)?));
        }

        Ok((
            Self {
                kind,
                version,
                side,
                magic1,
                magic2,
                bytes,
                shorts,
                ints,
                longs,
                strings,
            },
            total,
        ))
    }
}

/// Encode text as UTF-16LE
pub fn utf16le_encode(s: &str) -> Bytes {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect::<Vec<_>>().into()
}

/// Decode UTF-16LE, replacing bad units; a trailing odd byte is dropped
pub fn utf16le_decode(data: &[u8]) -> String {
    let units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

/// Read a big-endian length-prefixed UTF-16LE string at `offset`
///
/// The transfer-ready reply carries the stored file location this way.
pub fn length_string_at(frame: &[u8], offset: usize) -> Result<String, PacketError> {
    let mut r = FieldReader::new(frame);
    r.seek(offset)?;
    let len = r.u32_be()? as usize;
    Ok(utf16le_decode(r.bytes(len)?))
}
