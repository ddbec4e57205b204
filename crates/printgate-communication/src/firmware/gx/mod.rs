//! GX socket protocol
//!
//! GX firmware takes M-code requests on TCP port 8899, either as `~`-prefixed
//! text lines or wrapped in binary packets, and answers each with lines
//! ending in `ok`. Files travel in a `.gx` container, uploaded in CRC-checked
//! 4096-byte chunks.

pub mod control;
pub mod driver;
pub mod file;
pub mod packet;
pub mod protocol;
pub mod status_parser;
pub mod upload;

pub use control::GxProtocol;
pub use driver::GxDriver;
pub use file::{blank_thumbnail, GxFile};
pub use packet::GxPacket;
pub use protocol::{GxCommand, GxFraming, GxReply, GxRequest, GX_PORT};
pub use upload::{chunk_frames, frame_chunk, GX_CHUNK_SIZE};
