//! N2 packet protocol
//!
//! Control traffic runs on TCP 31625 as typed-section packets; uploads use a
//! second connection on the next port.

pub mod control;
pub mod driver;
pub mod message;
pub mod packet;
pub mod transfer;

pub use control::{N2Protocol, N2_CONTROL_PORT};
pub use driver::{N2Device, N2Driver};
pub use message::{HomeInfo, SettingsInfo};
pub use packet::{N2Command, N2Packet};
pub use transfer::{upload, TransferProgress, N2_CHUNK_SIZE, N2_TRANSFER_PORT};
