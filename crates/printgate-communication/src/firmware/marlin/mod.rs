//! Marlin serial G-code protocol
//!
//! Ack-counted flow control over a line link: at most `bufmax` commands are
//! unacknowledged at any time, replies are matched to sends in FIFO order,
//! and a `start` banner invalidates everything in flight.
//!
//! - [`engine`]: the sans-IO state machine
//! - [`controller`]: the tokio task that drives it over a [`Link`](crate::Link)

pub mod checksum;
pub mod command;
pub mod controller;
pub mod engine;
pub mod history;
pub mod queue;
pub mod response_parser;

pub use checksum::{frame_line, xor_checksum, LineNumberer};
pub use command::{AckHook, CommandFlags, CommandRecord};
pub use controller::{ControllerCommand, ControllerConfig, ControllerHandle, SerialController};
pub use engine::{EngineAction, EngineConfig, LinkState, SerialEngine};
pub use history::PrintHistory;
pub use queue::CommandQueue;
