//! Operator control channel
//!
//! The server side exposes one serial controller to TCP and stdin clients.
//! The client side ([`GridDriver`]) drives a remote gateway's server.

pub mod client;
pub mod command;
pub mod files;
pub mod server;

pub use client::{GridDriver, GridProtocol, GridReply, GridRequest, DEFAULT_CONTROL_PORT};
pub use command::ControlCommand;
pub use files::{list_files, FileEntry};
pub use server::{evt, ControlConfig, ControlServer, ExecOutput};
