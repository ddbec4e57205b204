//! Packet device sessions
//!
//! Shared plumbing for GX and N2 devices: a reconnecting half-duplex
//! session actor and the per-name connection cache.

pub mod registry;
pub mod session;

pub use registry::ConnectionRegistry;
pub use session::{Session, SessionConfig, SessionHandle, SessionProtocol, SessionState};
