//! # Event Bus Module
//!
//! Fan-out from device engines to control clients.
//!
//! - Engines publish log lines, replies and lifecycle events
//! - Each control client holds a broadcast receiver and filters what it shows
//! - Recent log lines are retained for clients that start monitoring late
//!
//! ```rust,ignore
//! use printgate_core::event_bus::{EventBus, GatewayEvent};
//!
//! let bus = std::sync::Arc::new(EventBus::new());
//! let mut events = bus.receiver();
//! bus.log("--> M105");
//! assert_eq!(events.recv().await?, GatewayEvent::log("--> M105"));
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
