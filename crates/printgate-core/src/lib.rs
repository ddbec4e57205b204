//! # PrintGate Core
//!
//! Core types shared by every PrintGate crate: the error taxonomy,
//! the normalized device status model, and the event bus used to fan
//! engine output out to control clients.

pub mod data;
pub mod error;
pub mod event_bus;

pub use data::{
    BufferStatus, DeviceState, DeviceStatus, Endstops, ErrorRecord, LinkStatus, PrintInfo,
    PrintRecord, TempPair, Temperatures,
};

pub use error::{
    DeviceFault, Error, PacketError, ProtocolError, Result, TransportError, UserError,
};

pub use event_bus::{
    ClientId, DeviceEvent, EventBus, EventBusConfig, EventCategory, GatewayEvent, PrintEvent,
};
