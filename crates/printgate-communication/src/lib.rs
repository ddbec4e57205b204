//! # PrintGate Communication
//!
//! Links, framing and protocol engines for PrintGate.
//! Serial and TCP links feed the Marlin line engine, the GX and N2
//! packet sessions, and the operator control channel.

pub mod codec;
pub mod communication;
pub mod control;
pub mod device;
pub mod driver;
pub mod firmware;

pub use communication::{
    list_ports, Connector, LineFramer, Link, SerialConnector, SerialPortInfo, StreamLink,
    TcpConnectionInfo, TcpConnector,
};
pub use control::{ControlCommand, ControlConfig, ControlServer, GridDriver};
pub use device::{ConnectionRegistry, Session, SessionConfig, SessionHandle, SessionProtocol};
pub use driver::{
    DeviceInfo, DriverApi, DriverKind, DriverRegistry, PrintEntry, PrintReceipt, PrinterDriver,
};
pub use firmware::gx::GxDriver;
pub use firmware::marlin::{ControllerConfig, ControllerHandle, EngineConfig, SerialController};
pub use firmware::n2::N2Driver;
