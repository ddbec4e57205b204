//! # PrintGate
//!
//! A print gateway for 3D printers:
//! - Marlin (and Grbl-style) printers on a serial port, driven by an
//!   ack-counted line engine
//! - GX and N2 network printers over their binary TCP protocols
//! - Other PrintGate instances, reached through their control channel
//!
//! ## Architecture
//!
//! PrintGate is organized as a workspace with multiple crates:
//!
//! 1. **printgate-core** - Error taxonomy, device status model, event bus
//! 2. **printgate-communication** - Links, framing, protocol engines, drivers,
//!    the control channel server and client
//! 3. **printgate-settings** - Configuration files and validation
//! 4. **printgate** - Main binary that integrates all crates

pub use printgate_communication::{
    ControlServer, ControllerHandle, DeviceInfo, DriverKind, PrintEntry, PrintReceipt,
    PrinterDriver, SerialController,
};
pub use printgate_core::{DeviceStatus, Error, EventBus, Result};
pub use printgate_settings::{Config, DeviceConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Initialize logging
///
/// Sets up structured logging on stderr with:
/// - RUST_LOG environment variable support, `info` when unset
/// - Human readable output, or one JSON object per line when `json` is set
///
/// Stdout stays free for command output and the stdin control channel.
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .json();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_names(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}
