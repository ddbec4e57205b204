//! Device protocol families
//!
//! - [`marlin`]: serial G-code with ack counted flow control
//! - [`gx`]: GX socket protocol and `.gx` files
//! - [`n2`]: N2 typed-section packets and chunked upload

pub mod gx;
pub mod marlin;
pub mod n2;
