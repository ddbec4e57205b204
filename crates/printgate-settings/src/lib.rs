//! PrintGate Settings Crate
//!
//! Handles gateway configuration: file formats, validation, and the mapping
//! from settings onto the runtime configs of the communication crate.

pub mod config;
pub mod error;

pub use config::{
    Config, ControlSettings, DeviceConfig, SerialSettings, APP_DIR, CONFIG_FILE,
    DEFAULT_LISTEN_PORT,
};
pub use error::{ConfigError, ConfigResult, SettingsError, SettingsResult};
