//! Gateway configuration
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats, chosen by file extension.
//!
//! Configuration is organized into logical sections:
//! - Serial settings (port, baud, flow control, boot and reconnect timing)
//! - Control channel settings (listen address, stdin, file directory, history)
//! - Named network devices (GX, N2 and remote gateways)

use crate::error::{ConfigError, SettingsError, SettingsResult};
use printgate_communication::firmware::marlin::engine::{
    DEFAULT_AUTO_COMMANDS, DEFAULT_SAFETY_SEQUENCE,
};
use printgate_communication::{
    ControlConfig, ControllerConfig, DeviceInfo, DriverKind, EngineConfig, SessionConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the platform config dir
pub const APP_DIR: &str = "printgate";

/// Config file name inside [`APP_DIR`]
pub const CONFIG_FILE: &str = "printgate.toml";

/// Default control channel port
pub const DEFAULT_LISTEN_PORT: u16 = 8899;

/// Serial printer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Device path; `None` picks the first printer-looking port
    pub port: Option<String>,
    /// Baud rate
    pub baud: u32,
    /// Unacknowledged commands allowed in flight
    pub bufmax: usize,
    /// Send `N<seq> ... *<sum>` framed lines
    pub checksum: bool,
    /// Grbl dialect
    pub grbl: bool,
    /// Treat `Unknown command:` as fatal
    pub fragile: bool,
    /// Spool prints to the device SD card
    pub sdspool: bool,
    /// Log every streamed print line
    pub verbose: bool,
    /// Telemetry poll interval in milliseconds; 0 disables polling
    pub auto_ms: u64,
    /// Wait for the `start` banner this long before assuming ready
    pub boot_timeout_ms: u64,
    /// Delay before reopening a dropped port
    pub reconnect_ms: u64,
    /// Firmware flash command; `{port}` and `{hex}` are substituted
    pub flash_command: Option<String>,
    /// Hex file used by `*update` without an argument
    pub hexfile: Option<PathBuf>,
    /// Telemetry queries sent by the poller
    pub auto_commands: Vec<String>,
    /// Commands replayed on the next boot after an abort
    pub safety_sequence: Vec<String>,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115200,
            bufmax: 8,
            checksum: false,
            grbl: false,
            fragile: false,
            sdspool: false,
            verbose: false,
            auto_ms: 1000,
            boot_timeout_ms: 5000,
            reconnect_ms: 1000,
            flash_command: None,
            hexfile: None,
            auto_commands: DEFAULT_AUTO_COMMANDS.iter().map(|s| s.to_string()).collect(),
            safety_sequence: DEFAULT_SAFETY_SEQUENCE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl SerialSettings {
    /// Engine tuning for these settings
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            bufmax: self.bufmax,
            checksum: self.checksum,
            grbl: self.grbl,
            sdspool: self.sdspool,
            fragile: self.fragile,
            verbose: self.verbose,
            auto_poll: self.auto_ms > 0,
            auto_interval: Duration::from_millis(self.auto_ms.max(1)),
            auto_commands: self.auto_commands.clone(),
            safety_sequence: self.safety_sequence.clone(),
            ..EngineConfig::default()
        }
    }

    /// Controller settings, appending finished prints to `history`
    pub fn controller_config(&self, history: Option<PathBuf>) -> ControllerConfig {
        ControllerConfig {
            engine: self.engine_config(),
            reconnect_interval: Duration::from_millis(self.reconnect_ms),
            boot_timeout: Duration::from_millis(self.boot_timeout_ms),
            history,
            flash_command: self.flash_command.clone(),
            default_hexfile: self.hexfile.clone(),
        }
    }
}

/// Control channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSettings {
    /// Bind address
    pub bind: String,
    /// TCP port; `None` disables the listener
    pub listen: Option<u16>,
    /// Also accept commands on stdin
    pub stdin: bool,
    /// Upload and print directory
    pub filedir: PathBuf,
    /// Print history file (JSON lines)
    pub history: Option<PathBuf>,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            listen: Some(DEFAULT_LISTEN_PORT),
            stdin: false,
            filedir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("gcode"),
            history: None,
        }
    }
}

impl ControlSettings {
    /// Listener settings for the control server
    pub fn control_config(&self) -> SettingsResult<ControlConfig> {
        let listen = match self.listen {
            Some(port) => Some(
                format!("{}:{}", self.bind, port)
                    .parse::<SocketAddr>()
                    .map_err(|e| ConfigError::ValueOutOfRange {
                        key: "control.bind".to_string(),
                        value: format!("{} ({})", self.bind, e),
                    })?,
            ),
            None => None,
        };
        Ok(ControlConfig {
            listen,
            stdin: self.stdin,
            filedir: self.filedir.clone(),
        })
    }
}

/// One network device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique name
    pub name: String,
    /// Driver
    pub kind: DriverKind,
    /// Host name or address
    pub host: String,
    /// Port; the driver default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Status poll period in milliseconds; 0 disables polling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_ms: Option<u64>,
    /// Reply timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_ms: Option<u64>,
    /// Delay between connect attempts in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_ms: Option<u64>,
    /// Connect attempts per cycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Driver specific options (`framing`, `transfer_port`, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl DeviceConfig {
    /// Device with driver defaults
    pub fn new(name: impl Into<String>, kind: DriverKind, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            host: host.into(),
            port: None,
            poll_ms: None,
            idle_ms: None,
            retry_ms: None,
            attempts: None,
            options: BTreeMap::new(),
        }
    }

    /// Address handed to the driver
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.name.clone(),
            host: self.host.clone(),
            port: self.port,
            kind: self.kind,
            options: self.options.clone(),
        }
    }

    /// Session timing: `base` with this device's overrides
    pub fn session_config(&self, base: SessionConfig) -> SessionConfig {
        let mut config = base;
        if let Some(ms) = self.poll_ms {
            config.poll_interval = (ms > 0).then(|| Duration::from_millis(ms));
        }
        if let Some(ms) = self.idle_ms {
            config.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.retry_ms {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.attempts {
            config.connect_attempts = attempts;
        }
        config
    }
}

/// Complete gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Serial printer
    pub serial: SerialSettings,
    /// Control channel
    pub control: ControlSettings,
    /// Network devices
    pub devices: Vec<DeviceConfig>,
}

enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> SettingsResult<Format> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(ConfigError::UnsupportedFormat(other.unwrap_or("").to_string()).into()),
    }
}

fn out_of_range(key: impl Into<String>, value: impl ToString) -> SettingsError {
    ConfigError::ValueOutOfRange {
        key: key.into(),
        value: value.to_string(),
    }
    .into()
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// `<config dir>/printgate/printgate.toml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join(CONFIG_FILE)
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::LoadError {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path`, or defaults when it does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| SettingsError::ConfigDirectory(format!("{}: {}", dir.display(), e)))?;
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        let serial = &self.serial;
        if serial.baud == 0 {
            return Err(out_of_range("serial.baud", serial.baud));
        }
        if serial.bufmax == 0 {
            return Err(out_of_range("serial.bufmax", serial.bufmax));
        }
        if serial.boot_timeout_ms == 0 {
            return Err(out_of_range("serial.boot_timeout_ms", serial.boot_timeout_ms));
        }
        if serial.reconnect_ms == 0 {
            return Err(out_of_range("serial.reconnect_ms", serial.reconnect_ms));
        }
        if self.control.listen == Some(0) {
            return Err(out_of_range("control.listen", 0));
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(ConfigError::MissingKey("devices.name".to_string()).into());
            }
            if device.host.trim().is_empty() {
                return Err(ConfigError::MissingKey(format!("devices.{}.host", device.name)).into());
            }
            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::DuplicateDevice(device.name.clone()).into());
            }
            if device.idle_ms == Some(0) {
                return Err(out_of_range(format!("devices.{}.idle_ms", device.name), 0));
            }
            if device.attempts == Some(0) {
                return Err(out_of_range(format!("devices.{}.attempts", device.name), 0));
            }
        }

        Ok(())
    }

    /// Device by name
    pub fn device(&self, name: &str) -> SettingsResult<&DeviceConfig> {
        self.devices
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| ConfigError::UnknownDevice(name.to_string()).into())
    }
}
