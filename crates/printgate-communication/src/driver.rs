//! Printer driver contract
//!
//! A dispatch layer selects a driver by [`DriverKind`] and calls it with a
//! [`DeviceInfo`]. Drivers own their connections and keep them cached by
//! device name between calls.

use async_trait::async_trait;
use bytes::Bytes;
use printgate_core::{DeviceStatus, EventBus, Result, UserError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Protocol family of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// GX socket protocol
    Gx,
    /// N2 packet protocol
    N2,
    /// Another gateway's control channel
    Grid,
}

impl DriverKind {
    /// Driver name
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Gx => "gx",
            DriverKind::N2 => "n2",
            DriverKind::Grid => "grid",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverKind {
    type Err = UserError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gx" => Ok(DriverKind::Gx),
            "n2" => Ok(DriverKind::N2),
            "grid" => Ok(DriverKind::Grid),
            other => Err(UserError::InvalidArgument {
                reason: format!("unknown driver {:?}", other),
            }),
        }
    }
}

/// Addressable device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Unique device name, the connection cache key
    pub name: String,
    /// Host name or address
    pub host: String,
    /// Port, or the driver default
    pub port: Option<u16>,
    /// Protocol family
    pub kind: DriverKind,
    /// Protocol specific options
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl DeviceInfo {
    /// Device with default port and no options
    pub fn new(name: impl Into<String>, host: impl Into<String>, kind: DriverKind) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port: None,
            kind,
            options: BTreeMap::new(),
        }
    }

    /// Override the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set an option
    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// Port, falling back to `default`
    pub fn port_or(&self, default: u16) -> u16 {
        self.port.unwrap_or(default)
    }
}

/// File to print
#[derive(Debug, Clone, PartialEq)]
pub struct PrintEntry {
    /// File name
    pub name: String,
    /// File contents
    pub data: Bytes,
    /// Base64 PNG preview, if any
    pub image: Option<String>,
    /// Estimated print time in seconds
    pub estimated_time: Option<u64>,
    /// Estimated filament in millimetres
    pub filament_used: Option<f64>,
}

impl PrintEntry {
    /// Entry without preview or estimates
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            image: None,
            estimated_time: None,
            filament_used: None,
        }
    }
}

/// Outcome of a successful `send`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintReceipt {
    /// Device name
    pub device: String,
    /// Name the device stored the file under
    pub file: String,
    /// Bytes transferred
    pub bytes: usize,
}

/// Services handed to drivers on `init`
#[derive(Debug, Clone)]
pub struct DriverApi {
    /// Event bus for logs and device events
    pub bus: Arc<EventBus>,
}

impl DriverApi {
    /// Api backed by `bus`
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

/// One protocol family
#[async_trait]
pub trait PrinterDriver: Send + Sync {
    /// Driver name
    fn name(&self) -> &str;

    /// Receive shared services; called once before any other method
    fn init(&mut self, api: DriverApi);

    /// Transfer a file and start printing it
    async fn send(&self, device: &DeviceInfo, entry: PrintEntry) -> Result<PrintReceipt>;

    /// Cancel the running print
    async fn cancel(&self, device: &DeviceInfo) -> Result<()>;

    /// Current status
    async fn status(&self, device: &DeviceInfo) -> Result<DeviceStatus>;

    /// Close every cached connection
    async fn shutdown(&self) {}
}

/// Drivers keyed by kind
pub struct DriverRegistry {
    api: DriverApi,
    drivers: HashMap<DriverKind, Arc<dyn PrinterDriver>>,
}

impl DriverRegistry {
    /// Empty registry
    pub fn new(api: DriverApi) -> Self {
        Self {
            api,
            drivers: HashMap::new(),
        }
    }

    /// Registry with the GX, N2 and grid drivers
    pub fn with_defaults(api: DriverApi) -> Self {
        let mut registry = Self::new(api);
        registry.register(DriverKind::Gx, Box::new(crate::firmware::gx::GxDriver::new()));
        registry.register(DriverKind::N2, Box::new(crate::firmware::n2::N2Driver::new()));
        registry.register(DriverKind::Grid, Box::new(crate::control::GridDriver::new()));
        registry
    }

    /// Initialize and add a driver
    pub fn register(&mut self, kind: DriverKind, mut driver: Box<dyn PrinterDriver>) {
        driver.init(self.api.clone());
        self.drivers.insert(kind, Arc::from(driver));
    }

    /// Driver for a kind
    pub fn get(&self, kind: DriverKind) -> Result<Arc<dyn PrinterDriver>> {
        self.drivers.get(&kind).cloned().ok_or_else(|| {
            UserError::InvalidArgument {
                reason: format!("no driver registered for {}", kind),
            }
            .into()
        })
    }

    /// Driver for a device
    pub fn for_device(&self, device: &DeviceInfo) -> Result<Arc<dyn PrinterDriver>> {
        self.get(device.kind)
    }

    /// Close every driver's connections
    pub async fn shutdown(&self) {
        for driver in self.drivers.values() {
            driver.shutdown().await;
        }
    }
}
