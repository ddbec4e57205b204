//! Serial port communication implementation
//!
//! Provides serial port discovery for `--probe` and an async [`Link`] over
//! a USB/RS-232 port for Marlin-style printers.
//!
//! The `serialport` crate is blocking, so each open port gets a reader
//! thread that forwards chunks into a tokio channel. Writes go through a
//! cloned handle on the blocking pool.

use super::{Connector, Link};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use printgate_core::{Error, Result, TransportError};
use serde::Serialize;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Information about an available serial port
#[derive(Debug, Clone, Serialize)]
pub struct SerialPortInfo {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port_name: String,

    /// Port description (e.g., "USB Serial Port")
    pub description: String,

    /// Manufacturer name if available
    pub manufacturer: Option<String>,

    /// Serial number if available
    pub serial_number: Option<String>,

    /// USB vendor ID if applicable
    pub vid: Option<u16>,

    /// USB product ID if applicable
    pub pid: Option<u16>,
}

impl SerialPortInfo {
    /// Create a new port info
    pub fn new(port_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            description: description.into(),
            manufacturer: None,
            serial_number: None,
            vid: None,
            pid: None,
        }
    }

    /// Set manufacturer
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// Set serial number
    pub fn with_serial_number(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    /// Set USB IDs
    pub fn with_usb_ids(mut self, vid: u16, pid: u16) -> Self {
        self.vid = Some(vid);
        self.pid = Some(pid);
        self
    }

    /// One comma separated line, as printed by `probe`
    pub fn summary(&self) -> String {
        let opt = |v: &Option<String>| v.clone().unwrap_or_else(|| "null".to_string());
        let hex = |v: Option<u16>| v.map(|v| format!("{:04x}", v)).unwrap_or_else(|| "null".to_string());
        [
            self.port_name.clone(),
            self.description.clone(),
            opt(&self.manufacturer),
            hex(self.vid),
            hex(self.pid),
            opt(&self.serial_number),
        ]
        .join(", ")
    }
}

/// List serial ports on the system
///
/// With `printers_only`, keeps names that match USB printer bridges:
/// - Windows: COM* (e.g., COM1, COM3)
/// - Linux: /dev/ttyUSB*, /dev/ttyACM*
/// - macOS: /dev/cu.usbserial-*, /dev/cu.usbmodem*
pub fn list_ports(printers_only: bool) -> Result<Vec<SerialPortInfo>> {
    match serialport::available_ports() {
        Ok(ports) => Ok(ports
            .iter()
            .filter(|port| !printers_only || is_printer_port(&port.port_name))
            .map(|port| {
                let info = SerialPortInfo::new(&port.port_name, get_port_description(port));
                match &port.port_type {
                    serialport::SerialPortType::UsbPort(usb_info) => {
                        let mut info = info.with_usb_ids(usb_info.vid, usb_info.pid);
                        if let Some(ref mfg) = usb_info.manufacturer {
                            info = info.with_manufacturer(mfg);
                        }
                        if let Some(ref serial) = usb_info.serial_number {
                            info = info.with_serial_number(serial);
                        }
                        info
                    }
                    _ => info,
                }
            })
            .collect()),
        Err(e) => {
            tracing::error!("Failed to enumerate serial ports: {}", e);
            Err(Error::other(format!("Failed to enumerate ports: {}", e)))
        }
    }
}

/// Check if a port name matches a USB printer bridge
pub fn is_printer_port(port_name: &str) -> bool {
    if let Some(num) = port_name.strip_prefix("COM") {
        return !num.is_empty() && num.chars().all(|c| c.is_ascii_digit());
    }
    port_name.starts_with("/dev/ttyUSB")
        || port_name.starts_with("/dev/ttyACM")
        || port_name.starts_with("/dev/cu.usbserial-")
        || port_name.starts_with("/dev/cu.usbmodem")
}

/// Get a user-friendly description for a port
fn get_port_description(port: &serialport::SerialPortInfo) -> String {
    match &port.port_type {
        serialport::SerialPortType::UsbPort(usb_info) => {
            format!(
                "USB {} {}",
                usb_info.manufacturer.as_deref().unwrap_or("Device"),
                usb_info.product.as_deref().unwrap_or("Serial Port")
            )
        }
        serialport::SerialPortType::BluetoothPort => "Bluetooth Serial".to_string(),
        serialport::SerialPortType::PciPort => "PCI Serial".to_string(),
        _ => "Serial Port".to_string(),
    }
}

type PortHandle = Arc<Mutex<Box<dyn serialport::SerialPort>>>;

/// Open serial port as an async link
pub struct SerialLink {
    path: String,
    writer: PortHandle,
    incoming: mpsc::Receiver<io::Result<Vec<u8>>>,
    pending: BytesMut,
    stop: Arc<AtomicBool>,
}

impl SerialLink {
    /// Open `path` at `baud`, 8N1, no flow control
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let open_failed = |e: &dyn std::fmt::Display| TransportError::OpenFailed {
            target: path.to_string(),
            reason: e.to_string(),
        };
        let port = serialport::new(path, baud)
            .timeout(Duration::from_millis(10))
            .open()
            .map_err(|e| {
                tracing::warn!("Failed to open serial port {}: {}", path, e);
                open_failed(&e)
            })?;
        let mut reader = port.try_clone().map_err(|e| open_failed(&e))?;

        let (tx, incoming) = mpsc::channel(64);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        std::thread::Builder::new()
            .name(format!("serial-rx {}", path))
            .spawn(move || {
                let mut buf = [0u8; 1024];
                while !stop_flag.load(Ordering::Relaxed) {
                    match reader.read(&mut buf) {
                        Ok(0) => continue,
                        Ok(n) => {
                            if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                        Err(e) => {
                            tx.blocking_send(Err(e)).ok();
                            break;
                        }
                    }
                }
            })?;

        tracing::info!("Opened serial port {} at {} baud", path, baud);
        Ok(Self {
            path: path.to_string(),
            writer: Arc::new(Mutex::new(port)),
            incoming,
            pending: BytesMut::new(),
            stop,
        })
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl Link for SerialLink {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.pending.is_empty() {
            match self.incoming.recv().await {
                Some(Ok(chunk)) => self.pending.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let writer = self.writer.clone();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut port = writer.lock();
            port.write_all(&data)?;
            port.flush()
        })
        .await
        .map_err(|e| Error::other(format!("serial writer task failed: {}", e)))?
        .map_err(|e| {
            TransportError::WriteFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        self.incoming.close();
        Ok(())
    }

    fn target(&self) -> &str {
        &self.path
    }
}

/// Reopens one serial port on demand
#[derive(Debug, Clone)]
pub struct SerialConnector {
    /// Device path
    pub path: String,
    /// Baud rate
    pub baud: u32,
}

impl SerialConnector {
    /// Create a connector for `path` at `baud`
    pub fn new(path: impl Into<String>, baud: u32) -> Self {
        Self {
            path: path.into(),
            baud,
        }
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&self) -> Result<Box<dyn Link>> {
        let path = self.path.clone();
        let baud = self.baud;
        let link = tokio::task::spawn_blocking(move || SerialLink::open(&path, baud))
            .await
            .map_err(|e| Error::other(format!("serial open task failed: {}", e)))??;
        Ok(Box::new(link))
    }

    fn target(&self) -> String {
        self.path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printer_port_patterns() {
        assert!(is_printer_port("/dev/ttyUSB0"));
        assert!(is_printer_port("/dev/ttyACM1"));
        assert!(is_printer_port("COM12"));
        assert!(is_printer_port("/dev/cu.usbmodem14101"));
        assert!(!is_printer_port("COM"));
        assert!(!is_printer_port("/dev/ttyS0"));
    }

    #[test]
    fn test_summary_line() {
        let info = SerialPortInfo::new("/dev/ttyACM0", "USB Device Serial Port")
            .with_usb_ids(0x2341, 0x0042)
            .with_manufacturer("Arduino");
        assert_eq!(
            info.summary(),
            "/dev/ttyACM0, USB Device Serial Port, Arduino, 2341, 0042, null"
        );
    }
}
