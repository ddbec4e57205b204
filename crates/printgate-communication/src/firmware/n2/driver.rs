//! N2 printer driver

use super::control::{N2Protocol, N2_CONTROL_PORT};
use super::message::{cancel_print, start_print};
use super::transfer::upload;
use crate::communication::{Connector, TcpConnectionInfo, TcpConnector};
use crate::device::{ConnectionRegistry, Session, SessionConfig, SessionHandle};
use crate::driver::{DeviceInfo, DriverApi, PrintEntry, PrintReceipt, PrinterDriver};
use async_trait::async_trait;
use parking_lot::Mutex;
use printgate_core::{DeviceStatus, EventBus, Result, TransportError, UserError};
use std::sync::Arc;
use std::time::Duration;

/// Control session plus the file it last started
#[derive(Debug)]
pub struct N2Device {
    session: SessionHandle<N2Protocol>,
    filename: Mutex<Option<String>>,
}

impl N2Device {
    /// Control session
    pub fn session(&self) -> &SessionHandle<N2Protocol> {
        &self.session
    }

    /// File the last print was started with
    pub fn filename(&self) -> Option<String> {
        self.filename.lock().clone()
    }
}

/// Driver for N2 devices
pub struct N2Driver {
    bus: Arc<EventBus>,
    config: SessionConfig,
    devices: ConnectionRegistry<N2Device>,
}

impl Default for N2Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl N2Driver {
    /// Driver polling every 3 seconds
    pub fn new() -> Self {
        Self::with_config(SessionConfig {
            poll_interval: Some(Duration::from_secs(3)),
            ..SessionConfig::default()
        })
    }

    /// Driver with custom session timing
    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            bus: Arc::new(EventBus::new()),
            config,
            devices: ConnectionRegistry::new(),
        }
    }

    /// Transfer port: the `transfer_port` option or control port + 1
    pub fn transfer_port(device: &DeviceInfo) -> u16 {
        device
            .options
            .get("transfer_port")
            .and_then(|p| p.parse().ok())
            .unwrap_or_else(|| device.port_or(N2_CONTROL_PORT).wrapping_add(1))
    }

    fn connect_budget(&self) -> Duration {
        (self.config.retry_delay + self.config.idle_timeout) * self.config.connect_attempts.max(1)
    }

    /// Cached device whose control handshake has completed
    async fn ready_device(&self, device: &DeviceInfo) -> Result<Arc<N2Device>> {
        let n2 = self.device(device).await?;
        let budget = self.connect_budget();
        match tokio::time::timeout(budget, n2.session.wait_ready()).await {
            Ok(Ok(())) => Ok(n2),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::ConnectTimeout {
                target: format!("{}:{}", device.host, device.port_or(N2_CONTROL_PORT)),
                timeout_ms: budget.as_millis() as u64,
            }
            .into()),
        }
    }

    async fn device(&self, device: &DeviceInfo) -> Result<Arc<N2Device>> {
        if let Some(existing) = self.devices.get(&device.name) {
            if !existing.session.is_closed() {
                return Ok(existing);
            }
            self.devices.remove(&device.name);
        }
        let name = device.name.clone();
        let info = TcpConnectionInfo::new(device.host.clone(), device.port_or(N2_CONTROL_PORT));
        let config = self.config.clone();
        let bus = self.bus.clone();
        self.devices
            .get_or_connect(&device.name, move || async move {
                let (session, _task) = Session::spawn(
                    name,
                    N2Protocol::new(),
                    Arc::new(TcpConnector::new(info)),
                    config,
                    bus,
                );
                Ok(Arc::new(N2Device {
                    session,
                    filename: Mutex::new(None),
                }))
            })
            .await
    }
}

#[async_trait]
impl PrinterDriver for N2Driver {
    fn name(&self) -> &str {
        "n2"
    }

    fn init(&mut self, api: DriverApi) {
        self.bus = api.bus;
    }

    async fn send(&self, device: &DeviceInfo, entry: PrintEntry) -> Result<PrintReceipt> {
        let n2 = self.ready_device(device).await?;

        let connector = TcpConnector::new(TcpConnectionInfo::new(
            device.host.clone(),
            Self::transfer_port(device),
        ));
        let mut link = connector.connect().await?;
        let bus = self.bus.clone();
        let bytes = entry.data.len();
        let location = upload(
            link.as_mut(),
            &entry.name,
            entry.data,
            self.config.idle_timeout,
            |p| {
                bus.log(format!(
                    "*** n2 upload {:.2}% {} kB/s {:.2}s ***",
                    p.progress, p.rate, p.time
                ));
            },
        )
        .await?;

        n2.session.request(start_print(&location)).await?;
        *n2.filename.lock() = Some(location.clone());
        tracing::info!("n2 {} printing {}", device.name, location);

        Ok(PrintReceipt {
            device: device.name.clone(),
            file: location,
            bytes,
        })
    }

    async fn cancel(&self, device: &DeviceInfo) -> Result<()> {
        let n2 = self.ready_device(device).await?;
        let filename = n2.filename().ok_or_else(|| UserError::InvalidArgument {
            reason: format!("no print started on {}", device.name),
        })?;
        n2.session.request(cancel_print(&filename)).await?;
        Ok(())
    }

    async fn status(&self, device: &DeviceInfo) -> Result<DeviceStatus> {
        Ok(self.device(device).await?.session.status())
    }

    async fn shutdown(&self) {
        for device in self.devices.drain() {
            device.session.close().await;
        }
    }
}
