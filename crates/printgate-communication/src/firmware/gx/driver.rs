//! GX printer driver

use super::control::GxProtocol;
use super::file::GxFile;
use super::protocol::{GxCommand, GxFraming, GxRequest, GX_PORT};
use super::upload::{chunk_frames, device_path};
use crate::communication::{TcpConnectionInfo, TcpConnector};
use crate::device::{ConnectionRegistry, Session, SessionConfig, SessionHandle};
use crate::driver::{DeviceInfo, DriverApi, PrintEntry, PrintReceipt, PrinterDriver};
use async_trait::async_trait;
use printgate_core::{DeviceStatus, Error, EventBus, Result, TransportError, UserError};
use std::sync::Arc;
use std::time::Duration;

type GxSession = SessionHandle<GxProtocol>;

/// Driver for GX devices
pub struct GxDriver {
    bus: Arc<EventBus>,
    config: SessionConfig,
    sessions: ConnectionRegistry<GxSession>,
}

impl Default for GxDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl GxDriver {
    /// Driver with default session timing
    pub fn new() -> Self {
        Self::with_config(SessionConfig {
            poll_interval: Some(Duration::from_secs(2)),
            ..SessionConfig::default()
        })
    }

    /// Driver with custom session timing
    pub fn with_config(config: SessionConfig) -> Self {
        Self {
            bus: Arc::new(EventBus::new()),
            config,
            sessions: ConnectionRegistry::new(),
        }
    }

    fn framing(device: &DeviceInfo) -> GxFraming {
        match device.options.get("framing").map(String::as_str) {
            Some("packet") => GxFraming::Packet,
            _ => GxFraming::Text,
        }
    }

    fn connect_budget(&self) -> Duration {
        (self.config.retry_delay + self.config.idle_timeout) * self.config.connect_attempts.max(1)
    }

    async fn session(&self, device: &DeviceInfo) -> Result<Arc<GxSession>> {
        if let Some(existing) = self.sessions.get(&device.name) {
            if !existing.is_closed() {
                return Ok(existing);
            }
            self.sessions.remove(&device.name);
        }
        let budget = self.connect_budget();
        let name = device.name.clone();
        let host = device.host.clone();
        let info = TcpConnectionInfo::new(host.clone(), device.port_or(GX_PORT));
        let framing = Self::framing(device);
        let config = self.config.clone();
        let bus = self.bus.clone();
        self.sessions
            .get_or_connect(&device.name, move || async move {
                let (handle, _task) = Session::spawn(
                    name.clone(),
                    GxProtocol::new(framing),
                    Arc::new(TcpConnector::new(info)),
                    config,
                    bus,
                );
                match tokio::time::timeout(budget, handle.wait_ready()).await {
                    Ok(Ok(())) => {
                        tracing::info!("gx {} ready", name);
                        Ok(Arc::new(handle))
                    }
                    Ok(Err(e)) => {
                        handle.close().await;
                        Err(e)
                    }
                    Err(_) => {
                        handle.close().await;
                        Err(TransportError::ConnectTimeout {
                            target: host,
                            timeout_ms: budget.as_millis() as u64,
                        }
                        .into())
                    }
                }
            })
            .await
    }

    /// Set the machine name shown on the device
    ///
    /// Returns the reply lines; the name must be a single non-empty line.
    pub async fn rename(&self, device: &DeviceInfo, name: &str) -> Result<Vec<String>> {
        let name = name.trim();
        if name.is_empty() || name.contains(['\r', '\n']) {
            return Err(UserError::InvalidArgument {
                reason: format!("bad machine name {:?}", name),
            }
            .into());
        }
        let session = self.session(device).await?;
        let lines = Self::call(&session, GxRequest::with_args(GxCommand::SetName, name)).await?;
        tracing::info!("gx {} renamed to {}", device.name, name);
        Ok(lines)
    }

    async fn call(session: &GxSession, request: GxRequest) -> Result<Vec<String>> {
        let label = format!("{:?}", request);
        match session.request(request).await? {
            Some(reply) => Ok(reply.lines),
            None => Err(Error::other(format!("no reply to {}", label))),
        }
    }
}

#[async_trait]
impl PrinterDriver for GxDriver {
    fn name(&self) -> &str {
        "gx"
    }

    fn init(&mut self, api: DriverApi) {
        self.bus = api.bus;
    }

    async fn send(&self, device: &DeviceInfo, entry: PrintEntry) -> Result<PrintReceipt> {
        let session = self.session(device).await?;

        let (name, payload) = if entry.name.ends_with(".gx") {
            (entry.name.clone(), entry.data.clone())
        } else {
            let stem = entry
                .name
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .unwrap_or(&entry.name);
            let file = GxFile::new(entry.data.clone()).with_estimates(
                entry.estimated_time.map(|t| t.min(u32::MAX as u64) as u32),
                entry.filament_used.map(|f| f.max(0.0).round() as u32),
            );
            (format!("{}.gx", stem), file.to_bytes())
        };
        let path = device_path(&name);

        self.bus
            .log(format!("*** gx upload {} ({} bytes) to {} ***", name, payload.len(), device.name));
        Self::call(
            &session,
            GxRequest::with_args(GxCommand::Write, format!("{} {}", payload.len(), path)),
        )
        .await?;
        for chunk in chunk_frames(&payload) {
            Self::call(&session, GxRequest::Chunk(chunk)).await?;
        }
        Self::call(&session, GxRequest::command(GxCommand::Save)).await?;
        Self::call(&session, GxRequest::with_args(GxCommand::Start, path)).await?;

        Ok(PrintReceipt {
            device: device.name.clone(),
            file: name,
            bytes: payload.len(),
        })
    }

    async fn cancel(&self, device: &DeviceInfo) -> Result<()> {
        let session = self.session(device).await?;
        Self::call(&session, GxRequest::command(GxCommand::Cancel)).await?;
        Ok(())
    }

    async fn status(&self, device: &DeviceInfo) -> Result<DeviceStatus> {
        Ok(self.session(device).await?.status())
    }

    async fn shutdown(&self) {
        for session in self.sessions.drain() {
            session.close().await;
        }
    }
}
