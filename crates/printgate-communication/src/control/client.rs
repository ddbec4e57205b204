//! Driver for printers behind another gateway's control channel
//!
//! The remote gateway is polled with `*status` and answers with a
//! `*** {json} ***` status line. Prints are uploaded over a second
//! connection (`*upload <name>`, raw bytes, close) and then started with
//! `*kick <name>` on the control connection.

use super::server::evt;
use crate::communication::{Connector, LineFramer, TcpConnectionInfo, TcpConnector};
use crate::device::{ConnectionRegistry, Session, SessionConfig, SessionHandle, SessionProtocol};
use crate::driver::{DeviceInfo, DriverApi, PrintEntry, PrintReceipt, PrinterDriver};
use async_trait::async_trait;
use bytes::Bytes;
use printgate_core::{DeviceStatus, EventBus, Result, TransportError};
use std::sync::Arc;
use std::time::Duration;

/// Default control channel port
pub const DEFAULT_CONTROL_PORT: u16 = 8899;

/// Greeting sent to every new client
pub const READY_LINE: &str = "*ready";

/// Requests to a remote gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridRequest {
    /// Wait for the greeting; writes nothing
    AwaitReady,
    /// `*status`
    Status,
    /// Any other control line; not answered
    Line(String),
}

/// Lines from a remote gateway that the session cares about
#[derive(Debug, Clone, PartialEq)]
pub enum GridReply {
    /// `*ready`
    Ready,
    /// `*** {json} ***` status
    Status(Box<DeviceStatus>),
}

/// Session protocol for a remote control channel
#[derive(Debug, Default)]
pub struct GridProtocol {
    framer: LineFramer,
}

impl GridProtocol {
    /// Fresh protocol state
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `*** {json} ***` status line
    pub fn parse_status(line: &str) -> Option<DeviceStatus> {
        let json = line.strip_prefix("*** ")?.strip_suffix(" ***")?;
        if !json.starts_with('{') {
            return None;
        }
        serde_json::from_str(json).ok()
    }
}

impl SessionProtocol for GridProtocol {
    type Request = GridRequest;
    type Reply = GridReply;

    fn name(&self) -> &str {
        "grid"
    }

    fn reset(&mut self) {
        self.framer = LineFramer::new();
    }

    fn encode(&mut self, request: &GridRequest) -> Result<Bytes> {
        Ok(match request {
            GridRequest::AwaitReady => Bytes::new(),
            GridRequest::Status => Bytes::from_static(b"*status\n"),
            GridRequest::Line(line) => Bytes::from(format!("{}\n", line)),
        })
    }

    fn expects_reply(&self, request: &GridRequest) -> bool {
        !matches!(request, GridRequest::Line(_))
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<GridReply>> {
        let mut replies = Vec::new();
        for line in self.framer.push(data) {
            if line == READY_LINE {
                replies.push(GridReply::Ready);
            } else if let Some(status) = Self::parse_status(&line) {
                replies.push(GridReply::Status(Box::new(status)));
            } else {
                tracing::trace!("grid line ignored: {}", line);
            }
        }
        Ok(replies)
    }

    fn handshake(&self) -> Vec<GridRequest> {
        vec![GridRequest::AwaitReady]
    }

    fn poll(&self) -> Vec<GridRequest> {
        vec![GridRequest::Status]
    }

    fn apply(
        &mut self,
        _request: Option<&GridRequest>,
        reply: &GridReply,
        status: &mut DeviceStatus,
    ) -> Result<()> {
        if let GridReply::Status(remote) = reply {
            let link = status.device.clone();
            *status = (**remote).clone();
            status.device = link;
        }
        Ok(())
    }

    fn release(&self) -> Option<GridRequest> {
        None
    }
}

/// Upload name: `.gcode` appended when missing
pub fn upload_name(name: &str) -> String {
    if name.contains(".gcode") {
        name.to_string()
    } else {
        format!("{}.gcode", name)
    }
}

/// Push a file into the remote file directory
///
/// Returns once the remote side has closed the connection, which it does
/// after storing the file.
pub async fn push_upload(connector: &dyn Connector, name: &str, data: &[u8], timeout: Duration) -> Result<()> {
    let mut link = connector.connect().await?;
    link.write_all(format!("*upload {}\n", name).as_bytes()).await?;
    link.write_all(data).await?;
    link.shutdown().await?;

    let mut buf = [0u8; 1024];
    let drained = tokio::time::timeout(timeout, async {
        loop {
            match link.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;
    drained.map_err(|_| {
        TransportError::ReadTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }
        .into()
    })
}

/// Driver for remote gateways
pub struct GridDriver {
    bus: Arc<EventBus>,
    config: SessionConfig,
    sessions: ConnectionRegistry<SessionHandle<GridProtocol>>,
}

impl Default for GridDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl GridDriver {
    /// Driver polling every 500 ms
    pub fn new() -> Self {
        Self::with_config(SessionConfig {
            connect_attempts: 1,
            retry_delay: Duration::from_secs(1),
            poll_interval: Some(Duration::from_millis(500)),
            idle_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_millis(500),
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

    fn connector(device: &DeviceInfo) -> TcpConnector {
        TcpConnector::new(TcpConnectionInfo::new(
            device.host.clone(),
            device.port_or(DEFAULT_CONTROL_PORT),
        ))
    }

    async fn session(&self, device: &DeviceInfo) -> Result<Arc<SessionHandle<GridProtocol>>> {
        if let Some(existing) = self.sessions.get(&device.name) {
            if !existing.is_closed() {
                return Ok(existing);
            }
            self.sessions.remove(&device.name);
        }
        let budget = self.config.idle_timeout * self.config.connect_attempts.max(1);
        let name = device.name.clone();
        let host = device.host.clone();
        let connector = Self::connector(device);
        let config = self.config.clone();
        let bus = self.bus.clone();
        self.sessions
            .get_or_connect(&device.name, move || async move {
                let (handle, _task) =
                    Session::spawn(name, GridProtocol::new(), Arc::new(connector), config, bus);
                match tokio::time::timeout(budget, handle.wait_ready()).await {
                    Ok(Ok(())) => Ok(Arc::new(handle)),
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
}

#[async_trait]
impl PrinterDriver for GridDriver {
    fn name(&self) -> &str {
        "grid"
    }

    fn init(&mut self, api: DriverApi) {
        self.bus = api.bus;
    }

    async fn send(&self, device: &DeviceInfo, entry: PrintEntry) -> Result<PrintReceipt> {
        let session = self.session(device).await?;
        let name = upload_name(&entry.name);
        push_upload(
            &Self::connector(device),
            &name,
            &entry.data,
            self.config.idle_timeout,
        )
        .await?;
        self.bus
            .log(evt(format!("grid upload {} to {}", name, device.name)));
        session
            .request(GridRequest::Line(format!("*kick {}", name)))
            .await?;
        Ok(PrintReceipt {
            device: device.name.clone(),
            file: name,
            bytes: entry.data.len(),
        })
    }

    async fn cancel(&self, device: &DeviceInfo) -> Result<()> {
        let session = self.session(device).await?;
        session
            .request(GridRequest::Line("*abort".to_string()))
            .await?;
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
