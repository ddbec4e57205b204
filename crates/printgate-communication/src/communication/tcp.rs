//! TCP communication implementation
//!
//! GX and N2 printers and remote gateways are reached over plain TCP.

use super::{Connector, Link, StreamLink};
use async_trait::async_trait;
use printgate_core::{Result, TransportError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;

/// TCP endpoint plus connect timeout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpConnectionInfo {
    /// Host name or address
    pub host: String,
    /// Port
    pub port: u16,
    /// Connect timeout in milliseconds
    pub timeout_ms: u64,
}

impl TcpConnectionInfo {
    /// Create connection info with a 5 second connect timeout
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_ms: 5000,
        }
    }

    /// Override the connect timeout
    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connect with timeout and disable Nagle
pub async fn connect(info: &TcpConnectionInfo) -> Result<StreamLink<TcpStream>> {
    let address = info.address();
    let stream = match tokio::time::timeout(
        Duration::from_millis(info.timeout_ms),
        TcpStream::connect(&address),
    )
    .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(TransportError::OpenFailed {
                target: address,
                reason: e.to_string(),
            }
            .into())
        }
        Err(_) => {
            return Err(TransportError::ConnectTimeout {
                target: address,
                timeout_ms: info.timeout_ms,
            }
            .into())
        }
    };
    stream.set_nodelay(true)?;
    tracing::debug!("Connected to {}", address);
    Ok(StreamLink::new(stream, address))
}

/// Reopens one TCP endpoint on demand
#[derive(Debug, Clone)]
pub struct TcpConnector {
    info: TcpConnectionInfo,
}

impl TcpConnector {
    /// Create a connector for the endpoint
    pub fn new(info: TcpConnectionInfo) -> Self {
        Self { info }
    }

    /// Endpoint this connector opens
    pub fn info(&self) -> &TcpConnectionInfo {
        &self.info
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Link>> {
        Ok(Box::new(connect(&self.info).await?))
    }

    fn target(&self) -> String {
        self.info.address()
    }
}
