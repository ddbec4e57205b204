//! Communication links
//!
//! A `Link` is an exclusively owned, bidirectional byte pipe to one device:
//! a serial port, a TCP socket, or an in-memory duplex in tests. Protocol
//! engines never open links themselves; they ask a `Connector`, which lets
//! reconnect logic reopen the same target after a drop.

pub mod line_framer;
pub mod serial;
pub mod tcp;

use async_trait::async_trait;
use printgate_core::{Result, TransportError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub use line_framer::LineFramer;
pub use serial::{list_ports, SerialConnector, SerialLink, SerialPortInfo};
pub use tcp::{TcpConnectionInfo, TcpConnector};

/// Bidirectional byte link to a device
#[async_trait]
pub trait Link: Send {
    /// Read whatever bytes are available; `Ok(0)` means the peer closed
    ///
    /// Must be cancel safe: dropping the future loses no data.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all bytes
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Close the write side
    async fn shutdown(&mut self) -> Result<()>;

    /// Port path or `host:port`
    fn target(&self) -> &str;
}

/// Link over any async stream (TCP sockets, duplex pipes)
pub struct StreamLink<S> {
    stream: S,
    target: String,
}

impl<S> StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a connected stream
    pub fn new(stream: S, target: impl Into<String>) -> Self {
        Self {
            stream,
            target: target.into(),
        }
    }
}

#[async_trait]
impl<S> Link for StreamLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stream.read(buf).await?)
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream
            .write_all(data)
            .await
            .map_err(|e| TransportError::WriteFailed {
                reason: e.to_string(),
            })?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<()> {
        Ok(self.stream.shutdown().await?)
    }

    fn target(&self) -> &str {
        &self.target
    }
}

/// Opens (and reopens) links to one target
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh link
    async fn connect(&self) -> Result<Box<dyn Link>>;

    /// Port path or `host:port`
    fn target(&self) -> String;
}
