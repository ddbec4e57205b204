//! N2 file transfer (control port + 1)
//!
//! The client opens with a `0x0c` begin packet. Every server packet after
//! that releases one `0x0e` chunk; the `0x0d` ready reply also names the
//! location the file is stored under. Once nothing is left to send the
//! client shuts its side down.

use super::packet::{length_string_at, N2Command, N2Packet};
use crate::communication::Link;
use bytes::{Buf, Bytes, BytesMut};
use printgate_core::{Result, TransportError};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Default transfer port
pub const N2_TRANSFER_PORT: u16 = 31626;

/// Bytes per chunk
pub const N2_CHUNK_SIZE: usize = 8192;

/// Offset of the location string in the ready reply
const LOCATION_OFFSET: usize = 48;

/// Upload progress after each chunk
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Percent sent, two decimals
    pub progress: f64,
    /// Throughput in kB/s
    pub rate: u64,
    /// Seconds since the transfer began, two decimals
    pub time: f64,
}

impl TransferProgress {
    fn measure(sent: usize, total: usize, elapsed: Duration) -> Self {
        let round2 = |v: f64| (v * 100.0).round() / 100.0;
        let millis = elapsed.as_millis().max(1) as f64;
        Self {
            progress: if total == 0 {
                100.0
            } else {
                round2(100.0 * sent as f64 / total as f64)
            },
            rate: (sent as f64 / millis * 1.024).round() as u64,
            time: round2(elapsed.as_secs_f64()),
        }
    }
}

/// Name the device stores an upload under: last path segment, `.gcode` suffix
pub fn transfer_name(name: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    if base.contains(".gcode") {
        base.to_string()
    } else {
        format!("{}.gcode", base)
    }
}

/// `0x0c` begin packet
pub fn begin_packet(name: &str, size: usize) -> N2Packet {
    N2Packet::new(N2Command::TransferBegin)
        .with_long(size as u64)
        .with_long(0)
        .with_string(name)
}

/// `0x0e` chunk packet
pub fn chunk_packet(seq: u32, data: Bytes) -> N2Packet {
    N2Packet::new(N2Command::TransferChunk)
        .with_int(seq)
        .with_int(data.len() as u32)
        .with_block(data)
}

/// Upload `data` over an open transfer link
///
/// Returns the stored location reported by the device, or the transfer
/// name when the device never sent one.
pub async fn upload<F>(
    link: &mut dyn Link,
    name: &str,
    data: Bytes,
    idle_timeout: Duration,
    mut on_progress: F,
) -> Result<String>
where
    F: FnMut(TransferProgress) + Send,
{
    let mut location = transfer_name(name);
    let started = Instant::now();
    let mut sent = 0usize;
    let mut seq = 1u32;
    let mut buf = BytesMut::new();
    let mut read_buf = vec![0u8; 4096];

    tracing::info!("n2 upload {} ({} bytes) to {}", location, data.len(), link.target());
    link.write_all(&begin_packet(&location, data.len()).encode())
        .await?;

    loop {
        let n = tokio::time::timeout(idle_timeout, link.read(&mut read_buf))
            .await
            .map_err(|_| TransportError::ReadTimeout {
                timeout_ms: idle_timeout.as_millis() as u64,
            })??;
        if n == 0 {
            return Err(TransportError::Closed.into());
        }
        buf.extend_from_slice(&read_buf[..n]);

        loop {
            let (packet, used) = match N2Packet::decode(&buf) {
                Ok(decoded) => decoded,
                Err(e) if e.is_incomplete() => break,
                Err(e) => return Err(e.into()),
            };
            if packet.command().ok() == Some(N2Command::TransferReady) {
                location = length_string_at(&buf[..used], LOCATION_OFFSET)?;
                tracing::debug!("n2 upload location {}", location);
            }
            buf.advance(used);

            let remaining = data.len() - sent;
            if remaining == 0 {
                link.shutdown().await?;
                return Ok(location);
            }
            let take = remaining.min(N2_CHUNK_SIZE);
            let chunk = data.slice(sent..sent + take);
            link.write_all(&chunk_packet(seq, chunk).encode()).await?;
            seq += 1;
            sent += take;
            on_progress(TransferProgress::measure(sent, data.len(), started.elapsed()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_name() {
        assert_eq!(transfer_name("/tmp/cube"), "cube.gcode");
        assert_eq!(transfer_name("cube.gcode"), "cube.gcode");
    }

    #[test]
    fn test_progress_measure() {
        let p = TransferProgress::measure(8192, 24576, Duration::from_millis(1000));
        assert_eq!(p.progress, 33.33);
        assert_eq!(p.rate, 8);
        assert_eq!(p.time, 1.0);
    }

    #[test]
    fn test_chunk_layout() {
        let frame = chunk_packet(1, Bytes::from_static(b"G28\n")).encode();
        assert_eq!(&frame[18..28], &[0, 0, 0, 0, 2, 0, 0, 0, 1, 0]);
        assert_eq!(&frame[28..32], &1u32.to_le_bytes());
        assert_eq!(&frame[32..36], &4u32.to_le_bytes());
        assert_eq!(&frame[36..40], &4u32.to_le_bytes());
        assert_eq!(&frame[40..], b"G28\n");
    }
}
