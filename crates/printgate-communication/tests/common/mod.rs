//! Shared fixtures: an in-memory connector and a line-oriented fake peer

#![allow(dead_code)]

use async_trait::async_trait;
use printgate_communication::{Connector, Link, StreamLink};
use printgate_core::{Result, TransportError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;

/// Connector handing out in-memory pipes; the far end of each goes to the test
pub struct DuplexConnector {
    peers: mpsc::UnboundedSender<DuplexStream>,
    refuse: AtomicBool,
    attempts: AtomicUsize,
}

impl DuplexConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DuplexStream>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                peers,
                refuse: AtomicBool::new(false),
                attempts: AtomicUsize::new(0),
            },
            rx,
        )
    }

    /// Make every following connect fail
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self) -> Result<Box<dyn Link>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::OpenFailed {
                target: self.target(),
                reason: "refused".to_string(),
            }
            .into());
        }
        let (near, far) = tokio::io::duplex(64 * 1024);
        self.peers
            .send(far)
            .map_err(|_| TransportError::Closed)?;
        Ok(Box::new(StreamLink::new(near, self.target())))
    }

    fn target(&self) -> String {
        "duplex".to_string()
    }
}

/// Poll `check` every 10 ms for up to two seconds
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within 2s");
}

/// Far end of a pipe, read line by line
pub struct Peer {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Peer {
    pub fn new(stream: DuplexStream) -> Self {
        let (r, w) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(r),
            writer: w,
        }
    }

    /// Wait for the next peer, failing the test after two seconds
    pub async fn accept(rx: &mut mpsc::UnboundedReceiver<DuplexStream>) -> Self {
        let stream = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no connect within 2s")
            .expect("connector dropped");
        Self::new(stream)
    }

    /// Next line without its terminator; `None` on EOF
    pub async fn line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
            .await
            .expect("no line within 2s")
            .expect("read failed");
        if n == 0 {
            return None;
        }
        Some(line.trim_end_matches(['\r', '\n']).to_string())
    }

    /// Next line if one arrives within `wait`
    pub async fn try_line(&mut self, wait: Duration) -> Option<String> {
        let mut line = String::new();
        match tokio::time::timeout(wait, self.reader.read_line(&mut line)).await {
            Ok(Ok(n)) if n > 0 => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            _ => None,
        }
    }

    /// Skip lines until one satisfies `pred`
    pub async fn line_where(&mut self, pred: impl Fn(&str) -> bool) -> String {
        loop {
            let line = self.line().await.expect("peer closed");
            if pred(&line) {
                return line;
            }
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.expect("write");
        self.writer.write_all(b"\n").await.expect("write");
        self.writer.flush().await.expect("flush");
    }

    pub async fn send_raw(&mut self, data: &[u8]) {
        self.writer.write_all(data).await.expect("write");
        self.writer.flush().await.expect("flush");
    }

    pub async fn close(mut self) {
        let _ = self.writer.shutdown().await;
    }
}
