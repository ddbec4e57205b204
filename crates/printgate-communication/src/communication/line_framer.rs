//! Line framing for text protocols
//!
//! Splits a raw byte stream into lines terminated by `\n` or `\r\n`.
//! A `\r` directly before the `\n` is stripped; a lone `\r` elsewhere is
//! kept as data. Framing can be suspended for raw binary transfers, in
//! which case bytes accumulate until the caller takes them.

use bytes::{Buf, BytesMut};

/// Push-driven line splitter
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: BytesMut,
    disabled: bool,
}

impl LineFramer {
    /// Create an enabled framer with an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        self.push_with(chunk, |line| lines.push(line));
        lines
    }

    /// Feed a chunk, calling `emit` for each completed line in order
    ///
    /// Nothing is emitted while framing is disabled.
    pub fn push_with<F>(&mut self, chunk: &[u8], mut emit: F)
    where
        F: FnMut(String),
    {
        self.extend(chunk);
        while let Some(line) = self.next_line() {
            emit(line);
        }
    }

    /// Append bytes without emitting anything
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Pop the next complete line
    ///
    /// Returns `None` while disabled or when no terminator is buffered.
    /// Callers that may disable framing mid-chunk pull lines one at a time
    /// so the bytes after the switch stay in the buffer.
    pub fn next_line(&mut self) -> Option<String> {
        if self.disabled {
            return None;
        }
        let lf = self.buffer.iter().position(|&b| b == b'\n')?;
        let end = if lf > 0 && self.buffer[lf - 1] == b'\r' {
            lf - 1
        } else {
            lf
        };
        let line = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
        self.buffer.advance(lf + 1);
        Some(line)
    }

    /// Check if line emission is active
    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    /// Suspend or resume line emission
    ///
    /// Re-enabling starts from an empty buffer; anything accumulated while
    /// disabled must be taken with [`take_buffer`](Self::take_buffer) first
    /// or it is discarded.
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled && self.disabled {
            self.buffer.clear();
        }
        self.disabled = !enabled;
    }

    /// Bytes not yet emitted as lines
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Take the accumulated bytes, leaving the buffer empty
    pub fn take_buffer(&mut self) -> Vec<u8> {
        self.buffer.split().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_endings() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"ok\r\nT:20.0 /0.0\nstart\n");
        assert_eq!(lines, vec!["ok", "T:20.0 /0.0", "start"]);
        assert!(framer.buffered().is_empty());
    }

    #[test]
    fn test_partial_line_held() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"ok T:2").is_empty());
        assert_eq!(framer.push(b"1\r"), Vec::<String>::new());
        assert_eq!(framer.push(b"\n"), vec!["ok T:21"]);
    }

    #[test]
    fn test_lone_cr_is_data() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"a\rb\n"), vec!["a\rb"]);
        assert_eq!(framer.push(b"\n"), vec![""]);
    }

    #[test]
    fn test_disabled_accumulates() {
        let mut framer = LineFramer::new();
        assert_eq!(framer.push(b"*upload part.gcode\n"), vec!["*upload part.gcode"]);
        framer.set_enabled(false);
        assert!(framer.push(b"G1 X1\nG1 X2\n").is_empty());
        assert_eq!(framer.take_buffer(), b"G1 X1\nG1 X2\n".to_vec());

        framer.push(b"stale");
        framer.set_enabled(true);
        assert!(framer.buffered().is_empty());
        assert_eq!(framer.push(b"fresh\n"), vec!["fresh"]);
    }

    #[test]
    fn test_switch_mid_chunk() {
        let mut framer = LineFramer::new();
        framer.extend(b"*upload a.gcode\nG28\nM84\n");
        assert_eq!(framer.next_line().as_deref(), Some("*upload a.gcode"));
        framer.set_enabled(false);
        assert_eq!(framer.next_line(), None);
        assert_eq!(framer.buffered(), b"G28\nM84\n");
    }
}
