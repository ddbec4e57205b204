//! Line numbering and XOR checksum framing
//!
//! Frames look like `N<seq> <line>*<sum>` where `<sum>` is the XOR of every
//! byte before the `*`.

/// XOR of all bytes
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Frame one line with a sequence number
pub fn frame_line(seq: u64, line: &str) -> String {
    let body = format!("N{} {}", seq, line);
    let sum = xor_checksum(body.as_bytes());
    format!("{}*{}", body, sum)
}

/// Parse the line number out of a `Resend: <n>` / `rs <n>` reply
pub fn parse_resend(line: &str) -> Option<u64> {
    let rest = line
        .strip_prefix("Resend:")
        .or_else(|| line.strip_prefix("rs "))?;
    rest.trim().trim_start_matches('N').parse().ok()
}

/// Sequence counter for checksum mode
///
/// Advances once per transmitted numbered line.
#[derive(Debug, Clone, Default)]
pub struct LineNumberer {
    next: u64,
}

impl LineNumberer {
    /// Start at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame a line and advance the sequence
    pub fn frame(&mut self, line: &str) -> (u64, String) {
        let seq = self.next;
        self.next += 1;
        (seq, frame_line(seq, line))
    }

    /// Restart numbering at zero (after a device reset)
    pub fn reset(&mut self) {
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_g0() {
        let expected = "N5 G0 X10"
            .bytes()
            .fold(0u8, |acc, b| acc ^ b);
        assert_eq!(frame_line(5, "G0 X10"), format!("N5 G0 X10*{}", expected));
    }

    #[test]
    fn test_m110_frame() {
        // well known reset frame
        assert_eq!(frame_line(0, "M110 N0"), "N0 M110 N0*125");
    }

    #[test]
    fn test_numberer_advances() {
        let mut n = LineNumberer::new();
        assert_eq!(n.frame("M105").0, 0);
        assert_eq!(n.frame("M105").0, 1);
        n.reset();
        assert_eq!(n.frame("M105"), (0, frame_line(0, "M105")));
    }

    #[test]
    fn test_parse_resend() {
        assert_eq!(parse_resend("Resend: 12"), Some(12));
        assert_eq!(parse_resend("Resend:N7"), Some(7));
        assert_eq!(parse_resend("rs 3"), Some(3));
        assert_eq!(parse_resend("ok"), None);
    }
}
