//! Error handling for PrintGate
//!
//! Errors are grouped by how the gateway recovers from them:
//! - Transport errors (serial/socket open, read, write) feed the reconnect loop
//! - Protocol errors (desync, resend, unexpected replies) force a reconnect
//! - Packet errors (binary decode) either wait for more bytes or reject a frame
//! - Device faults (`Error:` lines, rejected requests) escalate to abort mid-print
//! - User errors (bad control commands, missing files) go back to the issuing channel
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Transport error type
///
/// Failures of the physical link: serial port or TCP socket.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Link has not been opened
    #[error("Not connected")]
    NotConnected,

    /// Opening the link failed
    #[error("Failed to open {target}: {reason}")]
    OpenFailed {
        /// Port path or `host:port`.
        target: String,
        /// The reason reported by the OS.
        reason: String,
    },

    /// Connect did not complete in time
    #[error("Connect to {target} timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Port path or `host:port`.
        target: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// No bytes arrived inside the idle window
    #[error("No data received for {timeout_ms}ms")]
    ReadTimeout {
        /// The idle window in milliseconds.
        timeout_ms: u64,
    },

    /// Peer closed the link
    #[error("Connection closed")]
    Closed,

    /// A write to the link failed
    #[error("Write failed: {reason}")]
    WriteFailed {
        /// The reason the write failed.
        reason: String,
    },

    /// Another task is establishing the connection for this device
    #[error("Device {device} connecting")]
    Connecting {
        /// Device name.
        device: String,
    },

    /// Connect retries were exhausted
    #[error("Giving up on {target} after {attempts} attempts")]
    RetriesExhausted {
        /// Port path or `host:port`.
        target: String,
        /// Number of attempts made.
        attempts: u32,
    },
}

/// Protocol desync error type
///
/// The engine's view of device state can no longer be trusted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Device asked for a line to be re-sent
    #[error("Device requested resend from line {line}")]
    ResendRequested {
        /// Line number the device asked for.
        line: u64,
    },

    /// Line checksum did not match
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u8,
        /// Received checksum.
        actual: u8,
    },

    /// Reply did not match the outstanding request
    #[error("Unexpected reply: expected {expected}, got {actual}")]
    UnexpectedReply {
        /// What the session was waiting for.
        expected: String,
        /// What actually arrived.
        actual: String,
    },

    /// Reply could not be interpreted
    #[error("Failed to parse device response: {reason}")]
    ResponseParse {
        /// The reason the response could not be parsed.
        reason: String,
    },
}

/// Binary packet decode error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Fewer bytes than the frame declares; wait for more
    #[error("Incomplete packet: need {needed} bytes, have {available}")]
    Incomplete {
        /// Bytes required to finish the frame.
        needed: usize,
        /// Bytes currently available.
        available: usize,
    },

    /// A field runs past the end of a complete frame
    #[error("Malformed packet at offset {offset}: {reason}")]
    Malformed {
        /// Byte offset of the offending field.
        offset: usize,
        /// What was wrong.
        reason: String,
    },

    /// Structurally valid frame with an id outside the known table
    #[error("Unrecognized command id 0x{id:02x}")]
    UnrecognizedCommand {
        /// The command id found in the frame.
        id: u32,
    },
}

impl PacketError {
    /// True when the caller should keep buffering and retry
    pub fn is_incomplete(&self) -> bool {
        matches!(self, PacketError::Incomplete { .. })
    }
}

/// Device-reported fault
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceFault {
    /// Device printed an `Error:` line
    #[error("Device error: {cause}")]
    Reported {
        /// The text following `Error:`.
        cause: String,
    },

    /// Device refused a request
    #[error("Device rejected {request}: {reason}")]
    Rejected {
        /// The request that was refused.
        request: String,
        /// Device supplied reason.
        reason: String,
    },
}

/// Operator error, reported only to the originating channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UserError {
    /// Unknown or malformed control command
    #[error("invalid command \"{command}\"")]
    InvalidCommand {
        /// The command as typed.
        command: String,
    },

    /// Referenced file does not exist
    #[error("missing file: {path}")]
    MissingFile {
        /// The path that was looked up.
        path: String,
    },

    /// A print was requested without clearing the bed
    #[error("bed not marked clear")]
    BedNotClear,

    /// A print is already running
    #[error("print already in progress")]
    PrintInProgress,

    /// No device with that name is configured
    #[error("unknown device: {name}")]
    UnknownDevice {
        /// Device name.
        name: String,
    },

    /// Argument out of range or missing
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong.
        reason: String,
    },
}

/// Main error type for PrintGate
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Protocol desync
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Packet decode error
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// Device fault
    #[error(transparent)]
    Device(#[from] DeviceFault),

    /// Operator error
    #[error(transparent)]
    User(#[from] UserError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a transport error (including raw I/O)
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Io(_))
    }

    /// Check if this is a protocol desync
    pub fn is_protocol(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Check if the frame just needs more bytes
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::Packet(p) if p.is_incomplete())
    }

    /// Check if this is a device fault
    pub fn is_device_fault(&self) -> bool {
        matches!(self, Error::Device(_))
    }

    /// Check if this is an operator error
    pub fn is_user_error(&self) -> bool {
        matches!(self, Error::User(_))
    }

    /// Check if a reconnect can clear this error
    pub fn is_recoverable(&self) -> bool {
        self.is_transport() || self.is_protocol() || self.is_incomplete()
    }
}

impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::Transport(e) => Error::Transport(e.clone()),
            Error::Protocol(e) => Error::Protocol(e.clone()),
            Error::Packet(e) => Error::Packet(e.clone()),
            Error::Device(e) => Error::Device(e.clone()),
            Error::User(e) => Error::User(e.clone()),
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), e.to_string())),
            Error::Other(msg) => Error::Other(msg.clone()),
        }
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err: Error = TransportError::Closed.into();
        assert!(err.is_transport());
        assert!(err.is_recoverable());

        let err: Error = ProtocolError::ResendRequested { line: 7 }.into();
        assert!(err.is_protocol());
        assert!(err.is_recoverable());

        let err: Error = PacketError::Incomplete {
            needed: 28,
            available: 3,
        }
        .into();
        assert!(err.is_incomplete());

        let err: Error = PacketError::UnrecognizedCommand { id: 0x42 }.into();
        assert!(!err.is_recoverable());

        let err: Error = UserError::BedNotClear.into();
        assert!(err.is_user_error());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_clone_keeps_io_kind() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone").into();
        match err.clone() {
            Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::BrokenPipe),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_command_message() {
        let err = UserError::InvalidCommand {
            command: "*frob".into(),
        };
        assert_eq!(err.to_string(), "invalid command \"*frob\"");
    }
}
