//! GX command table and request types

use bytes::Bytes;
use printgate_core::PacketError;
use std::fmt;

/// Default control port
pub const GX_PORT: u16 = 8899;

/// Closed set of commands understood by GX firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GxCommand {
    /// Start printing a stored file (`0:/user/<name>`)
    Start,
    /// Resume a paused print
    Resume,
    /// Pause the print
    Pause,
    /// Cancel the print
    Cancel,
    /// SD print progress
    Status,
    /// Begin a file upload (`<length> 0:/user/<name>`)
    Write,
    /// Finish a file upload
    Save,
    /// Set a temperature (`T0 S<temp>`)
    SetTemp,
    /// Read temperatures
    GetTemp,
    /// Emergency stop
    EStop,
    /// Read position
    GetPos,
    /// Machine info
    GetInfo,
    /// Endstops and machine state
    GetStatus,
    /// Take control (`S1`)
    Control,
    /// Release control
    Release,
    /// Rename the machine
    SetName,
    /// Set XY offset
    SetXY,
    /// Read XY offset
    GetXY,
}

impl GxCommand {
    /// Every command
    pub const ALL: [GxCommand; 18] = [
        GxCommand::Start,
        GxCommand::Resume,
        GxCommand::Pause,
        GxCommand::Cancel,
        GxCommand::Status,
        GxCommand::Write,
        GxCommand::Save,
        GxCommand::SetTemp,
        GxCommand::GetTemp,
        GxCommand::EStop,
        GxCommand::GetPos,
        GxCommand::GetInfo,
        GxCommand::GetStatus,
        GxCommand::Control,
        GxCommand::Release,
        GxCommand::SetName,
        GxCommand::SetXY,
        GxCommand::GetXY,
    ];

    /// Numeric M-code
    pub fn code(&self) -> u32 {
        match self {
            GxCommand::Start => 23,
            GxCommand::Resume => 24,
            GxCommand::Pause => 25,
            GxCommand::Cancel => 26,
            GxCommand::Status => 27,
            GxCommand::Write => 28,
            GxCommand::Save => 29,
            GxCommand::SetTemp => 104,
            GxCommand::GetTemp => 105,
            GxCommand::EStop => 112,
            GxCommand::GetPos => 114,
            GxCommand::GetInfo => 115,
            GxCommand::GetStatus => 119,
            GxCommand::Control => 601,
            GxCommand::Release => 602,
            GxCommand::SetName => 610,
            GxCommand::SetXY => 612,
            GxCommand::GetXY => 650,
        }
    }

    /// Look up a command by M-code
    pub fn from_code(code: u32) -> Result<Self, PacketError> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.code() == code)
            .ok_or(PacketError::UnrecognizedCommand { id: code })
    }

    /// Look up a command by its `M<code>` mnemonic
    pub fn parse(text: &str) -> Result<Self, PacketError> {
        let code = text
            .trim()
            .strip_prefix('M')
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| PacketError::Malformed {
                offset: 0,
                reason: format!("not an M-code: {:?}", text),
            })?;
        Self::from_code(code)
    }
}

impl fmt::Display for GxCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.code())
    }
}

/// One request to a GX device
#[derive(Clone, PartialEq, Eq)]
pub enum GxRequest {
    /// M-code with arguments
    Command {
        /// Command
        command: GxCommand,
        /// Arguments after the M-code, may be empty
        args: String,
    },
    /// Raw upload chunk, written verbatim
    Chunk(Bytes),
}

impl GxRequest {
    /// Command without arguments
    pub fn command(command: GxCommand) -> Self {
        GxRequest::Command {
            command,
            args: String::new(),
        }
    }

    /// Command with arguments
    pub fn with_args(command: GxCommand, args: impl Into<String>) -> Self {
        GxRequest::Command {
            command,
            args: args.into(),
        }
    }

    /// Command line text, `None` for chunks
    pub fn text(&self) -> Option<String> {
        match self {
            GxRequest::Command { command, args } if args.is_empty() => Some(command.to_string()),
            GxRequest::Command { command, args } => Some(format!("{} {}", command, args)),
            GxRequest::Chunk(_) => None,
        }
    }

    /// Command, `None` for chunks
    pub fn gx_command(&self) -> Option<GxCommand> {
        match self {
            GxRequest::Command { command, .. } => Some(*command),
            GxRequest::Chunk(_) => None,
        }
    }
}

impl fmt::Debug for GxRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GxRequest::Command { .. } => write!(f, "{}", self.text().unwrap_or_default()),
            GxRequest::Chunk(data) => write!(f, "<chunk {} bytes>", data.len()),
        }
    }
}

/// Lines of one reply, without the trailing bare `ok`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GxReply {
    /// Reply lines; the first is normally the `CMD Mxxx Received.` echo
    pub lines: Vec<String>,
}

impl GxReply {
    /// Lines after the command echo
    pub fn body(&self) -> &[String] {
        match self.lines.first() {
            Some(first) if first.starts_with("CMD ") => &self.lines[1..],
            _ => &self.lines,
        }
    }
}

/// How requests are put on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GxFraming {
    /// `~<cmd>\r\n` text lines
    #[default]
    Text,
    /// Binary GX packets carrying the command text
    Packet,
}
