//! Control channel command parsing
//!
//! Lines starting with `*` are gateway commands; any other non-empty line is
//! G-code for the device queue.

use printgate_core::UserError;
use std::fmt;

/// One parsed control line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// `*status`
    Status,
    /// `*list`
    List,
    /// `*clear`
    Clear,
    /// `*clearkick`: mark the bed clear and kick the newest file
    ClearKick,
    /// `*kick[ name]`
    Kick(Option<String>),
    /// `*abort`
    Abort,
    /// `*pause`
    Pause,
    /// `*resume`
    Resume,
    /// `*send <path>`
    Send(String),
    /// `*upload <name>`
    Upload(String),
    /// `*delete <name>`
    Delete(String),
    /// `*exec <shell command>`
    Exec(String),
    /// `*monitor on|off`
    Monitor(bool),
    /// `*update[ hexfile]`
    Update(Option<String>),
    /// `*bounce`
    Bounce,
    /// `*auto on|off`
    Auto(bool),
    /// `*exit`
    Exit,
    /// Raw G-code
    Gcode(String),
}

fn argument(rest: &str) -> Option<String> {
    let rest = rest.trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

fn required(command: &str, rest: &str) -> Result<String, UserError> {
    argument(rest).ok_or_else(|| UserError::InvalidArgument {
        reason: format!("*{} needs an argument", command),
    })
}

fn switch(command: &str, rest: &str) -> Result<bool, UserError> {
    match rest.trim() {
        "on" => Ok(true),
        "off" => Ok(false),
        _ => Err(UserError::InvalidCommand {
            command: format!("{} {}", command, rest.trim()).trim_end().to_string(),
        }),
    }
}

impl ControlCommand {
    /// Parse one line; `Ok(None)` for blank lines
    pub fn parse(line: &str) -> Result<Option<Self>, UserError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(body) = line.strip_prefix('*') else {
            return Ok(Some(ControlCommand::Gcode(line.to_string())));
        };
        let (word, rest) = body.split_once(' ').unwrap_or((body, ""));
        let command = match word {
            "status" => ControlCommand::Status,
            "list" => ControlCommand::List,
            "clear" => ControlCommand::Clear,
            "clearkick" => ControlCommand::ClearKick,
            "kick" => ControlCommand::Kick(argument(rest)),
            "abort" => ControlCommand::Abort,
            "pause" => ControlCommand::Pause,
            "resume" => ControlCommand::Resume,
            "send" => ControlCommand::Send(required(word, rest)?),
            "upload" => ControlCommand::Upload(required(word, rest)?),
            "delete" => ControlCommand::Delete(required(word, rest)?),
            "exec" => ControlCommand::Exec(required(word, rest)?),
            "monitor" => ControlCommand::Monitor(switch(word, rest)?),
            "update" => ControlCommand::Update(argument(rest)),
            "bounce" => ControlCommand::Bounce,
            "auto" => ControlCommand::Auto(switch(word, rest)?),
            "exit" => ControlCommand::Exit,
            _ => {
                return Err(UserError::InvalidCommand {
                    command: body.to_string(),
                })
            }
        };
        Ok(Some(command))
    }

    /// True for commands whose reply goes only to the issuing client
    pub fn is_private(&self) -> bool {
        matches!(self, ControlCommand::Status | ControlCommand::List)
    }
}

impl fmt::Display for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on_off = |on: bool| if on { "on" } else { "off" };
        match self {
            ControlCommand::Status => f.write_str("*status"),
            ControlCommand::List => f.write_str("*list"),
            ControlCommand::Clear => f.write_str("*clear"),
            ControlCommand::ClearKick => f.write_str("*clearkick"),
            ControlCommand::Kick(None) => f.write_str("*kick"),
            ControlCommand::Kick(Some(name)) => write!(f, "*kick {}", name),
            ControlCommand::Abort => f.write_str("*abort"),
            ControlCommand::Pause => f.write_str("*pause"),
            ControlCommand::Resume => f.write_str("*resume"),
            ControlCommand::Send(path) => write!(f, "*send {}", path),
            ControlCommand::Upload(name) => write!(f, "*upload {}", name),
            ControlCommand::Delete(name) => write!(f, "*delete {}", name),
            ControlCommand::Exec(cmd) => write!(f, "*exec {}", cmd),
            ControlCommand::Monitor(on) => write!(f, "*monitor {}", on_off(*on)),
            ControlCommand::Update(None) => f.write_str("*update"),
            ControlCommand::Update(Some(hex)) => write!(f, "*update {}", hex),
            ControlCommand::Bounce => f.write_str("*bounce"),
            ControlCommand::Auto(on) => write!(f, "*auto {}", on_off(*on)),
            ControlCommand::Exit => f.write_str("*exit"),
            ControlCommand::Gcode(line) => f.write_str(line),
        }
    }
}
