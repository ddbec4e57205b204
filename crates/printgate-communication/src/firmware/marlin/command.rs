//! Queued command records

use printgate_core::Result;
use std::fmt;
use tokio::sync::oneshot;

/// Lines whose first character marks a command the device acknowledges
pub const COMMAND_PREFIXES: [char; 5] = ['G', 'M', '$', '?', '~'];

/// Check if a transmitted line will be answered with `ok`/`error:`
pub fn is_counted(line: &str) -> bool {
    line.chars().next().is_some_and(|c| COMMAND_PREFIXES.contains(&c))
}

/// Check if a line gets `N<seq> ... *<sum>` framing in checksum mode
pub fn is_numbered(line: &str) -> bool {
    line.starts_with('G') || line.starts_with('M')
}

/// Options attached to a queued line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandFlags {
    /// Insert after the leading run of priority records
    pub priority: bool,
    /// Generated by the auto-poller; not logged
    pub auto: bool,
    /// Part of a file print; logged only in verbose mode
    pub print: bool,
    /// Line number assigned at transmit time in checksum mode
    pub line_number: Option<u64>,
}

impl CommandFlags {
    /// Flags for an operator command
    pub fn priority() -> Self {
        Self {
            priority: true,
            ..Self::default()
        }
    }

    /// Flags for a line of a streamed file
    pub fn print() -> Self {
        Self {
            print: true,
            ..Self::default()
        }
    }

    /// Flags for an auto-poll query
    pub fn auto() -> Self {
        Self {
            priority: true,
            auto: true,
            ..Self::default()
        }
    }
}

/// Work to run when the device acknowledges a line
#[derive(Debug)]
pub enum AckHook {
    /// Re-arm the auto-poller for this command
    AutoPoll(String),
    /// Slicer start marker reached: re-stamp the print start
    PrintStart,
    /// Hand the collected reply lines to a waiting caller
    Reply(oneshot::Sender<Result<Vec<String>>>),
}

/// One queued line
#[derive(Debug)]
pub struct CommandRecord {
    /// Line text, trimmed
    pub line: String,
    /// Queue and logging options
    pub flags: CommandFlags,
    /// Completion work, if any
    pub hook: Option<AckHook>,
}

impl CommandRecord {
    /// Create a record without a completion hook
    pub fn new(line: impl Into<String>, flags: CommandFlags) -> Self {
        Self {
            line: line.into(),
            flags,
            hook: None,
        }
    }

    /// Attach a completion hook
    pub fn with_hook(mut self, hook: AckHook) -> Self {
        self.hook = Some(hook);
        self
    }
}

impl fmt::Display for CommandRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.line)
    }
}

/// A transmitted line awaiting its acknowledgment
#[derive(Debug)]
pub struct PendingMatch {
    /// Line as sent, before checksum framing
    pub line: String,
    /// Flags it was queued with
    pub flags: CommandFlags,
    /// Completion work
    pub hook: Option<AckHook>,
}
