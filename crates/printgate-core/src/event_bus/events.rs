//! Event type definitions for the event bus.
//!
//! Events fan out from device engines to control-channel clients.
//! Events are cloneable and serializable for logging/replay.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::data::PrintRecord;

/// Identity of a connected control client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Create a new unique client ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", &self.0.to_string()[..8])
    }
}

/// Root event enum for all gateway events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GatewayEvent {
    /// Traffic/engine log line, delivered to monitoring clients
    Log {
        /// Formatted log line
        line: String,
    },
    /// Direct reply line; `None` targets every client
    Reply {
        /// Receiving client
        target: Option<ClientId>,
        /// Reply text
        line: String,
    },
    /// Device lifecycle
    Device(DeviceEvent),
    /// Print lifecycle
    Print(PrintEvent),
}

impl GatewayEvent {
    /// Shorthand for a log line
    pub fn log(line: impl Into<String>) -> Self {
        GatewayEvent::Log { line: line.into() }
    }

    /// Shorthand for a reply to one client
    pub fn reply(target: Option<ClientId>, line: impl Into<String>) -> Self {
        GatewayEvent::Reply {
            target,
            line: line.into(),
        }
    }

    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            GatewayEvent::Log { .. } => EventCategory::Log,
            GatewayEvent::Reply { .. } => EventCategory::Reply,
            GatewayEvent::Device(_) => EventCategory::Device,
            GatewayEvent::Print(_) => EventCategory::Print,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            GatewayEvent::Log { line } => line.clone(),
            GatewayEvent::Reply { line, .. } => line.clone(),
            GatewayEvent::Device(e) => e.description(),
            GatewayEvent::Print(e) => e.description(),
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Traffic log lines.
    Log,
    /// Client replies.
    Reply,
    /// Device lifecycle events.
    Device,
    /// Print lifecycle events.
    Print,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Log => write!(f, "Log"),
            EventCategory::Reply => write!(f, "Reply"),
            EventCategory::Device => write!(f, "Device"),
            EventCategory::Print => write!(f, "Print"),
        }
    }
}

/// Device lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// Link opened
    Opened {
        /// Port path or `host:port`
        target: String,
    },
    /// Boot banner seen or boot timeout expired
    Ready,
    /// Link closed
    Closed {
        /// Port path or `host:port`
        target: String,
    },
    /// Device or protocol error
    Fault {
        /// Error text
        cause: String,
    },
}

impl DeviceEvent {
    /// Get a short description of this event
    pub fn description(&self) -> String {
        match self {
            DeviceEvent::Opened { target } => format!("open: {}", target),
            DeviceEvent::Ready => "device ready".to_string(),
            DeviceEvent::Closed { target } => format!("close: {}", target),
            DeviceEvent::Fault { cause } => format!("fault: {}", cause),
        }
    }
}

/// Print lifecycle events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PrintEvent {
    /// Print started
    Started {
        /// File being printed
        filename: String,
        /// Lines queued
        lines: usize,
    },
    /// Print finished
    Finished(PrintRecord),
    /// Print aborted
    Aborted,
}

impl PrintEvent {
    /// Get a short description of this event
    pub fn description(&self) -> String {
        match self {
            PrintEvent::Started { filename, lines } => {
                format!("print head {} ({} lines)", filename, lines)
            }
            PrintEvent::Finished(rec) => format!("print done {:.2} min", rec.minutes),
            PrintEvent::Aborted => "print aborted".to_string(),
        }
    }
}
