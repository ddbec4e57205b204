//! Data models for printer status and print bookkeeping
//!
//! This module provides:
//! - `DeviceStatus`, the normalized record every driver populates
//! - Temperature, endstop and buffer sub-records
//! - `PrintRecord`, one line of print history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Coarse device state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// No link to the device
    #[default]
    Offline,
    /// Link is being opened or the device is booting
    Connecting,
    /// Ready for commands
    Idle,
    /// Streaming or running a print
    Printing,
    /// Queue drain halted by the operator
    Paused,
    /// Firmware update in progress
    Flashing,
}

impl DeviceState {
    /// Check if the device can accept commands
    pub fn is_online(&self) -> bool {
        matches!(
            self,
            DeviceState::Idle | DeviceState::Printing | DeviceState::Paused
        )
    }

    /// Check if a print job is active (running or paused)
    pub fn is_busy(&self) -> bool {
        matches!(self, DeviceState::Printing | DeviceState::Paused)
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Offline => "offline",
            DeviceState::Connecting => "connecting",
            DeviceState::Idle => "idle",
            DeviceState::Printing => "printing",
            DeviceState::Paused => "paused",
            DeviceState::Flashing => "flashing",
        };
        f.write_str(name)
    }
}

/// Measured/target pair, serialized as `[measured, target]`
pub type TempPair = [f64; 2];

/// Bed and extruder temperatures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Temperatures {
    /// Heated bed
    pub bed: TempPair,
    /// One entry per extruder
    pub ext: Vec<TempPair>,
}

impl Default for Temperatures {
    fn default() -> Self {
        Self {
            bed: [0.0, 0.0],
            ext: vec![[0.0, 0.0]],
        }
    }
}

impl Temperatures {
    /// Set measured and target for an extruder, growing the list as needed
    pub fn set_ext(&mut self, index: usize, measured: f64, target: f64) {
        if self.ext.len() <= index {
            self.ext.resize(index + 1, [0.0, 0.0]);
        }
        self.ext[index] = [measured, target];
    }

    /// True when any heater has a non-zero target
    pub fn any_target(&self) -> bool {
        self.bed[1] > 0.0 || self.ext.iter().any(|e| e[1] > 0.0)
    }
}

/// Endstop states keyed by axis letter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endstops {
    /// `<axis>_min` states
    pub min: BTreeMap<String, String>,
    /// `<axis>_max` states
    pub max: BTreeMap<String, String>,
}

/// Flow control counters of a line-protocol engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStatus {
    /// Sent, unacknowledged commands
    pub waiting: usize,
    /// Maximum in flight
    pub bufmax: usize,
    /// Queue depth
    pub queue: usize,
    /// Largest queue depth seen during the current print
    pub maxout: usize,
}

/// Link lifecycle timestamps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkStatus {
    /// True once connected and past boot
    pub ready: bool,
    /// Last boot banner
    pub boot: Option<DateTime<Utc>>,
    /// Last successful open
    pub connect: Option<DateTime<Utc>>,
    /// Last close
    pub close: Option<DateTime<Utc>>,
    /// Last line received
    pub line: Option<DateTime<Utc>>,
}

/// Current or last print job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrintInfo {
    /// A print is running
    pub run: bool,
    /// Operator confirmed the bed is clear
    pub clear: bool,
    /// File being printed
    pub filename: Option<String>,
    /// Percent complete, 0..=100
    pub progress: f64,
    /// Job start (re-stamped by the slicer start marker)
    pub start: Option<DateTime<Utc>>,
    /// Original start before the slicer start marker
    pub prep: Option<DateTime<Utc>>,
    /// Job end
    pub end: Option<DateTime<Utc>>,
    /// Estimated print time in seconds, when known
    pub estimate: Option<u64>,
    /// Elapsed print time in seconds, when reported by the device
    pub elapsed: Option<u64>,
}

/// Last device or protocol error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// When it happened
    pub time: DateTime<Utc>,
    /// Error text
    pub cause: String,
}

impl ErrorRecord {
    /// Stamp an error now
    pub fn now(cause: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            cause: cause.into(),
        }
    }
}

/// Normalized device status
///
/// Mutated only by the owning engine or connection, read freely by
/// status reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Coarse state
    pub state: DeviceState,
    /// Temperatures
    pub temps: Temperatures,
    /// Axis positions keyed by axis letter (`X`, `Y`, `Z`, `E`)
    pub position: BTreeMap<String, f64>,
    /// Print job
    pub print: PrintInfo,
    /// Firmware settings groups (`steps_per`, `pid`, ...) keyed by axis letter
    pub settings: BTreeMap<String, BTreeMap<String, f64>>,
    /// Endstops
    pub estop: Endstops,
    /// Flow control counters
    pub buffer: BufferStatus,
    /// Link lifecycle
    pub device: LinkStatus,
    /// Last error
    pub error: Option<ErrorRecord>,
    /// Free-form device facts (firmware, serial number, machine type)
    pub info: BTreeMap<String, String>,
}

impl DeviceStatus {
    /// Create an offline status
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an error now
    pub fn record_error(&mut self, cause: impl Into<String>) {
        self.error = Some(ErrorRecord::now(cause));
    }

    /// Set an axis position
    pub fn set_position(&mut self, axis: &str, value: f64) {
        self.position.insert(axis.to_string(), value);
    }
}

/// One completed print, appended to the history file as a JSON line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintRecord {
    /// File that was printed
    pub filename: String,
    /// Start time
    pub start: DateTime<Utc>,
    /// End time
    pub end: DateTime<Utc>,
    /// Duration in minutes
    pub minutes: f64,
    /// Lines streamed
    pub lines: usize,
}

impl PrintRecord {
    /// Build a record from start/end stamps
    pub fn new(filename: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>, lines: usize) -> Self {
        let millis = (end - start).num_milliseconds().max(0) as f64;
        Self {
            filename: filename.into(),
            start,
            end,
            minutes: millis / 60_000.0,
            lines,
        }
    }
}
