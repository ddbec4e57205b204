//! Typed N2 messages

use super::packet::{N2Command, N2Packet};
use printgate_core::{DeviceState, DeviceStatus, PacketError};
use serde::{Deserialize, Serialize};

/// Control string that requests settings info
pub const SETTING_GETINFO: &str = "setting.getinfo";

/// Control string that requests home info
pub const HOME_GETINFO: &str = "home.getinfo";

/// `0x01` control string
pub fn client_string(text: &str) -> N2Packet {
    N2Packet::new(N2Command::ClientString).with_string(text)
}

/// `0x03` G-code line; the device expects a trailing newline
pub fn client_gcode(line: &str) -> N2Packet {
    let line = if line.ends_with('\n') {
        line.to_string()
    } else {
        format!("{}\n", line)
    };
    N2Packet::new(N2Command::ClientGcode).with_string(&line)
}

/// `0x08` start printing a stored file
pub fn start_print(filename: &str) -> N2Packet {
    N2Packet::new(N2Command::StartPrint)
        .with_byte(1)
        .with_string(filename)
        .with_string("")
}

/// `0x08` cancel the print of a stored file
pub fn cancel_print(filename: &str) -> N2Packet {
    N2Packet::new(N2Command::StartPrint)
        .with_byte(4)
        .with_string(filename)
}

/// `0x02` reply to `home.getinfo`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HomeInfo {
    /// Nozzle 0 `[measured, target]`
    pub n0: [f32; 2],
    /// Nozzle 1 `[measured, target]`
    pub n1: [f32; 2],
    /// Bed `[measured, target]`
    pub bed: [f32; 2],
    /// Feed rate pair
    pub feed: [f32; 2],
    /// Fan speed pair
    pub fan: [f32; 2],
    /// Nozzle 0 flow pair
    pub n0_flow: [f32; 2],
    /// Nozzle 1 flow pair
    pub n1_flow: [f32; 2],
    /// Percent complete
    pub progress: f32,
    /// `[position, max]` height
    pub height: [f32; 2],
    /// `[current, total]` layer
    pub layer: [u32; 2],
    /// Filament used per nozzle
    pub filament: [f32; 2],
    /// `[running, estimated from file, estimated from run]` seconds
    pub time: [u64; 3],
    /// Flag bytes
    pub flags: Vec<u8>,
    /// File being printed
    pub file: String,
}

impl HomeInfo {
    /// Decode from a home info packet
    ///
    /// Most int fields carry IEEE-754 bit patterns and are reinterpreted,
    /// not converted. Layers are plain integers.
    pub fn from_packet(packet: &N2Packet) -> Result<Self, PacketError> {
        expect(packet, N2Command::HomeInfo)?;
        let pair = |a, b| [packet.float(a), packet.float(b)];
        Ok(Self {
            n0: pair(0, 1),
            n1: pair(2, 3),
            bed: pair(4, 5),
            feed: pair(6, 21),
            fan: pair(7, 22),
            n0_flow: pair(8, 23),
            n1_flow: pair(9, 24),
            progress: packet.float(10),
            height: pair(11, 12),
            layer: [packet.int(19), packet.int(20)],
            filament: pair(25, 26),
            time: [packet.long(0), packet.long(1), packet.long(2)],
            flags: packet.bytes.clone(),
            file: packet.string(0),
        })
    }

    /// True when any heater has a target
    pub fn is_printing(&self) -> bool {
        self.n0[1] + self.n1[1] + self.bed[1] > 0.0
    }

    /// Fold into the normalized status
    pub fn apply(&self, status: &mut DeviceStatus) {
        let pair = |p: [f32; 2]| [p[0] as f64, p[1] as f64];
        status.temps.bed = pair(self.bed);
        status.temps.set_ext(0, self.n0[0] as f64, self.n0[1] as f64);
        status.temps.set_ext(1, self.n1[0] as f64, self.n1[1] as f64);
        status.print.progress = (self.progress as f64 * 100.0).round() / 100.0;
        status.state = if self.is_printing() {
            DeviceState::Printing
        } else {
            DeviceState::Idle
        };
        status.print.run = self.is_printing();
        if !self.file.is_empty() {
            status.print.filename = Some(self.file.clone());
        }
        status.print.elapsed = Some(self.time[0]);
        status.print.estimate = Some(self.time[1]);
        status.set_position("Z", self.height[0] as f64);
    }
}

/// `0x0a` reply to `setting.getinfo`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsInfo {
    /// Vendor
    pub company: String,
    /// Model name
    pub model: String,
    /// Serial number
    pub serial: String,
    /// Hardware version
    pub version: String,
    /// Firmware version
    pub firmware: String,
    /// Wired `[ip, netmask, router, dns]`
    pub net: [String; 4],
    /// Wifi `[ssid, ip, router, dns]`
    pub wifi: [String; 4],
}

impl SettingsInfo {
    /// Decode from a settings info packet
    pub fn from_packet(packet: &N2Packet) -> Result<Self, PacketError> {
        expect(packet, N2Command::SettingsInfo)?;
        let quad = |start: usize| std::array::from_fn(|i| packet.string(start + i));
        Ok(Self {
            company: packet.string(0),
            model: packet.string(1),
            serial: packet.string(2),
            version: packet.string(3),
            firmware: packet.string(13),
            net: quad(5),
            wifi: quad(9),
        })
    }

    /// Fold into the normalized status
    pub fn apply(&self, status: &mut DeviceStatus) {
        let facts = [
            ("company", &self.company),
            ("model", &self.model),
            ("serial", &self.serial),
            ("version", &self.version),
            ("firmware", &self.firmware),
            ("ip", &self.net[0]),
            ("wifi_ssid", &self.wifi[0]),
            ("wifi_ip", &self.wifi[1]),
        ];
        for (key, value) in facts {
            if !value.is_empty() {
                status.info.insert(key.to_string(), value.clone());
            }
        }
    }
}

fn expect(packet: &N2Packet, command: N2Command) -> Result<(), PacketError> {
    if packet.kind == command.id() {
        Ok(())
    } else {
        Err(PacketError::Malformed {
            offset: 4,
            reason: format!("expected {} got 0x{:02x}", command, packet.kind),
        })
    }
}
