//! GX reply parsing into [`DeviceStatus`]
//!
//! Replies are `Key: Value` lines after the `CMD Mxxx Received.` echo.
//! Values made of `k:v` tokens (`X: 140 Y: 140 Z: 140`,
//! `Endstop: X-max:0 Y-max:0`) are parsed as maps of floats.

use crate::firmware::marlin::response_parser::parse_temperatures;
use printgate_core::{DeviceState, DeviceStatus, ProtocolError};
use std::collections::BTreeMap;

/// Parsed `Key: Value` value
#[derive(Debug, Clone, PartialEq)]
pub enum MapValue {
    /// Plain text
    Text(String),
    /// `k:v` tokens
    Map(BTreeMap<String, f64>),
}

/// Parse a value, detecting `k:v` token lists
pub fn parse_map_value(value: &str) -> MapValue {
    if !value.find(':').is_some_and(|i| i > 0) {
        return MapValue::Text(value.trim().to_string());
    }
    let value = value.replace(": ", ":");
    let map = value
        .split(' ')
        .filter_map(|tok| {
            let (k, v) = tok.split_once(':')?;
            Some((k.to_string(), v.trim().parse().ok()?))
        })
        .collect();
    MapValue::Map(map)
}

/// Split `Key: Value` lines
pub fn parse_map_lines(lines: &[String]) -> BTreeMap<String, MapValue> {
    lines
        .iter()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_string(), parse_map_value(value.trim_start())))
        })
        .collect()
}

/// `M115`: machine facts and build volume
pub fn apply_info(body: &[String], status: &mut DeviceStatus) {
    for line in body {
        if line.starts_with("X:") {
            if let MapValue::Map(volume) = parse_map_value(line) {
                for (axis, size) in volume {
                    status.info.insert(format!("volume_{}", axis.to_lowercase()), size.to_string());
                }
            }
        } else if let Some((key, value)) = line.split_once(':') {
            let key = key.trim().to_lowercase().replace(' ', "_");
            status.info.insert(key, value.trim().to_string());
        }
    }
}

/// `M119`: endstops, machine state and current file
pub fn apply_status(body: &[String], status: &mut DeviceStatus) -> Result<(), ProtocolError> {
    for (key, value) in parse_map_lines(body) {
        match (key.as_str(), value) {
            ("Endstop", MapValue::Map(stops)) => {
                for (name, state) in stops {
                    let (axis, end) = name.split_once('-').unwrap_or((name.as_str(), "max"));
                    let target = if end == "min" {
                        &mut status.estop.min
                    } else {
                        &mut status.estop.max
                    };
                    target.insert(axis.to_string(), state.to_string());
                }
            }
            ("MachineStatus", MapValue::Text(state)) => {
                status.state = match state.as_str() {
                    "READY" => DeviceState::Idle,
                    "BUILDING_FROM_SD" | "BUILDING" => DeviceState::Printing,
                    "PAUSED" => DeviceState::Paused,
                    other => {
                        return Err(ProtocolError::ResponseParse {
                            reason: format!("unknown machine status {:?}", other),
                        })
                    }
                };
                status.print.run = status.state.is_busy();
            }
            ("CurrentFile", MapValue::Text(file)) => {
                status.print.filename = (!file.is_empty()).then_some(file);
            }
            _ => {}
        }
    }
    Ok(())
}

/// `M27`: `SD printing byte <done>/<total>`
pub fn apply_progress(body: &[String], status: &mut DeviceStatus) -> Result<(), ProtocolError> {
    let line = body.first().map(String::as_str).unwrap_or_default();
    let fraction = line
        .rsplit(' ')
        .next()
        .and_then(|f| f.split_once('/'))
        .and_then(|(done, total)| Some((done.parse::<f64>().ok()?, total.parse::<f64>().ok()?)));
    match fraction {
        Some((done, total)) => {
            status.print.progress = if total > 0.0 { done / total * 100.0 } else { 0.0 };
            Ok(())
        }
        None if line.contains("Not SD printing") => {
            status.print.progress = 0.0;
            Ok(())
        }
        None => Err(ProtocolError::ResponseParse {
            reason: format!("bad progress line {:?}", line),
        }),
    }
}

/// `M105`: `T0:25 /0 B:24 /0`
pub fn apply_temps(body: &[String], status: &mut DeviceStatus) -> Result<(), ProtocolError> {
    let line = body.first().map(String::as_str).unwrap_or_default();
    let mut compact = line.to_string();
    while compact.contains("  /") {
        compact = compact.replace("  /", " /");
    }
    if parse_temperatures(&compact, status) {
        Ok(())
    } else {
        Err(ProtocolError::ResponseParse {
            reason: format!("bad temperature line {:?}", line),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn test_info() {
        let mut status = DeviceStatus::new();
        apply_info(
            &lines("Machine Type: Flashforge Finder\nMachine Name: lab\nFirmware: V1.5\nSN: 0042\nX: 140 Y: 140 Z: 140\nTool Count: 1"),
            &mut status,
        );
        assert_eq!(status.info["machine_type"], "Flashforge Finder");
        assert_eq!(status.info["sn"], "0042");
        assert_eq!(status.info["volume_z"], "140");
    }

    #[test]
    fn test_status() {
        let mut status = DeviceStatus::new();
        apply_status(
            &lines("Endstop: X-max:1 Y-max:0 Z-min:0\nMachineStatus: BUILDING_FROM_SD\nMoveMode: MOVING\nCurrentFile: cube.gx"),
            &mut status,
        )
        .unwrap();
        assert_eq!(status.state, DeviceState::Printing);
        assert_eq!(status.estop.max["X"], "1");
        assert_eq!(status.estop.min["Z"], "0");
        assert_eq!(status.print.filename.as_deref(), Some("cube.gx"));
    }

    #[test]
    fn test_progress_and_temps() {
        let mut status = DeviceStatus::new();
        apply_progress(&lines("SD printing byte 25/100"), &mut status).unwrap();
        assert_eq!(status.print.progress, 25.0);
        apply_temps(&lines("T0:210 /210 B:60 /60"), &mut status).unwrap();
        assert_eq!(status.temps.ext[0], [210.0, 210.0]);
        assert_eq!(status.temps.bed, [60.0, 60.0]);
    }
}
