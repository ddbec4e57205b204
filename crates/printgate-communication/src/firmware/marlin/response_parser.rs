//! Marlin reply classification and telemetry parsing
//!
//! Telemetry lines update a [`DeviceStatus`] in place:
//! - `T:<t> /<target> B:<t> /<target>` (M105)
//! - `X:<v> Y:<v> Z:<v> E:<v> Count ...` (M114)
//! - `<axis>_min: <state>` / `<axis>_max: <state>` (M119)
//! - `echo:  M<code> <tok>...` (M503 settings echo)

use super::checksum::parse_resend;
use printgate_core::DeviceStatus;
use std::collections::BTreeMap;

/// What a device line means to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceLine<'a> {
    /// `ok` with optional trailing payload
    Ok {
        /// Text after `ok `
        payload: Option<&'a str>,
    },
    /// `error:<msg>` acknowledgment
    Rejected(&'a str),
    /// Reset banner
    Banner,
    /// `Resend: <n>`
    Resend(u64),
    /// `Error:<cause>`
    Fault(&'a str),
    /// Anything else
    Other,
}

/// Classify one trimmed line
pub fn classify(line: &str) -> DeviceLine<'_> {
    if line.starts_with("ok") {
        let payload = line.strip_prefix("ok ").map(str::trim).filter(|p| !p.is_empty());
        return DeviceLine::Ok { payload };
    }
    if let Some(msg) = line.strip_prefix("error:") {
        return DeviceLine::Rejected(msg.trim());
    }
    if line == "start" {
        return DeviceLine::Banner;
    }
    if let Some(n) = parse_resend(line) {
        return DeviceLine::Resend(n);
    }
    if let Some(cause) = line.strip_prefix("Error:") {
        return DeviceLine::Fault(cause);
    }
    DeviceLine::Other
}

/// Settings group name for an `M503` echo code
pub fn settings_group(code: &str) -> Option<&'static str> {
    Some(match code {
        "M92" => "steps_per",
        "M203" => "feedrate_max",
        "M201" => "accel_max",
        "M204" => "accel",
        "M205" => "advanced",
        "M206" => "offset",
        "M301" => "pid",
        "M900" => "lin_advance",
        _ => return None,
    })
}

fn parse_pair(value: &str) -> Option<(f64, f64)> {
    let (measured, target) = value.split_once('/')?;
    Some((measured.trim().parse().ok()?, target.trim().parse().ok()?))
}

/// Apply `T:`/`B:` temperature tokens
pub fn parse_temperatures(line: &str, status: &mut DeviceStatus) -> bool {
    let mut updated = false;
    let line = line.replace(" /", "/");
    for token in line.split(' ') {
        let Some((key, value)) = token.split_once(':') else {
            continue;
        };
        let Some((measured, target)) = parse_pair(value) else {
            continue;
        };
        match key {
            "T" => status.temps.set_ext(0, measured, target),
            "B" => status.temps.bed = [measured, target],
            _ => match key.strip_prefix('T').and_then(|n| n.parse::<usize>().ok()) {
                Some(index) => status.temps.set_ext(index, measured, target),
                None => continue,
            },
        }
        updated = true;
    }
    updated
}

/// Replace the position map from an `M114` reply; first occurrence of an axis wins
pub fn parse_position(line: &str, status: &mut DeviceStatus) -> bool {
    let mut position = BTreeMap::new();
    for token in line.split(' ') {
        let mut parts = token.split(':');
        let (Some(axis), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        if position.contains_key(axis) {
            continue;
        }
        if let Ok(value) = value.parse::<f64>() {
            position.insert(axis.to_string(), value);
        }
    }
    let updated = !position.is_empty();
    status.position = position;
    updated
}

/// Record one `M119` endstop line
pub fn parse_endstop(line: &str, status: &mut DeviceStatus) -> bool {
    let key = line.chars().next().map(String::from).unwrap_or_default();
    if let Some((_, state)) = line.split_once("_min:") {
        status.estop.min.insert(key, state.trim().to_string());
        true
    } else if let Some((_, state)) = line.split_once("_max:") {
        status.estop.max.insert(key, state.trim().to_string());
        true
    } else {
        false
    }
}

/// Record one `echo:  M<code> ...` settings line
pub fn parse_settings(line: &str, status: &mut DeviceStatus) -> bool {
    let Some(rest) = line.strip_prefix("echo:  ") else {
        return false;
    };
    let mut tokens = rest.split(' ').filter(|t| !t.is_empty());
    let Some(group) = tokens.next().and_then(settings_group) else {
        return false;
    };
    let map: BTreeMap<String, f64> = tokens
        .filter_map(|tok| {
            let mut chars = tok.chars();
            let key = chars.next()?;
            let value = chars.as_str().parse().ok()?;
            Some((key.to_string(), value))
        })
        .collect();
    status.settings.insert(group.to_string(), map);
    true
}

/// Apply any telemetry found in a line, returning true if status changed
pub fn apply_telemetry(line: &str, status: &mut DeviceStatus) -> bool {
    if line.starts_with("T:") {
        parse_temperatures(line, status)
    } else if line.starts_with("X:") {
        parse_position(line, status)
    } else if line.find("_min:").is_some_and(|i| i > 0) || line.find("_max:").is_some_and(|i| i > 0) {
        parse_endstop(line, status)
    } else if line.starts_with("echo:  M") {
        parse_settings(line, status)
    } else {
        false
    }
}
