//! Loading and saving gateway configuration files

use printgate_communication::{DriverKind, SessionConfig};
use printgate_settings::{Config, ConfigError, DeviceConfig, SettingsError};
use std::time::Duration;

const SAMPLE: &str = r#"
[serial]
port = "/dev/ttyACM0"
baud = 250000
bufmax = 4
checksum = true
auto_ms = 0

[control]
listen = 9000
filedir = "/srv/gcode"
history = "/srv/gcode/history.jsonl"

[[devices]]
name = "gx1"
kind = "gx"
host = "10.0.0.20"
poll_ms = 0
attempts = 1

[devices.options]
framing = "packet"

[[devices]]
name = "n2"
kind = "n2"
host = "10.0.0.21"
"#;

#[test]
fn test_load_toml_with_defaults_for_missing_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("printgate.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let config = Config::load_from_file(&path).unwrap();
    assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM0"));
    assert_eq!(config.serial.baud, 250000);
    assert_eq!(config.serial.reconnect_ms, 1000);
    assert!(!config.serial.safety_sequence.is_empty());
    assert_eq!(config.control.listen, Some(9000));
    assert_eq!(config.control.bind, "0.0.0.0");
    assert_eq!(config.devices.len(), 2);

    let engine = config.serial.engine_config();
    assert_eq!(engine.bufmax, 4);
    assert!(engine.checksum);
    assert!(!engine.auto_poll);

    let gx = config.device("gx1").unwrap();
    assert_eq!(gx.kind, DriverKind::Gx);
    let info = gx.device_info();
    assert_eq!(info.options.get("framing").map(String::as_str), Some("packet"));
    let timing = gx.session_config(SessionConfig::default());
    assert_eq!(timing.poll_interval, None);
    assert_eq!(timing.connect_attempts, 1);
    assert_eq!(timing.idle_timeout, SessionConfig::default().idle_timeout);

    assert!(matches!(
        config.device("missing"),
        Err(SettingsError::Config(ConfigError::UnknownDevice(_)))
    ));
}

#[test]
fn test_save_then_load_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("printgate.json");

    let mut config = Config::default();
    config.serial.grbl = true;
    let mut device = DeviceConfig::new("remote", DriverKind::Grid, "gateway.local");
    device.port = Some(8899);
    config.devices.push(device);
    config.save_to_file(&path).unwrap();

    assert_eq!(Config::load_from_file(&path).unwrap(), config);
}

#[test]
fn test_save_toml_is_readable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("printgate.toml");
    let mut config = Config::default();
    config
        .devices
        .push(DeviceConfig::new("gx1", DriverKind::Gx, "10.0.0.20"));
    config.save_to_file(&path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("[[devices]]"), "{}", text);
    assert_eq!(Config::load_from_file(&path).unwrap().devices[0].name, "gx1");
}

#[test]
fn test_validation_rejects_bad_values() {
    let mut config = Config::default();
    config.serial.baud = 0;
    assert!(matches!(
        config.validate(),
        Err(SettingsError::Config(ConfigError::ValueOutOfRange { .. }))
    ));

    let mut config = Config::default();
    config.devices.push(DeviceConfig::new("a", DriverKind::N2, "h1"));
    config.devices.push(DeviceConfig::new("a", DriverKind::Gx, "h2"));
    assert!(matches!(
        config.validate(),
        Err(SettingsError::Config(ConfigError::DuplicateDevice(name))) if name == "a"
    ));

    let mut config = Config::default();
    config.devices.push(DeviceConfig::new(" ", DriverKind::N2, "h1"));
    assert!(config.validate().is_err());

    let mut config = Config::default();
    let mut device = DeviceConfig::new("gx", DriverKind::Gx, "h1");
    device.idle_ms = Some(0);
    config.devices.push(device);
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_file_is_not_saved_or_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("printgate.toml");
    let mut config = Config::default();
    config.serial.bufmax = 0;
    assert!(config.save_to_file(&path).is_err());
    assert!(!path.exists());

    std::fs::write(&path, "[serial]\nbufmax = 0\n").unwrap();
    assert!(Config::load_from_file(&path).is_err());
    assert!(matches!(
        Config::load_from_file(&dir.path().join("printgate.yaml")),
        Err(SettingsError::Config(ConfigError::UnsupportedFormat(_)))
    ));
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_or_default(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_control_and_controller_mapping() {
    let mut config = Config::default();
    config.control.bind = "127.0.0.1".to_string();
    config.control.listen = Some(9001);
    let control = config.control.control_config().unwrap();
    assert_eq!(control.listen.unwrap().port(), 9001);

    config.control.bind = "not an address".to_string();
    assert!(config.control.control_config().is_err());

    config.control.listen = None;
    assert!(config.control.control_config().unwrap().listen.is_none());

    let controller = config.serial.controller_config(None);
    assert_eq!(controller.reconnect_interval, Duration::from_millis(1000));
    assert_eq!(controller.boot_timeout, Duration::from_millis(5000));
}
