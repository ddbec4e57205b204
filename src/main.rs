//! PrintGate CLI: serve a serial printer, probe ports, talk to network printers.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use printgate::{init_logging, Config, DeviceConfig, DriverKind, PrintEntry, PrinterDriver};
use printgate_communication::firmware::gx::GxFile;
use printgate_communication::firmware::marlin::ControllerCommand;
use printgate_communication::{
    list_ports, ControlServer, DriverApi, DriverRegistry, GridDriver, GxDriver, N2Driver,
    SerialConnector, SerialController, SessionConfig,
};
use printgate_core::{EventBus, GatewayEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "printgate",
    version,
    about = "Print gateway for serial and network 3D printers"
)]
struct Cli {
    /// Config file (.toml or .json); defaults to the platform config dir
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Drive a serial printer and serve the control channel.
    Serve(ServeArgs),

    /// List serial ports.
    Probe {
        /// Only ports that look like printers
        #[arg(long)]
        printers: bool,
    },

    /// Show the status of a configured network device as JSON.
    Status {
        /// Device name from the config file
        device: String,
    },

    /// Upload a file to a configured network device and start it.
    Print {
        /// Device name from the config file
        device: String,
        /// G-code (or .gx) file
        #[arg(value_name = "FILE")]
        file: PathBuf,
        /// Estimated print time in seconds
        #[arg(long)]
        seconds: Option<u64>,
        /// Estimated filament in millimetres
        #[arg(long)]
        filament: Option<f64>,
    },

    /// Cancel the print on a configured network device.
    Cancel {
        /// Device name from the config file
        device: String,
    },

    /// Set the machine name of a configured GX device.
    Rename {
        /// Device name from the config file
        device: String,
        /// New machine name
        name: String,
    },

    /// Wrap G-code in a .gx container.
    GxPack {
        /// G-code input
        #[arg(value_name = "FILE")]
        input: PathBuf,
        /// Output path; the input with a .gx extension by default
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Estimated print time in seconds
        #[arg(long)]
        seconds: Option<u32>,
        /// Estimated filament in millimetres
        #[arg(long)]
        filament: Option<u32>,
    },
}

/// Overrides for the `[serial]` and `[control]` config sections
#[derive(Args, Debug)]
struct ServeArgs {
    /// Serial device path
    #[arg(long)]
    device: Option<String>,
    /// Baud rate
    #[arg(long)]
    baud: Option<u32>,
    /// Control channel TCP port
    #[arg(long)]
    listen: Option<u16>,
    /// Upload and print directory
    #[arg(long)]
    filedir: Option<PathBuf>,
    /// Telemetry poll interval in ms; 0 disables
    #[arg(long)]
    auto: Option<u64>,
    /// Unacknowledged commands in flight
    #[arg(long)]
    buflen: Option<usize>,
    /// Grbl command mode
    #[arg(long)]
    grbl: bool,
    /// Checksummed line framing
    #[arg(long)]
    checksum: bool,
    /// Spool prints to the device SD card
    #[arg(long)]
    sdspool: bool,
    /// Treat unknown-command replies as fatal
    #[arg(long)]
    fragile: bool,
    /// Log every streamed print line
    #[arg(long)]
    verbose: bool,
    /// Accept commands on stdin
    #[arg(long)]
    stdin: bool,
    /// Print history file
    #[arg(long, value_name = "PATH")]
    history: Option<PathBuf>,
}

impl ServeArgs {
    fn apply(&self, config: &mut Config) {
        let serial = &mut config.serial;
        if let Some(device) = &self.device {
            serial.port = Some(device.clone());
        }
        if let Some(baud) = self.baud {
            serial.baud = baud;
        }
        if let Some(auto) = self.auto {
            serial.auto_ms = auto;
        }
        if let Some(buflen) = self.buflen {
            serial.bufmax = buflen;
        }
        serial.grbl |= self.grbl;
        serial.checksum |= self.checksum;
        serial.sdspool |= self.sdspool;
        serial.fragile |= self.fragile;
        serial.verbose |= self.verbose;

        let control = &mut config.control;
        if let Some(listen) = self.listen {
            control.listen = Some(listen);
        }
        if let Some(filedir) = &self.filedir {
            control.filedir = filedir.clone();
        }
        if let Some(history) = &self.history {
            control.history = Some(history.clone());
        }
        control.stdin |= self.stdin;
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(Config::default_path);
    Config::load_or_default(&path).with_context(|| format!("loading {}", path.display()))
}

async fn serve(mut config: Config, args: &ServeArgs) -> Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let port = match config.serial.port.clone() {
        Some(port) => port,
        None => list_ports(true)?
            .into_iter()
            .next()
            .map(|p| p.port_name)
            .context("no serial printer found; pass --device")?,
    };
    tokio::fs::create_dir_all(&config.control.filedir)
        .await
        .with_context(|| format!("creating {}", config.control.filedir.display()))?;

    let bus = Arc::new(EventBus::new());
    let connector = Arc::new(SerialConnector::new(port.clone(), config.serial.baud));
    let (controller, task) = SerialController::spawn(
        connector,
        config.serial.controller_config(config.control.history.clone()),
        bus.clone(),
    );
    tracing::info!("serving {} at {} baud", port, config.serial.baud);

    let server = ControlServer::new(controller.clone(), bus, config.control.filedir.clone());
    let control = config.control.control_config()?;
    tokio::select! {
        result = server.run(&control) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }

    let _ = controller.send(ControllerCommand::Shutdown).await;
    let _ = task.await;
    Ok(())
}

fn probe(printers: bool) -> Result<()> {
    let ports = list_ports(printers)?;
    if ports.is_empty() {
        eprintln!("no serial ports found");
    }
    for port in ports {
        println!("{}", port.summary());
    }
    Ok(())
}

/// Session timing each driver uses unless the device overrides it
fn base_timing(kind: DriverKind) -> SessionConfig {
    match kind {
        DriverKind::Gx => SessionConfig {
            poll_interval: Some(Duration::from_secs(2)),
            ..SessionConfig::default()
        },
        DriverKind::N2 => SessionConfig {
            poll_interval: Some(Duration::from_secs(3)),
            ..SessionConfig::default()
        },
        DriverKind::Grid => SessionConfig {
            connect_attempts: 1,
            retry_delay: Duration::from_secs(1),
            poll_interval: Some(Duration::from_millis(500)),
            idle_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_millis(500),
        },
    }
}

/// Driver for one configured device, its events routed to tracing
fn driver_for(device: &DeviceConfig) -> Result<(Arc<dyn PrinterDriver>, SessionConfig)> {
    let timing = device.session_config(base_timing(device.kind));
    let driver: Box<dyn PrinterDriver> = match device.kind {
        DriverKind::Gx => Box::new(GxDriver::with_config(timing.clone())),
        DriverKind::N2 => Box::new(N2Driver::with_config(timing.clone())),
        DriverKind::Grid => Box::new(GridDriver::with_config(timing.clone())),
    };

    let bus = Arc::new(EventBus::new());
    forward_logs(&bus);
    let mut registry = DriverRegistry::new(DriverApi::new(bus));
    registry.register(device.kind, driver);
    Ok((registry.for_device(&device.device_info())?, timing))
}

fn forward_logs(bus: &EventBus) {
    use tokio::sync::broadcast::error::RecvError;

    let mut events = bus.receiver();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(GatewayEvent::Reply { .. }) | Err(RecvError::Lagged(_)) => {}
                Ok(event) => tracing::info!("{}", event.description()),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn status(config: &Config, name: &str) -> Result<()> {
    let device = config.device(name)?;
    let info = device.device_info();
    let (driver, timing) = driver_for(device)?;

    let mut status = driver.status(&info).await?;
    // the first poll lands one interval after the handshake
    if let Some(poll) = timing.poll_interval {
        tokio::time::sleep(poll + Duration::from_millis(250)).await;
        status = driver.status(&info).await?;
    }
    println!("{}", serde_json::to_string_pretty(&status)?);
    driver.shutdown().await;
    Ok(())
}

async fn print(
    config: &Config,
    name: &str,
    file: &Path,
    seconds: Option<u64>,
    filament: Option<f64>,
) -> Result<()> {
    let device = config.device(name)?;
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .context("file name is not valid UTF-8")?;

    let mut entry = PrintEntry::new(file_name, data);
    entry.estimated_time = seconds;
    entry.filament_used = filament;

    let (driver, _) = driver_for(device)?;
    let result = driver.send(&device.device_info(), entry).await;
    driver.shutdown().await;
    let receipt = result?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

async fn cancel(config: &Config, name: &str) -> Result<()> {
    let device = config.device(name)?;
    let (driver, _) = driver_for(device)?;
    let result = driver.cancel(&device.device_info()).await;
    driver.shutdown().await;
    result?;
    Ok(())
}

async fn rename(config: &Config, name: &str, machine_name: &str) -> Result<()> {
    let device = config.device(name)?;
    if device.kind != DriverKind::Gx {
        bail!("{} is a {:?} device; only gx devices can be renamed", name, device.kind);
    }
    let bus = Arc::new(EventBus::new());
    forward_logs(&bus);
    let mut driver = GxDriver::with_config(device.session_config(base_timing(device.kind)));
    driver.init(DriverApi::new(bus));

    let result = driver.rename(&device.device_info(), machine_name).await;
    driver.shutdown().await;
    for line in result? {
        println!("{}", line);
    }
    Ok(())
}

fn gx_pack(input: &Path, output: Option<&Path>, seconds: Option<u32>, filament: Option<u32>) -> Result<()> {
    if input.extension().is_some_and(|e| e == "gx") {
        bail!("{} is already a .gx file", input.display());
    }
    let gcode = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| input.with_extension("gx"));
    let file = GxFile::new(gcode).with_estimates(seconds, filament);
    std::fs::write(&output, file.to_bytes())
        .with_context(|| format!("writing {}", output.display()))?;
    println!("{}", output.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs)?;

    let config = load_config(cli.config.as_deref())?;
    match &cli.cmd {
        Cmd::Serve(args) => serve(config, args).await,
        Cmd::Probe { printers } => probe(*printers),
        Cmd::Status { device } => status(&config, device).await,
        Cmd::Print {
            device,
            file,
            seconds,
            filament,
        } => print(&config, device, file, *seconds, *filament).await,
        Cmd::Cancel { device } => cancel(&config, device).await,
        Cmd::Rename { device, name } => rename(&config, device, name).await,
        Cmd::GxPack {
            input,
            output,
            seconds,
            filament,
        } => gx_pack(input, output.as_deref(), *seconds, *filament),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_flags_override_config() {
        let cli = Cli::parse_from([
            "printgate", "serve", "--device", "/dev/ttyUSB1", "--baud", "250000", "--buflen", "4",
            "--auto", "0", "--grbl", "--listen", "9000",
        ]);
        let Cmd::Serve(args) = cli.cmd else {
            panic!("expected serve");
        };
        let mut config = Config::default();
        args.apply(&mut config);
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.serial.baud, 250000);
        assert_eq!(config.serial.bufmax, 4);
        assert!(config.serial.grbl);
        assert!(!config.serial.engine_config().auto_poll);
        assert_eq!(config.control.listen, Some(9000));
    }

    #[test]
    fn test_rename_takes_device_and_name() {
        let cli = Cli::parse_from(["printgate", "rename", "shop-gx", "Workshop"]);
        let Cmd::Rename { device, name } = cli.cmd else {
            panic!("expected rename");
        };
        assert_eq!(device, "shop-gx");
        assert_eq!(name, "Workshop");
    }

    #[test]
    fn test_gx_pack_writes_container() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("cube.gcode");
        std::fs::write(&input, "G28\n").unwrap();
        gx_pack(&input, None, Some(60), None).unwrap();

        let packed = std::fs::read(dir.path().join("cube.gx")).unwrap();
        let file = GxFile::parse(&packed).unwrap();
        assert_eq!(&file.gcode[..], b"G28\n");
        assert_eq!(file.print_seconds, 60);
        assert!(gx_pack(&dir.path().join("cube.gx"), None, None, None).is_err());
    }
}
