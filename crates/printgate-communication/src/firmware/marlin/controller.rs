//! Async driver for the Marlin engine
//!
//! One task owns the link and the [`SerialEngine`]. Everything else talks to
//! it through a [`ControllerHandle`]: commands go over an mpsc channel and
//! status is read from a shared snapshot refreshed after every event.

use super::command::{AckHook, CommandFlags, CommandRecord};
use super::engine::{EngineAction, EngineConfig, LinkState, SerialEngine};
use super::history::PrintHistory;
use crate::communication::{Connector, LineFramer, Link};
use parking_lot::RwLock;
use printgate_core::{DeviceStatus, Error, EventBus, Result, TransportError, UserError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Controller tuning on top of the engine settings
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Protocol engine settings
    pub engine: EngineConfig,
    /// Delay before reopening a dropped link
    pub reconnect_interval: Duration,
    /// How long to wait for the boot banner before assuming ready
    pub boot_timeout: Duration,
    /// Completed prints are appended here
    pub history: Option<PathBuf>,
    /// Shell command used by `flash`; `{port}` and `{hex}` are substituted
    pub flash_command: Option<String>,
    /// Hex file used when `flash` is given none
    pub default_hexfile: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            reconnect_interval: Duration::from_secs(1),
            boot_timeout: Duration::from_secs(5),
            history: None,
            flash_command: None,
            default_hexfile: None,
        }
    }
}

/// Requests accepted by the controller task
#[derive(Debug)]
pub enum ControllerCommand {
    /// Queue a line
    Enqueue {
        /// G-code line
        line: String,
        /// Queue options
        flags: CommandFlags,
        /// Receives the collected reply lines on acknowledgment
        reply: Option<oneshot::Sender<Result<Vec<String>>>>,
    },
    /// Halt queue drain
    Pause,
    /// Resume queue drain
    Resume,
    /// Cancel queued work and reset the device
    Abort,
    /// Mark the bed clear
    ClearBed,
    /// Toggle auto-polling
    SetAuto(bool),
    /// Stream a file
    StartPrint {
        /// Display name
        filename: String,
        /// File contents
        gcode: String,
        /// Receives the number of lines queued
        reply: oneshot::Sender<Result<usize>>,
    },
    /// Close and reopen the link
    Bounce,
    /// Run the firmware flash command
    Flash {
        /// Hex image, or the configured default
        hexfile: Option<PathBuf>,
        /// Receives the outcome
        reply: oneshot::Sender<Result<()>>,
    },
    /// Close the link and stop the task
    Shutdown,
}

/// Cloneable handle to a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControllerCommand>,
    status: Arc<RwLock<DeviceStatus>>,
}

impl ControllerHandle {
    /// Send a raw command
    pub async fn send(&self, command: ControllerCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| TransportError::Closed.into())
    }

    /// Queue a line without waiting for its acknowledgment
    pub async fn enqueue(&self, line: impl Into<String>, flags: CommandFlags) -> Result<()> {
        self.send(ControllerCommand::Enqueue {
            line: line.into(),
            flags,
            reply: None,
        })
        .await
    }

    /// Queue a priority line and wait for the lines collected before its `ok`
    pub async fn request(&self, line: impl Into<String>) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::Enqueue {
            line: line.into(),
            flags: CommandFlags::priority(),
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_| Error::from(TransportError::Closed))?
    }

    /// Start streaming a file
    pub async fn start_print(&self, filename: impl Into<String>, gcode: String) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::StartPrint {
            filename: filename.into(),
            gcode,
            reply,
        })
        .await?;
        rx.await.map_err(|_| Error::from(TransportError::Closed))?
    }

    /// Flash firmware and reopen the link
    pub async fn flash(&self, hexfile: Option<PathBuf>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(ControllerCommand::Flash { hexfile, reply }).await?;
        rx.await.map_err(|_| Error::from(TransportError::Closed))?
    }

    /// Latest status snapshot
    pub fn status(&self) -> DeviceStatus {
        self.status.read().clone()
    }
}

enum Wake {
    Read(Result<usize>),
    Command(Option<ControllerCommand>),
    Auto,
    BootTimeout,
    Reconnect,
}

async fn read_link(link: &mut Option<Box<dyn Link>>, buf: &mut [u8]) -> Result<usize> {
    match link {
        Some(link) => link.read(buf).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Task that owns one serial device
pub struct SerialController {
    connector: Arc<dyn Connector>,
    config: ControllerConfig,
    engine: SerialEngine,
    bus: Arc<EventBus>,
    rx: mpsc::Receiver<ControllerCommand>,
    status: Arc<RwLock<DeviceStatus>>,
    link: Option<Box<dyn Link>>,
    framer: LineFramer,
    history: Option<PrintHistory>,
    boot_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,
    running: bool,
}

impl SerialController {
    /// Spawn the controller task
    pub fn spawn(
        connector: Arc<dyn Connector>,
        config: ControllerConfig,
        bus: Arc<EventBus>,
    ) -> (ControllerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(256);
        let status = Arc::new(RwLock::new(DeviceStatus::new()));
        let controller = Self {
            connector,
            engine: SerialEngine::new(config.engine.clone()),
            history: config.history.clone().map(PrintHistory::new),
            config,
            bus,
            rx,
            status: status.clone(),
            link: None,
            framer: LineFramer::new(),
            boot_deadline: None,
            reconnect_at: None,
            running: true,
        };
        let task = tokio::spawn(controller.run());
        (ControllerHandle { tx, status }, task)
    }

    async fn run(mut self) {
        self.open().await;
        let mut auto = tokio::time::interval(self.config.engine.auto_interval);
        auto.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; 4096];

        while self.running {
            let boot_deadline = self.boot_deadline;
            let reconnect_at = self.reconnect_at;
            let wake = tokio::select! {
                res = read_link(&mut self.link, &mut buf) => Wake::Read(res),
                cmd = self.rx.recv() => Wake::Command(cmd),
                _ = auto.tick() => Wake::Auto,
                _ = sleep_until(boot_deadline) => Wake::BootTimeout,
                _ = sleep_until(reconnect_at) => Wake::Reconnect,
            };

            match wake {
                Wake::Read(Ok(0)) => self.drop_link("closed by device").await,
                Wake::Read(Ok(n)) => {
                    for line in self.framer.push(&buf[..n]) {
                        self.engine.handle_line(&line);
                    }
                    if self.engine.link_state() == LinkState::Ready {
                        self.boot_deadline = None;
                    }
                }
                Wake::Read(Err(e)) => self.drop_link(&e.to_string()).await,
                Wake::Command(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Command(None) => self.shutdown().await,
                Wake::Auto => self.engine.auto_tick(),
                Wake::BootTimeout => {
                    self.boot_deadline = None;
                    self.engine.boot_timeout();
                }
                Wake::Reconnect => {
                    self.reconnect_at = None;
                    self.open().await;
                }
            }
            self.apply_actions().await;
        }
        tracing::debug!("serial controller for {} stopped", self.connector.target());
    }

    async fn open(&mut self) {
        let target = self.connector.target();
        self.engine.link_connecting();
        self.publish_status();
        match self.connector.connect().await {
            Ok(link) => {
                self.framer = LineFramer::new();
                self.link = Some(link);
                self.engine.link_opened(&target);
                self.boot_deadline = Some(Instant::now() + self.config.boot_timeout);
                self.reconnect_at = None;
            }
            Err(e) => {
                self.engine.link_failed(&target, &e.to_string());
                self.schedule_reconnect();
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.running {
            self.reconnect_at = Some(Instant::now() + self.config.reconnect_interval);
        }
    }

    async fn close_link(&mut self, reason: &str) {
        if let Some(mut link) = self.link.take() {
            let target = link.target().to_string();
            if let Err(e) = link.shutdown().await {
                tracing::debug!("shutdown {}: {}", target, e);
            }
            tracing::info!("link {} closed: {}", target, reason);
            self.engine.link_closed(&target);
        }
        self.boot_deadline = None;
    }

    async fn drop_link(&mut self, reason: &str) {
        self.close_link(reason).await;
        self.schedule_reconnect();
    }

    async fn shutdown(&mut self) {
        self.running = false;
        self.reconnect_at = None;
        self.close_link("shutdown").await;
    }

    async fn handle_command(&mut self, cmd: ControllerCommand) {
        match cmd {
            ControllerCommand::Enqueue { line, flags, reply } => {
                let mut record = CommandRecord::new(line, flags);
                if let Some(reply) = reply {
                    record = record.with_hook(AckHook::Reply(reply));
                }
                self.engine.enqueue_record(record);
            }
            ControllerCommand::Pause => self.engine.pause(),
            ControllerCommand::Resume => self.engine.resume(),
            ControllerCommand::Abort => self.engine.abort(),
            ControllerCommand::ClearBed => self.engine.clear_bed(),
            ControllerCommand::SetAuto(on) => self.engine.set_auto(on),
            ControllerCommand::StartPrint {
                filename,
                gcode,
                reply,
            } => {
                let _ = reply.send(self.engine.start_print(&filename, &gcode));
            }
            ControllerCommand::Bounce => {
                self.close_link("bounce").await;
                self.reconnect_at = Some(Instant::now());
            }
            ControllerCommand::Flash { hexfile, reply } => {
                let result = self.flash(hexfile).await;
                let _ = reply.send(result);
            }
            ControllerCommand::Shutdown => self.shutdown().await,
        }
    }

    async fn flash(&mut self, hexfile: Option<PathBuf>) -> Result<()> {
        let template = self
            .config
            .flash_command
            .clone()
            .ok_or_else(|| UserError::InvalidArgument {
                reason: "no flash command configured".to_string(),
            })?;
        let hexfile = hexfile
            .or_else(|| self.config.default_hexfile.clone())
            .ok_or_else(|| UserError::InvalidArgument {
                reason: "no hex file given".to_string(),
            })?;
        if !tokio::fs::try_exists(&hexfile).await.unwrap_or(false) {
            return Err(UserError::MissingFile {
                path: hexfile.display().to_string(),
            }
            .into());
        }

        let port = self.connector.target();
        let command = template
            .replace("{port}", &port)
            .replace("{hex}", &hexfile.display().to_string());

        self.engine.set_flashing(true);
        self.bus.log(format!("*** flashing {} ***", hexfile.display()));
        self.reconnect_at = None;
        self.close_link("flashing").await;
        self.publish_status();

        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .await;

        self.engine.set_flashing(false);
        let result = match output {
            Ok(out) => {
                for line in String::from_utf8_lossy(&out.stdout)
                    .lines()
                    .chain(String::from_utf8_lossy(&out.stderr).lines())
                {
                    self.bus.log(line.to_string());
                }
                if out.status.success() {
                    self.bus.log("*** flash complete ***");
                    Ok(())
                } else {
                    Err(Error::other(format!("flash command exited with {}", out.status)))
                }
            }
            Err(e) => Err(e.into()),
        };
        self.open().await;
        result
    }

    async fn apply_actions(&mut self) {
        loop {
            let actions = self.engine.take_actions();
            if actions.is_empty() {
                break;
            }
            for action in actions {
                match action {
                    EngineAction::Write(line) => self.write_line(&line).await,
                    EngineAction::CloseLink => self.drop_link("reset requested").await,
                    EngineAction::Publish(event) => {
                        self.bus.emit(event);
                    }
                    EngineAction::PrintFinished(record) => {
                        if let Some(history) = &self.history {
                            if let Err(e) = history.append(&record).await {
                                tracing::warn!("history {}: {}", history.path().display(), e);
                            }
                        }
                    }
                }
            }
        }
        self.publish_status();
    }

    async fn write_line(&mut self, line: &str) {
        let Some(link) = self.link.as_mut() else {
            tracing::warn!("dropping write with no link: {}", line);
            return;
        };
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        if let Err(e) = link.write_all(&data).await {
            self.drop_link(&e.to_string()).await;
        }
    }

    fn publish_status(&self) {
        *self.status.write() = self.engine.status();
    }
}
