//! Control channel server
//!
//! Operators connect over TCP (or stdin) and type `*` commands or raw G-code.
//! Every client gets `*ready` on connect. Replies to `*status`, `*list` and
//! failed commands go only to the issuing client; log lines go to clients
//! that turned monitoring on, starting with the bus backlog.

use super::command::ControlCommand;
use super::files::{delete_file, list_files, read_print_file, resolve, store_upload};
use crate::communication::LineFramer;
use crate::firmware::marlin::{CommandFlags, ControllerCommand, ControllerHandle};
use printgate_core::{ClientId, Error, EventBus, GatewayEvent, Result, UserError};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};

/// Where the control channel listens
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// TCP listen address
    pub listen: Option<SocketAddr>,
    /// Also read commands from stdin
    pub stdin: bool,
    /// Directory for uploads and `*kick`
    pub filedir: PathBuf,
}

/// Output of `*exec`
#[derive(Debug, Clone, Serialize)]
pub struct ExecOutput {
    /// Command as given
    pub cmd: String,
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

/// Frame a gateway message the way clients expect it
pub fn evt(msg: impl AsRef<str>) -> String {
    format!("*** {} ***", msg.as_ref())
}

struct Shared {
    controller: ControllerHandle,
    bus: Arc<EventBus>,
    filedir: PathBuf,
    exit: watch::Sender<bool>,
    clients: AtomicUsize,
}

/// Control channel over one serial controller
#[derive(Clone)]
pub struct ControlServer {
    shared: Arc<Shared>,
}

struct Client {
    id: ClientId,
    monitoring: bool,
    framer: LineFramer,
    upload: Option<String>,
}

enum Wake {
    Read(std::io::Result<usize>),
    Event(std::result::Result<GatewayEvent, broadcast::error::RecvError>),
    Exit,
}

impl ControlServer {
    /// Server for `controller`, storing files in `filedir`
    pub fn new(controller: ControllerHandle, bus: Arc<EventBus>, filedir: impl Into<PathBuf>) -> Self {
        let (exit, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                controller,
                bus,
                filedir: filedir.into(),
                exit,
                clients: AtomicUsize::new(0),
            }),
        }
    }

    /// Upload and kick directory
    pub fn filedir(&self) -> &Path {
        &self.shared.filedir
    }

    /// Connected client count
    pub fn client_count(&self) -> usize {
        self.shared.clients.load(Ordering::Relaxed)
    }

    /// True once `*exit` was received
    pub fn exit_requested(&self) -> bool {
        *self.shared.exit.borrow()
    }

    /// Resolve when `*exit` is received
    pub async fn wait_exit(&self) {
        let mut rx = self.shared.exit.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Run the configured listeners until `*exit`
    pub async fn run(&self, config: &ControlConfig) -> Result<()> {
        let listener = match config.listen {
            Some(addr) => {
                let listener = TcpListener::bind(addr).await?;
                tracing::info!("control channel listening on {}", listener.local_addr()?);
                Some(listener)
            }
            None => None,
        };
        if config.stdin {
            let server = self.clone();
            tokio::spawn(async move {
                let stdio = tokio::io::join(tokio::io::stdin(), tokio::io::stdout());
                if let Err(e) = server.handle_client(stdio, true).await {
                    tracing::warn!("stdin channel: {}", e);
                }
            });
        }
        match listener {
            Some(listener) => self.serve(listener).await,
            None => {
                self.wait_exit().await;
                Ok(())
            }
        }
    }

    /// Accept TCP clients until `*exit`
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    tracing::info!("control client {} connected", peer);
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_client(stream, false).await {
                            tracing::debug!("control client {}: {}", peer, e);
                        }
                    });
                }
                _ = self.wait_exit() => return Ok(()),
            }
        }
    }

    /// Serve one client stream until it closes or `*exit`
    pub async fn handle_client<S>(&self, stream: S, monitoring: bool) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut events = self.shared.bus.receiver();
        let mut client = Client {
            id: ClientId::new(),
            monitoring,
            framer: LineFramer::new(),
            upload: None,
        };
        self.shared.clients.fetch_add(1, Ordering::Relaxed);
        let result = self
            .client_loop(&mut client, &mut reader, &mut writer, &mut events)
            .await;
        self.shared.clients.fetch_sub(1, Ordering::Relaxed);

        if let Some(name) = client.upload.take() {
            let data = client.framer.take_buffer();
            match store_upload(&self.shared.filedir, &name, &data).await {
                Ok(path) => {
                    tracing::info!("stored upload {} ({} bytes)", path.display(), data.len());
                    self.shared.bus.log(evt(format!("upload stored: {}", name)));
                }
                Err(e) => tracing::warn!("upload {} failed: {}", name, e),
            }
        }
        result
    }

    async fn client_loop<R, W>(
        &self,
        client: &mut Client,
        reader: &mut R,
        writer: &mut W,
        events: &mut broadcast::Receiver<GatewayEvent>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        writer.write_all(b"*ready\n").await?;
        writer.flush().await?;
        let mut buf = vec![0u8; 8192];

        loop {
            let wake = tokio::select! {
                res = reader.read(&mut buf) => Wake::Read(res),
                event = events.recv() => Wake::Event(event),
                _ = self.wait_exit() => Wake::Exit,
            };
            match wake {
                Wake::Read(Ok(0)) => return Ok(()),
                Wake::Read(Ok(n)) => {
                    client.framer.extend(&buf[..n]);
                    while let Some(line) = client.framer.next_line() {
                        if let Err(e) = self.dispatch(client, &line).await {
                            self.reply(client.id, evt(e.to_string()));
                        }
                    }
                }
                Wake::Read(Err(e)) => return Err(e.into()),
                Wake::Event(Ok(event)) => {
                    if let Some(line) = render(client, event) {
                        writer.write_all(line.as_bytes()).await?;
                        writer.write_all(b"\n").await?;
                        writer.flush().await?;
                    }
                }
                Wake::Event(Err(broadcast::error::RecvError::Lagged(n))) => {
                    tracing::warn!("control client {} missed {} events", client.id, n);
                }
                Wake::Event(Err(broadcast::error::RecvError::Closed)) => return Ok(()),
                Wake::Exit => return Ok(()),
            }
        }
    }

    fn reply(&self, client: ClientId, line: impl Into<String>) {
        self.shared.bus.emit(GatewayEvent::reply(Some(client), line));
    }

    fn broadcast(&self, line: impl Into<String>) {
        self.shared.bus.emit(GatewayEvent::reply(None, line));
    }

    async fn dispatch(&self, client: &mut Client, line: &str) -> Result<()> {
        let Some(command) = ControlCommand::parse(line)? else {
            return Ok(());
        };
        tracing::debug!("{} {}", client.id, command);
        let controller = &self.shared.controller;
        match command {
            ControlCommand::Gcode(line) => controller.enqueue(line, CommandFlags::priority()).await?,
            ControlCommand::Status => {
                let json = serde_json::to_string(&controller.status())
                    .map_err(|e| Error::other(e.to_string()))?;
                self.reply(client.id, evt(json));
            }
            ControlCommand::List => {
                let files = list_files(&self.shared.filedir).await?;
                let json = serde_json::to_string(&files).map_err(|e| Error::other(e.to_string()))?;
                self.reply(client.id, evt(json));
            }
            ControlCommand::Clear => controller.send(ControllerCommand::ClearBed).await?,
            ControlCommand::ClearKick => {
                controller.send(ControllerCommand::ClearBed).await?;
                self.kick(None).await?;
            }
            ControlCommand::Kick(name) => self.kick(name).await?,
            ControlCommand::Abort => controller.send(ControllerCommand::Abort).await?,
            ControlCommand::Pause => controller.send(ControllerCommand::Pause).await?,
            ControlCommand::Resume => controller.send(ControllerCommand::Resume).await?,
            ControlCommand::Send(path) => self.print_file(Path::new(&path)).await?,
            ControlCommand::Upload(name) => {
                resolve(&self.shared.filedir, &name)?;
                client.framer.set_enabled(false);
                self.broadcast(evt(format!("upload: {}", name)));
                client.upload = Some(name);
            }
            ControlCommand::Delete(name) => {
                delete_file(&self.shared.filedir, &name).await?;
                self.broadcast(evt(format!("deleted: {}", name)));
            }
            ControlCommand::Exec(cmd) => {
                let output = run_exec(&cmd).await?;
                let json =
                    serde_json::to_string(&output).map_err(|e| Error::other(e.to_string()))?;
                self.broadcast(evt(json));
            }
            ControlCommand::Monitor(on) => {
                if client.monitoring != on {
                    client.monitoring = on;
                    let state = if on { "enabled" } else { "disabled" };
                    self.reply(client.id, evt(format!("monitoring {}", state)));
                    if on {
                        for line in self.shared.bus.recent_logs() {
                            self.reply(client.id, line);
                        }
                    }
                }
            }
            ControlCommand::Update(hexfile) => {
                controller.flash(hexfile.map(PathBuf::from)).await?;
            }
            ControlCommand::Bounce => controller.send(ControllerCommand::Bounce).await?,
            ControlCommand::Auto(on) => controller.send(ControllerCommand::SetAuto(on)).await?,
            ControlCommand::Exit => {
                self.broadcast(evt("exiting"));
                // ignore a stopped controller; exit proceeds either way
                let _ = controller.send(ControllerCommand::Shutdown).await;
                self.shared.exit.send_replace(true);
            }
        }
        Ok(())
    }

    async fn kick(&self, name: Option<String>) -> Result<()> {
        if self.shared.controller.status().print.run {
            return Err(UserError::PrintInProgress.into());
        }
        let path = match name {
            Some(name) => resolve(&self.shared.filedir, &name)?,
            None => {
                let files = list_files(&self.shared.filedir).await?;
                let newest = files.first().ok_or_else(|| UserError::MissingFile {
                    path: format!("{}/*.gcode", self.shared.filedir.display()),
                })?;
                self.shared.filedir.join(&newest.name)
            }
        };
        self.print_file(&path).await
    }

    async fn print_file(&self, path: &Path) -> Result<()> {
        let gcode = read_print_file(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let lines = self.shared.controller.start_print(filename, gcode).await?;
        tracing::info!("queued {} lines from {}", lines, path.display());
        Ok(())
    }
}

fn render(client: &Client, event: GatewayEvent) -> Option<String> {
    match event {
        GatewayEvent::Log { line } if client.monitoring => Some(line),
        GatewayEvent::Reply { target, line } if target.is_none() || target == Some(client.id) => {
            Some(line)
        }
        _ => None,
    }
}

/// Run a shell command and capture its output
pub async fn run_exec(cmd: &str) -> Result<ExecOutput> {
    let out = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .await?;
    Ok(ExecOutput {
        cmd: cmd.to_string(),
        code: out.status.code(),
        stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
    })
}
