//! Half-duplex request/response session over a reconnecting link
//!
//! A [`SessionProtocol`] supplies the wire format; [`Session`] supplies the
//! rest: connect with retry, one request in flight at a time, a handshake
//! after every (re)connect, periodic status polling while idle, and a dead
//! link check when nothing arrives for `idle_timeout`.
//!
//! Requests are served in this order: handshake steps, then the current poll
//! batch, then caller requests in arrival order.

use crate::communication::{Connector, Link};
use bytes::Bytes;
use parking_lot::RwLock;
use printgate_core::{
    DeviceState, DeviceStatus, Error, EventBus, Result, TransportError,
};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Wire format and status mapping of one device family
pub trait SessionProtocol: Send + 'static {
    /// Request type
    type Request: Send + fmt::Debug + 'static;
    /// Reply type
    type Reply: Send + fmt::Debug + 'static;

    /// Protocol name for logs
    fn name(&self) -> &str;

    /// Drop partial decode state; called for every new link
    fn reset(&mut self);

    /// Encode a request for the wire
    fn encode(&mut self, request: &Self::Request) -> Result<Bytes>;

    /// Check if the device answers this request
    fn expects_reply(&self, request: &Self::Request) -> bool;

    /// Feed received bytes, returning every reply completed by them
    fn decode(&mut self, data: &[u8]) -> Result<Vec<Self::Reply>>;

    /// Requests sent after each connect before the session is ready
    fn handshake(&self) -> Vec<Self::Request>;

    /// Requests sent on each poll tick
    fn poll(&self) -> Vec<Self::Request>;

    /// Fold a reply into the device status
    ///
    /// `request` is `None` for unsolicited replies.
    fn apply(
        &mut self,
        request: Option<&Self::Request>,
        reply: &Self::Reply,
        status: &mut DeviceStatus,
    ) -> Result<()>;

    /// Request sent before a graceful close
    fn release(&self) -> Option<Self::Request>;
}

/// Session timing
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Connect attempts per connect cycle
    pub connect_attempts: u32,
    /// Delay between attempts inside a cycle
    pub retry_delay: Duration,
    /// Status poll period; `None` disables polling
    pub poll_interval: Option<Duration>,
    /// In-flight request with no bytes for this long means the link is dead
    pub idle_timeout: Duration,
    /// Delay before a new connect cycle after a drop
    pub reconnect_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            retry_delay: Duration::from_secs(8),
            poll_interval: Some(Duration::from_secs(2)),
            idle_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(5),
        }
    }
}

/// Coarse session lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connect cycle or handshake running
    Connecting,
    /// Handshake done
    Ready,
    /// Link lost; a reconnect is scheduled
    Disconnected(String),
    /// Connect cycle ran out of attempts
    Failed(String),
    /// Closed on request
    Closed,
}

type ReplySender<R> = oneshot::Sender<Result<Option<R>>>;

enum SessionCommand<P: SessionProtocol> {
    Request {
        request: P::Request,
        reply: ReplySender<P::Reply>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Handle to a running session
pub struct SessionHandle<P: SessionProtocol> {
    name: String,
    tx: mpsc::Sender<SessionCommand<P>>,
    status: Arc<RwLock<DeviceStatus>>,
    state: watch::Receiver<SessionState>,
}

impl<P: SessionProtocol> Clone for SessionHandle<P> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
            status: self.status.clone(),
            state: self.state.clone(),
        }
    }
}

impl<P: SessionProtocol> fmt::Debug for SessionHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("name", &self.name)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl<P: SessionProtocol> SessionHandle<P> {
    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Send a request and wait for its reply
    ///
    /// Returns `Ok(None)` for requests the device does not answer.
    pub async fn request(&self, request: P::Request) -> Result<Option<P::Reply>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Request { request, reply })
            .await
            .map_err(|_| Error::from(TransportError::Closed))?;
        rx.await.map_err(|_| Error::from(TransportError::Closed))?
    }

    /// Latest status snapshot
    pub fn status(&self) -> DeviceStatus {
        self.status.read().clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// True once the session was closed or gave up
    pub fn is_closed(&self) -> bool {
        matches!(
            *self.state.borrow(),
            SessionState::Closed | SessionState::Failed(_)
        )
    }

    /// Wait until the handshake completes
    pub async fn wait_ready(&self) -> Result<()> {
        let mut state = self.state.clone();
        loop {
            match state.borrow_and_update().clone() {
                SessionState::Ready => return Ok(()),
                SessionState::Failed(reason) => {
                    return Err(TransportError::OpenFailed {
                        target: self.name.clone(),
                        reason,
                    }
                    .into())
                }
                SessionState::Closed => return Err(TransportError::Closed.into()),
                SessionState::Connecting | SessionState::Disconnected(_) => {}
            }
            state
                .changed()
                .await
                .map_err(|_| Error::from(TransportError::Closed))?;
        }
    }

    /// Release the device and stop the session
    pub async fn close(&self) {
        let (done, rx) = oneshot::channel();
        if self.tx.send(SessionCommand::Close { done }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Handshake,
    Poll,
    Caller,
}

struct InFlight<P: SessionProtocol> {
    request: P::Request,
    origin: Origin,
    reply: Option<ReplySender<P::Reply>>,
    sent: Instant,
}

enum Wake<P: SessionProtocol> {
    Read(Result<usize>),
    Command(Option<SessionCommand<P>>),
    Tick,
}

async fn read_link(link: &mut Option<Box<dyn Link>>, buf: &mut [u8]) -> Result<usize> {
    match link {
        Some(link) => link.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Session task for one device
pub struct Session<P: SessionProtocol> {
    name: String,
    protocol: P,
    connector: Arc<dyn Connector>,
    config: SessionConfig,
    bus: Arc<EventBus>,
    rx: mpsc::Receiver<SessionCommand<P>>,
    status: Arc<RwLock<DeviceStatus>>,
    state: watch::Sender<SessionState>,
    link: Option<Box<dyn Link>>,
    in_flight: Option<InFlight<P>>,
    handshake: VecDeque<P::Request>,
    poll_batch: VecDeque<P::Request>,
    queue: VecDeque<(P::Request, ReplySender<P::Reply>)>,
    last_recv: Instant,
    next_poll: Option<Instant>,
    reconnect_at: Option<Instant>,
    connecting: bool,
    running: bool,
}

impl<P: SessionProtocol> Session<P> {
    /// Spawn a session task and start connecting
    pub fn spawn(
        name: impl Into<String>,
        protocol: P,
        connector: Arc<dyn Connector>,
        config: SessionConfig,
        bus: Arc<EventBus>,
    ) -> (SessionHandle<P>, JoinHandle<()>) {
        let name = name.into();
        let (tx, rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        let status = Arc::new(RwLock::new(DeviceStatus::new()));
        let session = Self {
            name: name.clone(),
            protocol,
            connector,
            config,
            bus,
            rx,
            status: status.clone(),
            state: state_tx,
            link: None,
            in_flight: None,
            handshake: VecDeque::new(),
            poll_batch: VecDeque::new(),
            queue: VecDeque::new(),
            last_recv: Instant::now(),
            next_poll: None,
            reconnect_at: Some(Instant::now()),
            connecting: false,
            running: true,
        };
        let task = tokio::spawn(session.run());
        let handle = SessionHandle {
            name,
            tx,
            status,
            state: state_rx,
        };
        (handle, task)
    }

    fn tick_period(&self) -> Duration {
        let base = self
            .config
            .poll_interval
            .unwrap_or(self.config.idle_timeout)
            .min(self.config.idle_timeout);
        (base / 4).max(Duration::from_millis(10))
    }

    async fn run(mut self) {
        let mut tick = tokio::time::interval(self.tick_period());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = vec![0u8; 16 * 1024];

        while self.running {
            let wake = tokio::select! {
                res = read_link(&mut self.link, &mut buf) => Wake::Read(res),
                cmd = self.rx.recv() => Wake::Command(cmd),
                _ = tick.tick() => Wake::Tick,
            };
            match wake {
                Wake::Read(Ok(0)) => self.drop_link(TransportError::Closed.into()).await,
                Wake::Read(Ok(n)) => self.on_data(&buf[..n]).await,
                Wake::Read(Err(e)) => self.drop_link(e).await,
                Wake::Command(Some(SessionCommand::Request { request, reply })) => {
                    self.on_request(request, reply).await
                }
                Wake::Command(Some(SessionCommand::Close { done })) => {
                    self.close().await;
                    let _ = done.send(());
                }
                Wake::Command(None) => self.close().await,
                Wake::Tick => self.on_tick().await,
            }
        }
        tracing::debug!("{} session {} stopped", self.protocol.name(), self.name);
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    async fn connect(&mut self) {
        if self.connecting {
            return;
        }
        self.connecting = true;
        self.reconnect_at = None;
        self.set_state(SessionState::Connecting);
        self.status.write().state = DeviceState::Connecting;

        let target = self.connector.target();
        let attempts = self.config.connect_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.connector.connect().await {
                Ok(link) => {
                    tracing::info!("{} {} connected to {}", self.protocol.name(), self.name, target);
                    self.bus.log(format!("*** connected {} ***", self.name));
                    self.protocol.reset();
                    self.link = Some(link);
                    self.last_recv = Instant::now();
                    self.status.write().device.connect = Some(chrono::Utc::now());
                    self.handshake = self.protocol.handshake().into();
                    self.connecting = false;
                    self.pump().await;
                    self.check_ready();
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        "{} connect attempt {}/{} failed: {}",
                        self.name,
                        attempt,
                        attempts,
                        e
                    );
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
            }
        }

        self.connecting = false;
        let err = TransportError::RetriesExhausted {
            target,
            attempts,
        };
        {
            let mut status = self.status.write();
            status.state = DeviceState::Offline;
            status.record_error(format!("{}: {}", err, last_error));
        }
        while let Some((_, reply)) = self.queue.pop_front() {
            let _ = reply.send(Err(err.clone().into()));
        }
        self.set_state(SessionState::Failed(last_error));
        self.reconnect_at = Some(Instant::now() + self.config.reconnect_interval);
    }

    async fn drop_link(&mut self, cause: Error) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        if let Err(e) = link.shutdown().await {
            tracing::debug!("{} shutdown: {}", self.name, e);
        }
        tracing::warn!("{} link dropped: {}", self.name, cause);
        self.bus.log(format!("*** disconnected {} ***", self.name));

        if let Some(flight) = self.in_flight.take() {
            if let Some(reply) = flight.reply {
                let _ = reply.send(Err(cause.clone()));
            }
        }
        self.handshake.clear();
        self.poll_batch.clear();
        {
            let mut status = self.status.write();
            status.state = DeviceState::Offline;
            status.device.ready = false;
            status.device.close = Some(chrono::Utc::now());
            status.record_error(cause.to_string());
        }
        self.set_state(SessionState::Disconnected(cause.to_string()));
        self.next_poll = None;
        self.reconnect_at = Some(Instant::now() + self.config.reconnect_interval);
    }

    async fn on_request(&mut self, request: P::Request, reply: ReplySender<P::Reply>) {
        if self.link.is_none() && !self.connecting {
            let _ = reply.send(Err(TransportError::NotConnected.into()));
            return;
        }
        self.queue.push_back((request, reply));
        self.pump().await;
    }

    fn next_request(&mut self) -> Option<(P::Request, Origin, Option<ReplySender<P::Reply>>)> {
        if let Some(req) = self.handshake.pop_front() {
            return Some((req, Origin::Handshake, None));
        }
        if !self.handshake_done() {
            return None;
        }
        if let Some(req) = self.poll_batch.pop_front() {
            return Some((req, Origin::Poll, None));
        }
        self.queue
            .pop_front()
            .map(|(req, reply)| (req, Origin::Caller, Some(reply)))
    }

    fn handshake_done(&self) -> bool {
        self.handshake.is_empty()
            && !matches!(&self.in_flight, Some(f) if f.origin == Origin::Handshake)
    }

    async fn pump(&mut self) {
        while self.in_flight.is_none() && self.link.is_some() {
            let Some((request, origin, reply)) = self.next_request() else {
                return;
            };
            let frame = match self.protocol.encode(&request) {
                Ok(frame) => frame,
                Err(e) => {
                    if let Some(reply) = reply {
                        let _ = reply.send(Err(e));
                    }
                    continue;
                }
            };
            let Some(link) = self.link.as_mut() else {
                return;
            };
            if let Err(e) = link.write_all(&frame).await {
                if let Some(reply) = reply {
                    let _ = reply.send(Err(e.clone()));
                }
                self.drop_link(e).await;
                return;
            }
            tracing::trace!("{} --> {:?}", self.name, request);
            if self.protocol.expects_reply(&request) {
                self.in_flight = Some(InFlight {
                    request,
                    origin,
                    reply,
                    sent: Instant::now(),
                });
            } else if let Some(reply) = reply {
                let _ = reply.send(Ok(None));
            }
        }
    }

    fn check_ready(&mut self) {
        if self.link.is_none() || !self.handshake_done() {
            return;
        }
        if *self.state.borrow() == SessionState::Ready {
            return;
        }
        {
            let mut status = self.status.write();
            status.device.ready = true;
            if !status.state.is_online() {
                status.state = DeviceState::Idle;
            }
        }
        self.set_state(SessionState::Ready);
        self.next_poll = Some(Instant::now());
    }

    async fn on_data(&mut self, data: &[u8]) {
        self.last_recv = Instant::now();
        self.status.write().device.line = Some(chrono::Utc::now());
        let replies = match self.protocol.decode(data) {
            Ok(replies) => replies,
            Err(e) => {
                tracing::warn!("{} decode failed: {}", self.name, e);
                self.drop_link(e).await;
                return;
            }
        };

        for reply in replies {
            tracing::trace!("{} <-- {:?}", self.name, reply);
            let flight = self.in_flight.take();
            let result = {
                let mut status = self.status.write();
                self.protocol
                    .apply(flight.as_ref().map(|f| &f.request), &reply, &mut status)
            };
            let Some(flight) = flight else {
                if let Err(e) = result {
                    tracing::debug!("{} unsolicited reply: {}", self.name, e);
                }
                continue;
            };
            match (flight.origin, result) {
                (Origin::Handshake, Err(e)) => {
                    tracing::warn!("{} handshake failed: {}", self.name, e);
                    self.drop_link(e).await;
                    return;
                }
                (Origin::Poll, Err(e)) => {
                    tracing::debug!("{} status poll stopped: {}", self.name, e);
                    self.poll_batch.clear();
                }
                (Origin::Caller, result) => {
                    if let Some(tx) = flight.reply {
                        let _ = tx.send(result.map(|_| Some(reply)));
                    }
                }
                _ => {}
            }
        }
        self.pump().await;
        self.check_ready();
    }

    async fn on_tick(&mut self) {
        let now = Instant::now();
        if self.link.is_none() {
            if !self.connecting && self.reconnect_at.is_some_and(|at| now >= at) {
                self.connect().await;
            }
            return;
        }

        if let Some(flight) = &self.in_flight {
            let quiet_since = flight.sent.max(self.last_recv);
            if now.duration_since(quiet_since) >= self.config.idle_timeout {
                let timeout_ms = self.config.idle_timeout.as_millis() as u64;
                self.drop_link(TransportError::ReadTimeout { timeout_ms }.into())
                    .await;
                return;
            }
        }

        if let (Some(interval), Some(due)) = (self.config.poll_interval, self.next_poll) {
            if now >= due && self.in_flight.is_none() && self.poll_batch.is_empty() {
                self.poll_batch = self.protocol.poll().into();
                self.next_poll = Some(now + interval);
                self.pump().await;
            }
        }
    }

    async fn close(&mut self) {
        self.running = false;
        self.reconnect_at = None;
        while let Some((_, reply)) = self.queue.pop_front() {
            let _ = reply.send(Err(TransportError::Closed.into()));
        }
        if let Some(flight) = self.in_flight.take() {
            if let Some(reply) = flight.reply {
                let _ = reply.send(Err(TransportError::Closed.into()));
            }
        }

        if let Some(mut link) = self.link.take() {
            if let Some(release) = self.protocol.release() {
                let expects = self.protocol.expects_reply(&release);
                if let Ok(frame) = self.protocol.encode(&release) {
                    if link.write_all(&frame).await.is_ok() && expects {
                        let mut buf = vec![0u8; 4096];
                        let wait = tokio::time::timeout(self.config.idle_timeout, async {
                            loop {
                                match link.read(&mut buf).await {
                                    Ok(0) | Err(_) => break,
                                    Ok(n) => match self.protocol.decode(&buf[..n]) {
                                        Ok(replies) if !replies.is_empty() => break,
                                        Ok(_) => {}
                                        Err(_) => break,
                                    },
                                }
                            }
                        });
                        if wait.await.is_err() {
                            tracing::debug!("{} release not acknowledged", self.name);
                        }
                    }
                }
            }
            if let Err(e) = link.shutdown().await {
                tracing::debug!("{} shutdown: {}", self.name, e);
            }
        }

        {
            let mut status = self.status.write();
            status.state = DeviceState::Offline;
            status.device.ready = false;
            status.device.close = Some(chrono::Utc::now());
        }
        self.set_state(SessionState::Closed);
    }
}
