//! Sans-IO Marlin line protocol engine
//!
//! `SerialEngine` owns the command queue, the outstanding-ack counter and the
//! device status. It never touches a port: inputs arrive as method calls
//! (`handle_line`, `enqueue`, `abort`, ...) and outputs are collected as
//! [`EngineAction`]s that the caller drains with `take_actions()` and carries
//! out in order.

use super::command::{is_counted, is_numbered, AckHook, CommandFlags, CommandRecord, PendingMatch};
use super::checksum::LineNumberer;
use super::queue::CommandQueue;
use super::response_parser::{apply_telemetry, classify, DeviceLine};
use chrono::Utc;
use printgate_core::{
    BufferStatus, DeviceEvent, DeviceFault, DeviceState, DeviceStatus, Error, GatewayEvent,
    PrintEvent, PrintRecord, ProtocolError, Result, TransportError, UserError,
};
use std::collections::VecDeque;
use std::time::Duration;

/// Safety sequence staged by `abort` for the next boot
pub const DEFAULT_SAFETY_SEQUENCE: [&str; 8] = [
    "M104 S0 T0",
    "M140 S0 T0",
    "M107",
    "G91",
    "G0 Z10",
    "G28 X Y",
    "G90",
    "M84",
];

/// Telemetry queries sent by the auto-poller
pub const DEFAULT_AUTO_COMMANDS: [&str; 3] = ["M105", "M114", "M119"];

/// Engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum unacknowledged commands in flight
    pub bufmax: usize,
    /// Frame G/M lines with `N<seq> ... *<sum>`
    pub checksum: bool,
    /// Grbl dialect: abort only clears the queue
    pub grbl: bool,
    /// Spool prints to the device SD card instead of streaming
    pub sdspool: bool,
    /// Treat `Unknown command:` as fatal
    pub fragile: bool,
    /// Log every streamed print line
    pub verbose: bool,
    /// Auto-poll telemetry
    pub auto_poll: bool,
    /// Auto-poll interval
    pub auto_interval: Duration,
    /// Telemetry queries sent by the auto-poller
    pub auto_commands: Vec<String>,
    /// Commands staged for the next boot after an abort
    pub safety_sequence: Vec<String>,
    /// File name used on the device SD card when spooling
    pub sd_filename: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            bufmax: 8,
            checksum: false,
            grbl: false,
            sdspool: false,
            fragile: false,
            verbose: false,
            auto_poll: true,
            auto_interval: Duration::from_millis(1000),
            auto_commands: DEFAULT_AUTO_COMMANDS.iter().map(|s| s.to_string()).collect(),
            safety_sequence: DEFAULT_SAFETY_SEQUENCE.iter().map(|s| s.to_string()).collect(),
            sd_filename: "print.gco".to_string(),
        }
    }
}

/// Side effect requested by the engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    /// Write one line to the device (newline appended by the caller)
    Write(String),
    /// Close the link so the device resets
    CloseLink,
    /// Publish an event to clients
    Publish(GatewayEvent),
    /// Persist a completed print
    PrintFinished(PrintRecord),
}

/// Link lifecycle as seen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No link
    #[default]
    Disconnected,
    /// Open in progress
    Connecting,
    /// Open, waiting for the boot banner
    Booting,
    /// Accepting commands
    Ready,
}

#[derive(Debug, Default)]
struct AutoPoller {
    enabled: bool,
    armed: Vec<(String, bool)>,
    last_depth: usize,
}

impl AutoPoller {
    fn new(commands: &[String], enabled: bool) -> Self {
        Self {
            enabled,
            armed: commands.iter().map(|c| (c.clone(), true)).collect(),
            last_depth: 0,
        }
    }

    fn rearm(&mut self, command: &str) {
        if let Some(slot) = self.armed.iter_mut().find(|(c, _)| c == command) {
            slot.1 = true;
        }
    }

    fn rearm_all(&mut self) {
        for slot in &mut self.armed {
            slot.1 = true;
        }
    }

    fn take_due(&mut self) -> Vec<String> {
        self.armed
            .iter_mut()
            .filter(|(_, armed)| *armed)
            .map(|(cmd, armed)| {
                *armed = false;
                cmd.clone()
            })
            .collect()
    }
}

/// Marlin serial protocol engine
#[derive(Debug)]
pub struct SerialEngine {
    config: EngineConfig,
    link: LinkState,
    paused: bool,
    flashing: bool,
    processing: bool,
    starting: bool,
    waiting: usize,
    maxout: usize,
    queue: CommandQueue,
    pending: VecDeque<PendingMatch>,
    collect: Vec<String>,
    onboot: Vec<String>,
    numberer: LineNumberer,
    auto: AutoPoller,
    print_lines: usize,
    status: DeviceStatus,
    actions: Vec<EngineAction>,
}

impl SerialEngine {
    /// Create a disconnected engine
    pub fn new(config: EngineConfig) -> Self {
        let auto = AutoPoller::new(&config.auto_commands, config.auto_poll);
        let mut status = DeviceStatus::new();
        status.buffer.bufmax = config.bufmax;
        Self {
            config,
            link: LinkState::Disconnected,
            paused: false,
            flashing: false,
            processing: false,
            starting: false,
            waiting: 0,
            maxout: 0,
            queue: CommandQueue::new(),
            pending: VecDeque::new(),
            collect: Vec::new(),
            onboot: Vec::new(),
            numberer: LineNumberer::new(),
            auto,
            print_lines: 0,
            status,
            actions: Vec::new(),
        }
    }

    /// Engine tuning
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Link lifecycle state
    pub fn link_state(&self) -> LinkState {
        self.link
    }

    /// Sent, unacknowledged commands
    pub fn waiting(&self) -> usize {
        self.waiting
    }

    /// Queue depth
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Queued lines, head first
    pub fn queued_lines(&self) -> Vec<String> {
        self.queue.lines().map(str::to_string).collect()
    }

    /// Commands staged for the next boot
    pub fn onboot(&self) -> &[String] {
        &self.onboot
    }

    /// True while queue drain is halted
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// True when auto-polling is on
    pub fn auto_enabled(&self) -> bool {
        self.auto.enabled
    }

    /// Snapshot of the device status with live counters
    pub fn status(&self) -> DeviceStatus {
        let mut status = self.status.clone();
        status.buffer = BufferStatus {
            waiting: self.waiting,
            bufmax: self.config.bufmax,
            queue: self.queue.len(),
            maxout: self.maxout,
        };
        status.state = if self.flashing {
            DeviceState::Flashing
        } else {
            match self.link {
                LinkState::Disconnected => DeviceState::Offline,
                LinkState::Connecting | LinkState::Booting => DeviceState::Connecting,
                LinkState::Ready if self.paused => DeviceState::Paused,
                LinkState::Ready if status.print.run => DeviceState::Printing,
                LinkState::Ready => DeviceState::Idle,
            }
        };
        status
    }

    /// Drain the side effects produced so far
    pub fn take_actions(&mut self) -> Vec<EngineAction> {
        std::mem::take(&mut self.actions)
    }

    /// Settle a command the device will never acknowledge
    ///
    /// Waiting callers get `result`; auto-poll queries become due again.
    fn complete(&mut self, hook: Option<AckHook>, result: Result<Vec<String>>) {
        match hook {
            Some(AckHook::Reply(tx)) => {
                let _ = tx.send(result);
            }
            Some(AckHook::AutoPoll(cmd)) => self.auto.rearm(&cmd),
            Some(AckHook::PrintStart) | None => {}
        }
    }

    fn fail_pending(&mut self) {
        for matched in std::mem::take(&mut self.pending) {
            self.complete(matched.hook, Err(TransportError::Closed.into()));
        }
    }

    fn publish(&mut self, event: GatewayEvent) {
        self.actions.push(EngineAction::Publish(event));
    }

    fn evtlog(&mut self, msg: impl AsRef<str>) {
        let line = format!("*** {} ***", msg.as_ref());
        tracing::info!("{}", line);
        self.publish(GatewayEvent::log(line));
    }

    fn cmdlog(&mut self, line: &str, flags: CommandFlags) {
        if flags.auto || (flags.print && !self.config.verbose) {
            return;
        }
        let line = format!(
            "[{}:{},{}:{}] {}",
            self.waiting,
            self.config.bufmax,
            self.queue.len(),
            self.maxout,
            line
        );
        tracing::debug!("{}", line);
        self.publish(GatewayEvent::log(line));
    }

    /// An open attempt started
    pub fn link_connecting(&mut self) {
        self.link = LinkState::Connecting;
    }

    /// The link opened; wait for the boot banner
    pub fn link_opened(&mut self, target: &str) {
        self.link = LinkState::Booting;
        self.starting = false;
        self.status.device.connect = Some(Utc::now());
        self.evtlog(format!("opened {}", target));
        self.publish(GatewayEvent::Device(DeviceEvent::Opened {
            target: target.to_string(),
        }));
    }

    /// The link closed or failed
    ///
    /// Unacknowledged commands can never complete, so their replies fail now.
    /// Queued commands stay until the next boot.
    pub fn link_closed(&mut self, target: &str) {
        if self.link == LinkState::Disconnected {
            return;
        }
        self.link = LinkState::Disconnected;
        self.status.device.ready = false;
        self.status.device.close = Some(Utc::now());
        self.waiting = 0;
        self.collect.clear();
        self.fail_pending();
        self.evtlog(format!("closed {}", target));
        self.publish(GatewayEvent::Device(DeviceEvent::Closed {
            target: target.to_string(),
        }));
    }

    /// An open attempt failed
    pub fn link_failed(&mut self, target: &str, reason: &str) {
        self.link = LinkState::Disconnected;
        self.status.device.ready = false;
        self.status.record_error(format!("open {}: {}", target, reason));
        tracing::warn!("open {} failed: {}", target, reason);
    }

    /// No banner arrived in time; treat the device as booted
    pub fn boot_timeout(&mut self) {
        if self.link == LinkState::Booting {
            self.evtlog("no boot banner, assuming ready");
            self.on_boot(false);
        }
    }

    /// Mark firmware flashing in progress
    pub fn set_flashing(&mut self, flashing: bool) {
        self.flashing = flashing;
    }

    fn on_boot(&mut self, banner: bool) {
        self.link = LinkState::Ready;
        self.starting = banner;
        self.status.device.ready = true;
        self.status.device.boot = Some(Utc::now());
        self.status.print.clear = false;
        self.waiting = 0;
        self.collect.clear();
        self.fail_pending();
        for record in self.queue.clear() {
            self.complete(record.hook, Err(TransportError::Closed.into()));
        }
        self.maxout = 0;
        if self.status.print.run {
            self.status.print.run = false;
            self.status.print.end = Some(Utc::now());
            self.status.record_error("print interrupted by device reset");
            self.evtlog("print interrupted by device reset");
            self.publish(GatewayEvent::Print(PrintEvent::Aborted));
        }
        self.numberer.reset();
        self.auto.rearm_all();
        self.auto.last_depth = 0;

        self.processing = true;
        if self.config.checksum {
            self.push_record(CommandRecord::new("M110 N0", CommandFlags::priority()));
        }
        for line in std::mem::take(&mut self.onboot) {
            self.push_record(CommandRecord::new(line, CommandFlags::priority()));
        }
        self.processing = false;

        self.evtlog("device ready");
        self.publish(GatewayEvent::Device(DeviceEvent::Ready));
        self.process_queue();
    }

    /// Feed one line received from the device
    pub fn handle_line(&mut self, raw: &str) {
        let line = raw.trim();
        if line.is_empty() {
            return;
        }
        self.status.device.line = Some(Utc::now());

        let kind = classify(line);
        let mut telemetry = line;
        match kind {
            DeviceLine::Ok { payload } => {
                if let Some(payload) = payload {
                    self.collect.push(payload.to_string());
                    telemetry = payload;
                }
                self.starting = false;
                self.acknowledge(None);
            }
            DeviceLine::Rejected(reason) => {
                self.starting = false;
                self.acknowledge(Some(reason));
            }
            _ if self.starting => {
                if line.starts_with("echo:  M900") {
                    self.starting = false;
                }
                let msg = format!("<-- {}", line);
                tracing::debug!("{}", msg);
                self.publish(GatewayEvent::log(msg));
            }
            DeviceLine::Banner => {}
            _ => self.collect.push(line.to_string()),
        }

        apply_telemetry(telemetry, &mut self.status);
        match kind {
            DeviceLine::Banner => self.on_boot(true),
            DeviceLine::Fault(cause) => self.device_fault(cause),
            DeviceLine::Resend(seq) => {
                let err = ProtocolError::ResendRequested { line: seq };
                self.status.record_error(err.to_string());
                self.evtlog(format!("{}, reconnecting", err));
                self.close_link();
            }
            DeviceLine::Other if self.config.fragile && line.contains("Unknown command:") => {
                self.status.record_error(line);
                self.evtlog(format!("fatal: {}", line));
                self.close_link();
            }
            _ => {}
        }
        self.process_queue();
    }

    fn device_fault(&mut self, cause: &str) {
        self.status.record_error(cause);
        self.evtlog(format!("device error: {}", cause));
        self.publish(GatewayEvent::Device(DeviceEvent::Fault {
            cause: cause.to_string(),
        }));
        if self.status.print.run {
            self.abort();
        } else {
            self.close_link();
        }
    }

    fn close_link(&mut self) {
        self.actions.push(EngineAction::CloseLink);
    }

    fn acknowledge(&mut self, rejected: Option<&str>) {
        let collected = std::mem::take(&mut self.collect);
        let matched = self.pending.pop_front();
        self.waiting = self.waiting.saturating_sub(1);

        let (from, flags, hook) = match matched {
            Some(m) => (m.line, m.flags, m.hook),
            None => ("???".to_string(), CommandFlags::default(), None),
        };

        match hook {
            Some(AckHook::AutoPoll(cmd)) => self.auto.rearm(&cmd),
            Some(AckHook::PrintStart) => {
                self.status.print.prep = self.status.print.start;
                self.status.print.start = Some(Utc::now());
                self.evtlog("print starting");
            }
            Some(AckHook::Reply(tx)) => {
                let result = match rejected {
                    Some(reason) => Err(Error::from(DeviceFault::Rejected {
                        request: from.clone(),
                        reason: reason.to_string(),
                    })),
                    None => Ok(collected.clone()),
                };
                let _ = tx.send(result);
            }
            None => {}
        }

        if let Some(reason) = rejected {
            self.cmdlog(&format!("==> {} -- error:{}", from, reason), flags);
        }
        if flags.auto || collected.is_empty() {
            return;
        }
        if collected.len() >= 4 {
            self.cmdlog(&format!("==> {}", from), flags);
            for (i, line) in collected.iter().enumerate() {
                let prefix = if i == 0 { "<--" } else { "   " };
                self.cmdlog(&format!("{} {}", prefix, line), flags);
            }
        } else {
            let json = serde_json::to_string(&collected).unwrap_or_default();
            self.cmdlog(&format!("==> {} -- {}", from, json), flags);
        }
    }

    /// Queue a line with flags
    pub fn enqueue(&mut self, line: &str, flags: CommandFlags) {
        self.enqueue_record(CommandRecord::new(line, flags));
    }

    /// Queue a record, possibly with a completion hook
    pub fn enqueue_record(&mut self, record: CommandRecord) {
        self.push_record(record);
        self.process_queue();
    }

    fn push_record(&mut self, mut record: CommandRecord) {
        let trimmed = record.line.trim();
        if trimmed.is_empty() {
            self.complete(record.hook, Ok(Vec::new()));
            return;
        }
        if trimmed.len() != record.line.len() {
            record.line = trimmed.to_string();
        }
        self.queue.push(record);
        self.maxout = self.maxout.max(self.queue.len());
    }

    /// Drain the queue while buffer space allows
    pub fn process_queue(&mut self) {
        if self.processing {
            return;
        }
        self.processing = true;
        while self.link == LinkState::Ready && !self.paused && self.waiting < self.config.bufmax {
            let Some(record) = self.queue.pop_front() else {
                break;
            };
            self.transmit(record);
        }
        if self.queue.is_empty() {
            self.maxout = 0;
            if self.status.print.run {
                self.finish_print();
            }
        } else if self.status.print.run && self.maxout > 0 {
            self.status.print.progress =
                (1.0 - self.queue.len() as f64 / self.maxout as f64) * 100.0;
        }
        self.processing = false;
    }

    fn transmit(&mut self, record: CommandRecord) {
        let CommandRecord {
            line,
            mut flags,
            mut hook,
        } = record;

        if line.starts_with("M2000") {
            self.pause();
            self.complete(hook, Ok(Vec::new()));
            return;
        }
        let line = match line.find(';') {
            Some(0) => {
                self.complete(hook, Ok(Vec::new()));
                return;
            }
            Some(at) => line[..at].trim().to_string(),
            None => line,
        };
        if line.is_empty() {
            self.complete(hook, Ok(Vec::new()));
            return;
        }

        let counted = is_counted(&line);
        if counted {
            if line.starts_with("M117 Start") && hook.is_none() {
                hook = Some(AckHook::PrintStart);
            }
            self.waiting += 1;
        }

        let wire = if self.config.checksum && is_numbered(&line) {
            let (seq, framed) = self.numberer.frame(&line);
            flags.line_number = Some(seq);
            framed
        } else {
            line.clone()
        };

        self.cmdlog(&format!("--> {}", line), flags);
        if counted {
            self.pending.push_back(PendingMatch { line, flags, hook });
        } else {
            self.complete(hook, Ok(Vec::new()));
        }
        self.actions.push(EngineAction::Write(wire));
    }

    /// Halt queue drain; in-flight commands are unaffected
    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        self.evtlog("execution paused");
    }

    /// Resume queue drain
    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        self.evtlog("execution resumed");
        self.process_queue();
    }

    /// Mark the bed clear for the next print
    pub fn clear_bed(&mut self) {
        self.status.print.clear = true;
        self.evtlog("bed marked clear");
    }

    /// Cancel queued work and reset the device
    ///
    /// The safety sequence is staged for the next boot and the link is
    /// closed; in grbl mode only the queue is cleared.
    pub fn abort(&mut self) {
        self.evtlog("execution aborted");
        for record in self.queue.clear() {
            self.complete(record.hook, Err(Error::other("aborted")));
        }
        self.maxout = 0;
        self.paused = false;
        if self.status.print.run {
            self.status.print.run = false;
            self.status.print.end = Some(Utc::now());
            self.publish(GatewayEvent::Print(PrintEvent::Aborted));
        }
        if self.config.grbl {
            return;
        }
        self.onboot = self.config.safety_sequence.clone();
        self.close_link();
    }

    /// Turn auto-polling on or off
    pub fn set_auto(&mut self, enabled: bool) {
        self.auto.enabled = enabled;
        if enabled {
            self.auto.rearm_all();
        }
        self.evtlog(format!("auto poll {}", if enabled { "on" } else { "off" }));
    }

    /// Auto-poll timer tick
    pub fn auto_tick(&mut self) {
        if !self.auto.enabled || self.link != LinkState::Ready {
            return;
        }
        let depth = self.queue.len();
        if depth == 0 || depth <= self.auto.last_depth {
            for cmd in self.auto.take_due() {
                let record = CommandRecord::new(cmd.clone(), CommandFlags::auto())
                    .with_hook(AckHook::AutoPoll(cmd));
                self.enqueue_record(record);
            }
        }
        self.auto.last_depth = self.queue.len();
    }

    /// Start streaming a file
    ///
    /// Requires the bed to be marked clear; consumes the clear flag.
    pub fn start_print(&mut self, filename: &str, gcode: &str) -> Result<usize> {
        if self.status.print.run {
            return Err(UserError::PrintInProgress.into());
        }
        if !self.status.print.clear {
            self.evtlog("bed not marked clear. use *clear first");
            return Err(UserError::BedNotClear.into());
        }

        let print = &mut self.status.print;
        print.run = true;
        print.clear = false;
        print.filename = Some(filename.to_string());
        print.progress = 0.0;
        print.start = Some(Utc::now());
        print.prep = None;
        print.end = None;
        self.evtlog(format!("send: {}", filename));

        let lines: Vec<&str> = gcode
            .split('\n')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        self.print_lines = lines.len();

        self.processing = true;
        if self.config.sdspool {
            let sd = self.config.sd_filename.clone();
            self.evtlog(format!("spooling to SD as {}", sd));
            self.push_record(CommandRecord::new(format!("M28 {}", sd), CommandFlags::default()));
            for line in &lines {
                self.push_record(CommandRecord::new(*line, CommandFlags::print()));
            }
            self.push_record(CommandRecord::new("M29", CommandFlags::default()));
            self.push_record(CommandRecord::new(format!("M23 {}", sd), CommandFlags::default()));
            self.push_record(CommandRecord::new("M24", CommandFlags::default()));
        } else {
            for line in &lines {
                self.push_record(CommandRecord::new(*line, CommandFlags::print()));
            }
        }
        self.processing = false;

        self.publish(GatewayEvent::Print(PrintEvent::Started {
            filename: filename.to_string(),
            lines: self.print_lines,
        }));
        self.process_queue();
        Ok(self.print_lines)
    }

    fn finish_print(&mut self) {
        let end = Utc::now();
        let print = &mut self.status.print;
        print.run = false;
        print.end = Some(end);
        print.progress = 100.0;
        let start = print.start.unwrap_or(end);
        let filename = print.filename.clone().unwrap_or_default();
        let record = PrintRecord::new(filename, start, end, self.print_lines);
        self.evtlog(format!("print done {:.2} min", record.minutes));
        self.actions.push(EngineAction::PrintFinished(record.clone()));
        self.publish(GatewayEvent::Print(PrintEvent::Finished(record)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn writes(engine: &mut SerialEngine) -> Vec<String> {
        engine
            .take_actions()
            .into_iter()
            .filter_map(|a| match a {
                EngineAction::Write(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    fn ready(config: EngineConfig) -> SerialEngine {
        let mut engine = SerialEngine::new(config);
        engine.link_opened("test");
        engine.handle_line("start");
        engine.take_actions();
        engine
    }

    #[test]
    fn test_comment_handling() {
        let mut engine = ready(EngineConfig::default());
        engine.enqueue("; just a comment", CommandFlags::default());
        engine.enqueue("G1 X5 ; move", CommandFlags::default());
        assert_eq!(writes(&mut engine), vec!["G1 X5"]);
        assert_eq!(engine.waiting(), 1);
    }

    #[test]
    fn test_m2000_pauses() {
        let mut engine = ready(EngineConfig::default());
        engine.enqueue("M2000", CommandFlags::default());
        engine.enqueue("G28", CommandFlags::default());
        assert!(engine.is_paused());
        assert!(writes(&mut engine).is_empty());
        engine.resume();
        assert_eq!(writes(&mut engine), vec!["G28"]);
    }

    #[test]
    fn test_uncounted_line_not_waited() {
        let mut engine = ready(EngineConfig::default());
        engine.enqueue("T1", CommandFlags::default());
        assert_eq!(writes(&mut engine), vec!["T1"]);
        assert_eq!(engine.waiting(), 0);
    }

    #[test]
    fn test_boot_timeout_assumes_ready() {
        let mut engine = SerialEngine::new(EngineConfig::default());
        engine.link_opened("test");
        engine.enqueue("M105", CommandFlags::default());
        assert!(writes(&mut engine).is_empty());
        engine.boot_timeout();
        assert_eq!(engine.link_state(), LinkState::Ready);
        // pre-boot entries do not survive the boot
        assert_eq!(engine.queue_len(), 0);
    }
}
