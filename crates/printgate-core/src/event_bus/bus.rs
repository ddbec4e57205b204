//! Event bus implementation.
//!
//! One bus is owned by the gateway context and handed to every engine
//! and control client that needs it. Each control client holds its own
//! broadcast receiver. The most recent log lines are also kept in a
//! backlog so a client that switches monitoring on can catch up.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::broadcast;

use super::events::GatewayEvent;

/// Sizing for an [`EventBus`]
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Events buffered per receiver before it starts lagging.
    pub channel_capacity: usize,
    /// Log lines retained for replay; 0 keeps none.
    pub log_backlog: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            log_backlog: 50,
        }
    }
}

/// Fan-out of [`GatewayEvent`]s from engines and sessions to control clients
pub struct EventBus {
    sender: broadcast::Sender<GatewayEvent>,
    backlog: Mutex<VecDeque<String>>,
    config: EventBusConfig,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            backlog: Mutex::new(VecDeque::with_capacity(config.log_backlog)),
            config,
        }
    }

    /// Publish an event to every live receiver.
    ///
    /// Returns how many receivers got it; nobody listening is not an error.
    pub fn emit(&self, event: GatewayEvent) -> usize {
        if let GatewayEvent::Log { line } = &event {
            self.remember(line);
        }
        self.sender.send(event).unwrap_or(0)
    }

    /// Publish a log line for monitoring clients
    pub fn log(&self, line: impl Into<String>) -> usize {
        self.emit(GatewayEvent::log(line))
    }

    /// A receiver that sees every event published from now on
    pub fn receiver(&self) -> broadcast::Receiver<GatewayEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Retained log lines, oldest first
    pub fn recent_logs(&self) -> Vec<String> {
        self.backlog.lock().iter().cloned().collect()
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    fn remember(&self, line: &str) {
        if self.config.log_backlog == 0 {
            return;
        }
        let mut backlog = self.backlog.lock();
        while backlog.len() >= self.config.log_backlog {
            backlog.pop_front();
        }
        backlog.push_back(line.to_string());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.receiver_count())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::events::{ClientId, DeviceEvent};

    #[test]
    fn test_emit_without_receivers() {
        let bus = EventBus::new();
        assert_eq!(bus.emit(GatewayEvent::Device(DeviceEvent::Ready)), 0);
        assert_eq!(bus.log("--> M105"), 0);
        assert_eq!(bus.recent_logs(), vec!["--> M105".to_string()]);
    }

    #[test]
    fn test_backlog_keeps_newest_lines() {
        let bus = EventBus::with_config(EventBusConfig {
            log_backlog: 3,
            ..Default::default()
        });
        for i in 0..5 {
            bus.log(format!("line {}", i));
        }
        bus.emit(GatewayEvent::reply(None, "*ready"));
        assert_eq!(bus.recent_logs(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_backlog_disabled() {
        let bus = EventBus::with_config(EventBusConfig {
            log_backlog: 0,
            ..Default::default()
        });
        bus.log("x");
        assert!(bus.recent_logs().is_empty());
    }

    #[tokio::test]
    async fn test_targeted_reply_receiver() {
        let bus = EventBus::new();
        let mut receiver = bus.receiver();
        assert_eq!(bus.receiver_count(), 1);
        let me = ClientId::new();

        assert_eq!(bus.emit(GatewayEvent::reply(Some(me), "*ready")), 1);

        match receiver.recv().await {
            Ok(GatewayEvent::Reply { target, line }) => {
                assert_eq!(target, Some(me));
                assert_eq!(line, "*ready");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
