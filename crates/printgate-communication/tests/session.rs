//! Tests for device::session and device::registry

mod common;

use bytes::Bytes;
use common::{DuplexConnector, Peer};
use printgate_communication::communication::LineFramer;
use printgate_communication::device::SessionState;
use printgate_communication::{ConnectionRegistry, Session, SessionConfig, SessionProtocol};
use printgate_core::{
    DeviceState, DeviceStatus, Error, EventBus, ProtocolError, Result, TransportError,
};
use std::sync::Arc;
use std::time::Duration;

/// Line protocol: every request but `fire*` gets one reply line
#[derive(Default)]
struct EchoProtocol {
    framer: LineFramer,
    poll: Vec<String>,
}

impl SessionProtocol for EchoProtocol {
    type Request = String;
    type Reply = String;

    fn name(&self) -> &str {
        "echo"
    }

    fn reset(&mut self) {
        self.framer = LineFramer::new();
    }

    fn encode(&mut self, request: &String) -> Result<Bytes> {
        Ok(Bytes::from(format!("{}\n", request)))
    }

    fn expects_reply(&self, request: &String) -> bool {
        !request.starts_with("fire")
    }

    fn decode(&mut self, data: &[u8]) -> Result<Vec<String>> {
        Ok(self.framer.push(data))
    }

    fn handshake(&self) -> Vec<String> {
        vec!["hello".to_string()]
    }

    fn poll(&self) -> Vec<String> {
        self.poll.clone()
    }

    fn apply(&mut self, _request: Option<&String>, reply: &String, status: &mut DeviceStatus) -> Result<()> {
        if reply.starts_with("bad") {
            return Err(ProtocolError::ResponseParse {
                reason: reply.clone(),
            }
            .into());
        }
        if let Some(temp) = reply.strip_prefix("bed ") {
            status.temps.bed[0] = temp.parse().unwrap_or_default();
        }
        Ok(())
    }

    fn release(&self) -> Option<String> {
        Some("bye".to_string())
    }
}

fn fast() -> SessionConfig {
    SessionConfig {
        connect_attempts: 2,
        retry_delay: Duration::from_millis(10),
        poll_interval: None,
        idle_timeout: Duration::from_millis(400),
        reconnect_interval: Duration::from_millis(50),
    }
}

async fn ready_session(
    protocol: EchoProtocol,
    config: SessionConfig,
) -> (
    printgate_communication::SessionHandle<EchoProtocol>,
    Peer,
    tokio::sync::mpsc::UnboundedReceiver<tokio::io::DuplexStream>,
) {
    let (connector, mut peers) = DuplexConnector::new();
    let (handle, _task) = Session::spawn(
        "echo",
        protocol,
        Arc::new(connector),
        config,
        Arc::new(EventBus::new()),
    );
    let mut peer = Peer::accept(&mut peers).await;
    assert_eq!(peer.line().await.as_deref(), Some("hello"));
    peer.send("hi").await;
    handle.wait_ready().await.unwrap();
    (handle, peer, peers)
}

#[tokio::test]
async fn test_request_after_handshake() {
    let (handle, mut peer, _peers) = ready_session(EchoProtocol::default(), fast()).await;
    assert_eq!(handle.state(), SessionState::Ready);
    assert!(handle.status().device.ready);

    let h = handle.clone();
    let pending = tokio::spawn(async move { h.request("ping".to_string()).await });
    assert_eq!(peer.line().await.as_deref(), Some("ping"));
    peer.send("pong").await;
    assert_eq!(pending.await.unwrap().unwrap().as_deref(), Some("pong"));

    assert_eq!(handle.request("fire".to_string()).await.unwrap(), None);
    assert_eq!(peer.line().await.as_deref(), Some("fire"));
}

#[tokio::test]
async fn test_one_request_in_flight() {
    let (handle, mut peer, _peers) = ready_session(EchoProtocol::default(), fast()).await;

    let (a, b) = (handle.clone(), handle.clone());
    let first = tokio::spawn(async move { a.request("a".to_string()).await });
    assert_eq!(peer.line().await.as_deref(), Some("a"));
    let second = tokio::spawn(async move { b.request("b".to_string()).await });
    assert_eq!(peer.try_line(Duration::from_millis(100)).await, None);

    peer.send("ra").await;
    assert_eq!(peer.line().await.as_deref(), Some("b"));
    peer.send("rb").await;
    assert_eq!(first.await.unwrap().unwrap().as_deref(), Some("ra"));
    assert_eq!(second.await.unwrap().unwrap().as_deref(), Some("rb"));
}

#[tokio::test]
async fn test_drop_fails_in_flight_and_reconnects() {
    let (handle, mut peer, mut peers) = ready_session(EchoProtocol::default(), fast()).await;

    let h = handle.clone();
    let pending = tokio::spawn(async move { h.request("slow".to_string()).await });
    assert_eq!(peer.line().await.as_deref(), Some("slow"));
    drop(peer);

    let err = pending.await.unwrap().unwrap_err();
    assert!(err.is_transport(), "{}", err);
    assert_eq!(handle.status().state, DeviceState::Offline);

    let mut peer = Peer::accept(&mut peers).await;
    assert_eq!(peer.line().await.as_deref(), Some("hello"));
    peer.send("hi").await;
    handle.wait_ready().await.unwrap();
}

#[tokio::test]
async fn test_silent_device_times_out() {
    let (handle, mut peer, _peers) = ready_session(EchoProtocol::default(), fast()).await;

    let err = handle.request("void".to_string()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::ReadTimeout { timeout_ms: 400 })
    ));
    assert!(matches!(handle.state(), SessionState::Disconnected(_)));
    assert_eq!(peer.line().await.as_deref(), Some("void"));
}

#[tokio::test]
async fn test_connect_gives_up() {
    let (connector, _peers) = DuplexConnector::new();
    connector.refuse(true);
    let connector = Arc::new(connector);
    let (handle, _task) = Session::spawn(
        "echo",
        EchoProtocol::default(),
        connector.clone(),
        fast(),
        Arc::new(EventBus::new()),
    );
    let err = handle.wait_ready().await.unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::OpenFailed { .. })));
    assert_eq!(connector.attempts(), 2);
    assert!(handle.is_closed());
    assert!(handle.status().error.is_some());
}

#[tokio::test]
async fn test_handshake_failure_reconnects() {
    let (connector, mut peers) = DuplexConnector::new();
    let (handle, _task) = Session::spawn(
        "echo",
        EchoProtocol::default(),
        Arc::new(connector),
        fast(),
        Arc::new(EventBus::new()),
    );
    let mut peer = Peer::accept(&mut peers).await;
    assert_eq!(peer.line().await.as_deref(), Some("hello"));
    peer.send("bad greeting").await;

    let mut peer = Peer::accept(&mut peers).await;
    assert_eq!(peer.line().await.as_deref(), Some("hello"));
    peer.send("hi").await;
    handle.wait_ready().await.unwrap();
}

#[tokio::test]
async fn test_poll_updates_status() {
    let protocol = EchoProtocol {
        poll: vec!["bed?".to_string()],
        ..EchoProtocol::default()
    };
    let config = SessionConfig {
        poll_interval: Some(Duration::from_millis(50)),
        ..fast()
    };
    let (handle, mut peer, _peers) = ready_session(protocol, config).await;

    assert_eq!(peer.line().await.as_deref(), Some("bed?"));
    peer.send("bed 61.5").await;
    assert_eq!(peer.line().await.as_deref(), Some("bed?"));
    assert_eq!(handle.status().temps.bed[0], 61.5);
}

#[tokio::test]
async fn test_close_sends_release() {
    let (handle, mut peer, _peers) = ready_session(EchoProtocol::default(), fast()).await;

    let h = handle.clone();
    let closing = tokio::spawn(async move { h.close().await });
    assert_eq!(peer.line().await.as_deref(), Some("bye"));
    peer.send("later").await;
    closing.await.unwrap();

    assert_eq!(handle.state(), SessionState::Closed);
    assert!(handle.request("ping".to_string()).await.is_err());
}

#[tokio::test]
async fn test_registry_single_connect() {
    let registry: ConnectionRegistry<String> = ConnectionRegistry::new();
    let (release, wait) = tokio::sync::oneshot::channel::<()>();

    let slow = registry.get_or_connect("gx1", || async move {
        let _ = wait.await;
        Ok(Arc::new("link".to_string()))
    });
    let second = async {
        tokio::task::yield_now().await;
        assert!(registry.is_connecting("gx1"));
        let err = registry
            .get_or_connect("gx1", || async { Ok(Arc::new("other".to_string())) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(TransportError::Connecting { .. })));
        let _ = release.send(());
    };
    let (first, ()) = tokio::join!(slow, second);
    assert_eq!(first.unwrap().as_str(), "link");
    assert_eq!(registry.get("gx1").unwrap().as_str(), "link");
    assert_eq!(registry.names(), vec!["gx1".to_string()]);
}

#[tokio::test]
async fn test_registry_failure_frees_slot() {
    let registry: ConnectionRegistry<String> = ConnectionRegistry::new();
    let err = registry
        .get_or_connect("n2", || async { Err(TransportError::NotConnected.into()) })
        .await
        .unwrap_err();
    assert!(err.is_transport());
    assert!(!registry.is_connecting("n2"));

    let handle = registry
        .get_or_connect("n2", || async { Ok(Arc::new("second".to_string())) })
        .await
        .unwrap();
    assert_eq!(handle.as_str(), "second");
    assert_eq!(registry.drain().len(), 1);
    assert!(registry.get("n2").is_none());
}
