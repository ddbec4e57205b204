//! Tests for the serial controller and the control channel server

mod common;

use common::{eventually, DuplexConnector, Peer};
use printgate_communication::control::{ControlCommand, FileEntry, GridProtocol};
use printgate_communication::firmware::marlin::{PrintHistory, SerialController};
use printgate_communication::{ControlServer, ControllerConfig, ControllerHandle, EngineConfig};
use printgate_core::{EventBus, UserError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::io::DuplexStream;

struct Rig {
    controller: ControllerHandle,
    device: Peer,
    bus: Arc<EventBus>,
    _peers: UnboundedReceiver<DuplexStream>,
}

async fn rig(config: ControllerConfig) -> Rig {
    let bus = Arc::new(EventBus::new());
    let (connector, mut peers) = DuplexConnector::new();
    let (controller, _task) = SerialController::spawn(Arc::new(connector), config, bus.clone());
    let mut device = Peer::accept(&mut peers).await;
    device.send("start").await;
    let watched = controller.clone();
    eventually(|| watched.status().device.ready).await;
    Rig {
        controller,
        device,
        bus,
        _peers: peers,
    }
}

fn quiet() -> ControllerConfig {
    ControllerConfig {
        engine: EngineConfig {
            auto_poll: false,
            ..EngineConfig::default()
        },
        ..ControllerConfig::default()
    }
}

fn connect(server: &ControlServer) -> (Peer, tokio::task::JoinHandle<printgate_core::Result<()>>) {
    let (near, far) = tokio::io::duplex(64 * 1024);
    let server = server.clone();
    let task = tokio::spawn(async move { server.handle_client(far, false).await });
    (Peer::new(near), task)
}

fn payload(line: &str) -> &str {
    line.strip_prefix("*** ")
        .and_then(|l| l.strip_suffix(" ***"))
        .unwrap_or(line)
}

#[test]
fn test_parse_commands() {
    assert_eq!(ControlCommand::parse("  ").unwrap(), None);
    assert_eq!(
        ControlCommand::parse("G28 X").unwrap(),
        Some(ControlCommand::Gcode("G28 X".to_string()))
    );
    assert_eq!(
        ControlCommand::parse("*kick part.gcode").unwrap(),
        Some(ControlCommand::Kick(Some("part.gcode".to_string())))
    );
    assert_eq!(ControlCommand::parse("*kick").unwrap(), Some(ControlCommand::Kick(None)));
    assert_eq!(
        ControlCommand::parse("*monitor on").unwrap(),
        Some(ControlCommand::Monitor(true))
    );
    assert!(matches!(
        ControlCommand::parse("*frobnicate"),
        Err(UserError::InvalidCommand { command }) if command == "frobnicate"
    ));
    assert!(matches!(
        ControlCommand::parse("*upload"),
        Err(UserError::InvalidArgument { .. })
    ));
    assert!(ControlCommand::parse("*auto maybe").is_err());
    assert!(ControlCommand::Status.is_private());
    assert_eq!(ControlCommand::Auto(false).to_string(), "*auto off");
}

#[tokio::test]
async fn test_request_collects_reply() {
    let mut rig = rig(quiet()).await;
    let controller = rig.controller.clone();
    let pending = tokio::spawn(async move { controller.request("M105").await });

    assert_eq!(rig.device.line().await.as_deref(), Some("M105"));
    rig.device.send("ok T:21.0 /0.0 B:20.0 /0.0").await;
    let lines = pending.await.unwrap().unwrap();
    assert_eq!(lines, vec!["T:21.0 /0.0 B:20.0 /0.0"]);

    let controller = rig.controller.clone();
    eventually(|| controller.status().temps.bed == [20.0, 0.0]).await;
}

#[tokio::test]
async fn test_dropped_device_reconnects() {
    let bus = Arc::new(EventBus::new());
    let (connector, mut peers) = DuplexConnector::new();
    let config = ControllerConfig {
        reconnect_interval: Duration::from_millis(50),
        ..quiet()
    };
    let (controller, _task) = SerialController::spawn(Arc::new(connector), config, bus);
    let device = Peer::accept(&mut peers).await;
    drop(device);

    let mut device = Peer::accept(&mut peers).await;
    device.send("start").await;
    eventually(|| controller.status().device.ready).await;
}

#[tokio::test]
async fn test_status_reply_is_private() {
    let rig = rig(quiet()).await;
    let dir = tempfile::tempdir().unwrap();
    let server = ControlServer::new(rig.controller.clone(), rig.bus.clone(), dir.path());

    let (mut alice, _a) = connect(&server);
    let (mut bob, _b) = connect(&server);
    assert_eq!(alice.line().await.as_deref(), Some("*ready"));
    assert_eq!(bob.line().await.as_deref(), Some("*ready"));
    eventually(|| server.client_count() == 2).await;

    alice.send("*status").await;
    let line = alice.line().await.unwrap();
    let status = GridProtocol::parse_status(&line).expect("status json");
    assert!(status.device.ready);
    assert_eq!(bob.try_line(Duration::from_millis(100)).await, None);

    alice.send("*frobnicate").await;
    assert_eq!(alice.line().await.as_deref(), Some("*** invalid command \"frobnicate\" ***"));
    assert_eq!(bob.try_line(Duration::from_millis(100)).await, None);
}

#[tokio::test]
async fn test_gcode_passthrough_and_monitor() {
    let mut rig = rig(quiet()).await;
    let dir = tempfile::tempdir().unwrap();
    let server = ControlServer::new(rig.controller.clone(), rig.bus.clone(), dir.path());
    let (mut client, _task) = connect(&server);
    assert_eq!(client.line().await.as_deref(), Some("*ready"));

    client.send("*monitor on").await;
    assert_eq!(client.line().await.as_deref(), Some("*** monitoring enabled ***"));

    client.send("G28").await;
    assert_eq!(rig.device.line().await.as_deref(), Some("G28"));
    client.line_where(|l| l.contains("--> G28")).await;
}

#[tokio::test]
async fn test_monitor_replays_recent_log() {
    let rig = rig(quiet()).await;
    let dir = tempfile::tempdir().unwrap();
    let server = ControlServer::new(rig.controller.clone(), rig.bus.clone(), dir.path());
    rig.bus.log("*** earlier ***");

    let (mut client, _task) = connect(&server);
    assert_eq!(client.line().await.as_deref(), Some("*ready"));
    client.send("*monitor on").await;
    assert_eq!(client.line().await.as_deref(), Some("*** monitoring enabled ***"));
    client.line_where(|l| l == "*** earlier ***").await;
}

#[tokio::test]
async fn test_upload_list_kick() {
    let mut rig = rig(quiet()).await;
    let dir = tempfile::tempdir().unwrap();
    let server = ControlServer::new(rig.controller.clone(), rig.bus.clone(), dir.path());

    let (mut uploader, task) = connect(&server);
    assert_eq!(uploader.line().await.as_deref(), Some("*ready"));
    uploader
        .send_raw(b"*upload part.gcode\nG28\nG1 X5\n")
        .await;
    uploader.close().await;
    let _ = task.await.unwrap();
    let stored = std::fs::read_to_string(dir.path().join("part.gcode")).unwrap();
    assert_eq!(stored, "G28\nG1 X5\n");

    let (mut client, _task) = connect(&server);
    assert_eq!(client.line().await.as_deref(), Some("*ready"));
    client.send("*list").await;
    let line = client.line().await.unwrap();
    let files: Vec<FileEntry> = serde_json::from_str(payload(&line)).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "part.gcode");
    assert_eq!(files[0].size, 10);

    client.send("*kick").await;
    assert_eq!(client.line().await.as_deref(), Some("*** bed not marked clear ***"));

    client.send("*clearkick").await;
    assert_eq!(rig.device.line().await.as_deref(), Some("G28"));
    rig.device.send("ok").await;
    assert_eq!(rig.device.line().await.as_deref(), Some("G1 X5"));
    rig.device.send("ok").await;

    let controller = rig.controller.clone();
    eventually(|| {
        let print = controller.status().print;
        !print.run && print.progress == 100.0
    })
    .await;
    assert_eq!(
        rig.controller.status().print.filename.as_deref(),
        Some("part.gcode")
    );
}

#[tokio::test]
async fn test_upload_rejects_escaping_name() {
    let rig = rig(quiet()).await;
    let dir = tempfile::tempdir().unwrap();
    let server = ControlServer::new(rig.controller.clone(), rig.bus.clone(), dir.path());
    let (mut client, _task) = connect(&server);
    assert_eq!(client.line().await.as_deref(), Some("*ready"));

    client.send("*upload ../evil.gcode").await;
    let line = client.line().await.unwrap();
    assert!(line.contains("bad file name"), "{}", line);
    client.send("*delete missing.gcode").await;
    let line = client.line().await.unwrap();
    assert!(line.starts_with("*** missing file"), "{}", line);
}

#[tokio::test]
async fn test_finished_print_lands_in_history() {
    let dir = tempfile::tempdir().unwrap();
    let history = dir.path().join("history.jsonl");
    let mut rig = rig(ControllerConfig {
        history: Some(history.clone()),
        ..quiet()
    })
    .await;

    rig.controller
        .send(printgate_communication::firmware::marlin::ControllerCommand::ClearBed)
        .await
        .unwrap();
    let lines = rig
        .controller
        .start_print("cube.gcode", "G28\nM117 Start\n".to_string())
        .await
        .unwrap();
    assert_eq!(lines, 2);
    assert_eq!(rig.device.line().await.as_deref(), Some("G28"));
    assert_eq!(rig.device.line().await.as_deref(), Some("M117 Start"));
    rig.device.send("ok").await;
    rig.device.send("ok").await;

    let history = PrintHistory::new(history);
    let mut records = Vec::new();
    for _ in 0..200 {
        records = history.load().await.unwrap();
        if !records.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].filename, "cube.gcode");
    assert_eq!(records[0].lines, 2);
}

#[tokio::test]
async fn test_exit_stops_everything() {
    let mut rig = rig(quiet()).await;
    let dir = tempfile::tempdir().unwrap();
    let server = ControlServer::new(rig.controller.clone(), rig.bus.clone(), dir.path());
    let (mut client, task) = connect(&server);
    assert_eq!(client.line().await.as_deref(), Some("*ready"));

    client.send("*exit").await;
    tokio::time::timeout(Duration::from_secs(2), server.wait_exit())
        .await
        .unwrap();
    assert!(server.exit_requested());
    task.await.unwrap().unwrap();
    assert_eq!(rig.device.line().await, None);
}
