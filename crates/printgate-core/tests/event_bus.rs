//! Event bus fan-out as seen by several control clients

use printgate_core::{
    ClientId, DeviceEvent, DeviceState, EventBus, EventBusConfig, EventCategory, GatewayEvent,
    PrintEvent,
};

#[tokio::test]
async fn test_receivers_see_events_in_publish_order() {
    let bus = EventBus::new();
    let mut first = bus.receiver();
    let mut second = bus.receiver();

    bus.log("--> G28");
    bus.emit(GatewayEvent::Print(PrintEvent::Aborted));
    bus.emit(GatewayEvent::reply(Some(ClientId::new()), "*** ok ***"));

    for rx in [&mut first, &mut second] {
        assert_eq!(rx.recv().await.unwrap().category(), EventCategory::Log);
        assert_eq!(rx.recv().await.unwrap().category(), EventCategory::Print);
        assert_eq!(rx.recv().await.unwrap().category(), EventCategory::Reply);
    }
}

#[tokio::test]
async fn test_late_receiver_misses_earlier_events() {
    let bus = EventBus::new();
    bus.log("before");
    let mut late = bus.receiver();
    bus.emit(GatewayEvent::Device(DeviceEvent::Ready));

    assert_eq!(
        late.recv().await.unwrap(),
        GatewayEvent::Device(DeviceEvent::Ready)
    );
    assert_eq!(bus.recent_logs(), vec!["before".to_string()]);
}

#[tokio::test]
async fn test_slow_receiver_lags() {
    let bus = EventBus::with_config(EventBusConfig {
        channel_capacity: 2,
        log_backlog: 0,
    });
    let mut rx = bus.receiver();
    for i in 0..5 {
        bus.log(format!("line {}", i));
    }
    assert!(matches!(
        rx.recv().await,
        Err(tokio::sync::broadcast::error::RecvError::Lagged(3))
    ));
    assert_eq!(rx.recv().await.unwrap(), GatewayEvent::log("line 3"));
}

#[test]
fn test_state_predicates() {
    assert!(!DeviceState::Offline.is_online());
    assert!(!DeviceState::Connecting.is_online());
    assert!(DeviceState::Paused.is_online());
    assert!(DeviceState::Paused.is_busy());
    assert!(!DeviceState::Idle.is_busy());
    assert_eq!(DeviceState::Flashing.to_string(), "flashing");
}
