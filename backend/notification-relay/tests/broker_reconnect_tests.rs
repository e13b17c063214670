/// Reconnection bounding of the broker connection manager
///
/// Runs on paused Tokio time so the 5 second reconnect delay is exact.
use notification_relay::broker::{BrokerConnectionManager, ConnectionState, MemoryBroker};
use notification_relay::config::BrokerConfig;
use std::sync::Arc;
use std::time::Duration;

fn manager(broker: &MemoryBroker) -> Arc<BrokerConnectionManager> {
    BrokerConnectionManager::new(Arc::new(broker.clone()), BrokerConfig::default())
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_stops_after_ten_attempts() {
    let broker = MemoryBroker::new();
    let manager = manager(&broker);
    manager.get_channel().await.unwrap();
    assert_eq!(broker.connect_attempts(), 1);

    broker.set_available(false);
    broker.sever();

    tokio::time::sleep(Duration::from_secs(60)).await;

    // initial connect + 10 automatic attempts
    let times = broker.connect_attempt_times();
    assert_eq!(times.len(), 11);
    for pair in times.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
    }
    assert_eq!(manager.state(), ConnectionState::Degraded);
    assert_eq!(manager.reconnect_attempts(), 10);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(broker.connect_attempts(), 11);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_manager_retries_only_on_demand() {
    let broker = MemoryBroker::new();
    let manager = manager(&broker);
    manager.get_channel().await.unwrap();

    broker.set_available(false);
    broker.sever();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(manager.state(), ConnectionState::Degraded);

    assert!(manager.get_channel().await.is_err());
    assert_eq!(broker.connect_attempts(), 12);
    assert_eq!(manager.state(), ConnectionState::Degraded);

    // a failed on-demand attempt schedules nothing
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.connect_attempts(), 12);

    broker.set_available(true);
    let channel = manager.get_channel().await.unwrap();
    assert!(channel.is_open());
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(manager.reconnect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_recovered_connection_is_supervised_again() {
    let broker = MemoryBroker::new();
    let manager = manager(&broker);
    manager.get_channel().await.unwrap();

    broker.sever();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(broker.connect_attempts(), 2);

    broker.sever();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(manager.state(), ConnectionState::Connected);
    assert_eq!(broker.connect_attempts(), 3);
}
