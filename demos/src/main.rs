//! Connects to a local TwinCAT runtime, prints its device info and state,
//! and subscribes to a symbol for a few seconds of on-change notifications.

use std::time::Duration;
use tcads::client::{Client, ClientConfig, ConnectionState, SubscriptionOptions};
use tcads::core::ams::AmsNetId;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = ClientConfig::new("127.0.0.1:48898", AmsNetId::new(127, 0, 0, 1, 1, 1))
        .with_target_port(851)
        .with_timeout(Duration::from_secs(5))
        .with_health_check_period(Duration::from_secs(10))
        .with_state_callback(|change| {
            let (old, new) = (change.old, change.new);
            tracing::info!(?old, ?new, "connection state changed");
        });

    let client = Client::connect(config);

    for _ in 0..50 {
        if client.connection_state() == ConnectionState::Connected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    match client.read_device_info().await {
        Ok(info) => tracing::info!(?info, "device info"),
        Err(e) => {
            tracing::error!(error = %e, "failed to read device info");
            return;
        }
    }

    match client.read_state().await {
        Ok(status) => tracing::info!(?status, "device state"),
        Err(e) => tracing::error!(error = %e, "failed to read state"),
    }

    let subscription = client
        .subscribe(0x4020, 0, 2, SubscriptionOptions::default())
        .await;

    match subscription {
        Ok(mut sub) => {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            while tokio::time::Instant::now() < deadline {
                if let Ok(Some((timestamp, data))) =
                    tokio::time::timeout(Duration::from_secs(1), sub.recv()).await
                {
                    tracing::info!(?timestamp, len = data.len(), "notification sample");
                }
            }
            let _ = client.unsubscribe(sub).await;
        }
        Err(e) => tracing::warn!(error = %e, "subscribe failed"),
    }

    client.close(Duration::from_secs(1)).await;
}
