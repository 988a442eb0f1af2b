// demos/dashboard_stream.rs
use realtime_connector_rs::auth::{Credentials, StaticTokenProvider};
use realtime_connector_rs::config::ConnectionConfig;
use realtime_connector_rs::events::{ConnectionEvent, EventKind, EventSource};
use realtime_connector_rs::observer::ConnectionObserver;
use realtime_connector_rs::types::OutgoingMessage;
use realtime_connector_rs::websocket::{ConnectionManager, WsConnector};
use serde_json::json;
use std::env;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

/// Sets up logging with a custom format
fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional: Load .env file if you have one
    dotenv::dotenv().ok();
    setup_logging();

    let config = ConnectionConfig::from_env()?;
    let token = env::var("REALTIME_TOKEN").unwrap_or_default();
    let user_id = env::var("REALTIME_USER_ID").unwrap_or_else(|_| "demo".to_string());
    let tokens = StaticTokenProvider::new(Credentials::new(token, user_id));

    info!("Connecting to {}...", config.url);
    let manager = ConnectionManager::new(
        config.clone(),
        Arc::new(WsConnector::from_config(&config)),
        Arc::new(tokens),
    )?;

    manager.on(
        EventKind::message("order_update"),
        Arc::new(|e: &ConnectionEvent| {
            if let ConnectionEvent::Message(msg) = e {
                info!("Order update: {}", msg.data);
            }
        }),
    );
    manager.on(
        EventKind::MaxReconnectAttempts,
        Arc::new(|_e: &ConnectionEvent| warn!("Gave up reconnecting; press Ctrl+C to exit.")),
    );

    let observer = ConnectionObserver::new(&manager);
    let mut states = observer.subscribe();

    manager.connect()?;
    manager.send(OutgoingMessage::new("subscribe", json!({ "topic": "orders" })))?;

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                info!(
                    "status={} attempts={}/{} retry_in={}s manual={} error={:?}",
                    state.status,
                    state.reconnect_attempts,
                    state.max_reconnect_attempts,
                    state.reconnect_countdown_seconds,
                    state.can_manual_reconnect,
                    state.last_error
                );
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!("Stopping client...");
    manager.disconnect()?;

    // Give the close frame time to go out
    sleep(Duration::from_millis(200)).await;
    println!("Example finished.");
    Ok(())
}
