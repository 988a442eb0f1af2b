// tests/ws_transport.rs
// Runs the real tokio-tungstenite transport against an in-process server.

mod common;

use futures_util::{SinkExt, StreamExt};
use realtime_connector_rs::auth::{Credentials, StaticTokenProvider};
use realtime_connector_rs::config::ConnectionConfig;
use realtime_connector_rs::events::{ConnectionEvent, EventKind, EventSource};
use realtime_connector_rs::types::{ConnectionStatus, OutgoingMessage};
use realtime_connector_rs::websocket::{ConnectionManager, ConnectionSnapshot, WsConnector};
use serde_json::{json, Value};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::{
    frame::coding::CloseCode, CloseFrame, Message as WsMessage,
};

/// Accepts connections forever. Answers `authenticate` with `authenticated`
/// followed by an `order_update`, echoes `echo` frames, and closes with 4000
/// on `bye`. Every accepted connection is reported on `accepted`.
async fn spawn_server(accepted: mpsc::UnboundedSender<Value>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let accepted = accepted.clone();
            tokio::spawn(async move {
                let mut ws = match accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                while let Some(Ok(frame)) = ws.next().await {
                    let WsMessage::Text(text) = frame else {
                        continue;
                    };
                    let value: Value = serde_json::from_str(&text).unwrap();
                    let _ = accepted.send(value.clone());
                    match value["type"].as_str() {
                        Some("authenticate") => {
                            let ok = json!({ "type": "authenticated" }).to_string();
                            let update = json!({ "type": "order_update", "data": { "order_id": 5 } });
                            ws.send(WsMessage::Text(ok)).await.unwrap();
                            ws.send(WsMessage::Text(update.to_string())).await.unwrap();
                        }
                        Some("bye") => {
                            let frame = CloseFrame {
                                code: CloseCode::from(4000),
                                reason: Cow::Borrowed("going away"),
                            };
                            let _ = ws.close(Some(frame)).await;
                            break;
                        }
                        _ => {}
                    }
                }
            });
        }
    });

    format!("ws://{}/ws", addr)
}

async fn wait_for_status(
    rx: &mut watch::Receiver<ConnectionSnapshot>,
    status: ConnectionStatus,
) -> ConnectionSnapshot {
    timeout(Duration::from_secs(5), async {
        loop {
            if rx.borrow_and_update().status == status {
                return rx.borrow().clone();
            }
            rx.changed().await.expect("manager stopped");
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {}", status))
}

fn manager_for(url: &str) -> ConnectionManager {
    common::setup();
    let config = ConnectionConfig::new(url).with_scope("restaurant-1");
    let tokens = StaticTokenProvider::new(Credentials::new("secret-token", "waiter-3"));
    ConnectionManager::new(
        config.clone(),
        Arc::new(WsConnector::from_config(&config)),
        Arc::new(tokens),
    )
    .expect("valid config")
}

#[tokio::test]
async fn test_ws_handshake_and_forwarded_message() {
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();
    let url = spawn_server(accepted_tx).await;
    let manager = manager_for(&url);

    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    manager.on(
        EventKind::message("order_update"),
        Arc::new(move |e: &ConnectionEvent| {
            if let ConnectionEvent::Message(msg) = e {
                let _ = updates_tx.send(msg.data.clone());
            }
        }),
    );

    let mut snapshots = manager.watch_snapshot();
    manager.connect().unwrap();
    wait_for_status(&mut snapshots, ConnectionStatus::Connected).await;

    let auth = timeout(Duration::from_secs(5), accepted_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(auth["type"], "authenticate");
    assert_eq!(auth["token"], "secret-token");
    assert_eq!(auth["data"]["user_id"], "waiter-3");

    let update = timeout(Duration::from_secs(5), updates_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(update, json!({ "order_id": 5 }));

    manager
        .send(OutgoingMessage::new("echo", json!({ "n": 1 })))
        .unwrap();
    let echoed = timeout(Duration::from_secs(5), accepted_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed["type"], "echo");
    assert_eq!(echoed["scope"], "restaurant-1");

    manager.disconnect().unwrap();
    wait_for_status(&mut snapshots, ConnectionStatus::Disconnected).await;
}

#[tokio::test]
async fn test_ws_server_close_triggers_reconnect() {
    let (accepted_tx, mut accepted_rx) = mpsc::unbounded_channel();
    let url = spawn_server(accepted_tx).await;
    let manager = manager_for(&url);
    let mut snapshots = manager.watch_snapshot();

    manager.connect().unwrap();
    wait_for_status(&mut snapshots, ConnectionStatus::Connected).await;

    manager.send(OutgoingMessage::new("bye", json!({}))).unwrap();
    let snapshot = wait_for_status(&mut snapshots, ConnectionStatus::Reconnecting).await;
    assert_eq!(snapshot.reconnect_attempts, 1);
    assert!(snapshot
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("4000"));

    // The retry dials a brand-new socket and authenticates again.
    wait_for_status(&mut snapshots, ConnectionStatus::Connected).await;
    let mut auth_count = 0;
    while let Ok(value) = accepted_rx.try_recv() {
        if value["type"] == "authenticate" {
            auth_count += 1;
        }
    }
    assert_eq!(auth_count, 2);

    manager.disconnect().unwrap();
}

#[tokio::test]
async fn test_ws_unreachable_server_schedules_retry() {
    // Bind then drop to get a port with nothing listening.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    drop(listener);

    let manager = manager_for(&url);
    let mut snapshots = manager.watch_snapshot();
    manager.connect().unwrap();

    let snapshot = wait_for_status(&mut snapshots, ConnectionStatus::Reconnecting).await;
    assert_eq!(snapshot.reconnect_attempts, 1);
    assert!(snapshot.next_retry_at.is_some());
    manager.disconnect().unwrap();
}
