// tests/common.rs
#![allow(dead_code)]

use realtime_connector_rs::auth::{Credentials, StaticTokenProvider};
use realtime_connector_rs::config::ConnectionConfig;
use realtime_connector_rs::events::{ConnectionEvent, EventKind, EventSource};
use realtime_connector_rs::error::Result;
use realtime_connector_rs::websocket::{ConnectionManager, Connector, Transport, TransportSink};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex, Once};
use tokio::time::{Duration, Instant};

static INIT: Once = Once::new();

// Initializes test logging once across all tests.
pub fn setup() {
    INIT.call_once(|| {
        env_logger::builder().is_test(true).try_init().ok();
    });
}

pub const TEST_URL: &str = "ws://mock.local/ws";

pub fn test_config() -> ConnectionConfig {
    ConnectionConfig::new(TEST_URL).with_client("dashboard", "9.9.9")
}

/// One socket handed out by [`MockConnector`]. The test plays the server.
#[derive(Clone)]
pub struct MockSocket {
    sink: TransportSink,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Option<(u16, String)>>>,
}

impl MockSocket {
    pub fn open(&self) {
        self.sink.open();
    }

    pub fn reply(&self, value: Value) {
        self.sink.message(value.to_string());
    }

    pub fn reply_raw(&self, payload: &str) {
        self.sink.message(payload);
    }

    pub fn authenticate(&self) {
        self.reply(json!({ "type": "authenticated" }));
    }

    pub fn close(&self, code: u16, reason: &str) {
        self.sink.close(code, reason);
    }

    pub fn error(&self, detail: &str) {
        self.sink.error(detail);
    }

    /// Every frame the manager wrote, parsed as JSON.
    pub fn sent(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|raw| serde_json::from_str(raw).expect("manager sent invalid JSON"))
            .collect()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent()
            .iter()
            .map(|v| v["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// The code and reason the manager closed this socket with, if it did.
    pub fn closed_with(&self) -> Option<(u16, String)> {
        self.closed.lock().unwrap().clone()
    }
}

struct MockTransport {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Option<(u16, String)>>>,
}

impl Transport for MockTransport {
    fn send(&mut self, payload: String) -> Result<()> {
        self.sent.lock().unwrap().push(payload);
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) {
        *self.closed.lock().unwrap() = Some((code, reason.to_string()));
    }
}

#[derive(Clone, Default)]
pub struct MockConnector {
    sockets: Arc<Mutex<Vec<MockSocket>>>,
}

impl MockConnector {
    pub fn opened(&self) -> usize {
        self.sockets.lock().unwrap().len()
    }

    pub fn socket(&self, index: usize) -> MockSocket {
        self.sockets.lock().unwrap()[index].clone()
    }

    pub fn last(&self) -> MockSocket {
        self.sockets
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no socket opened yet")
    }
}

impl Connector for MockConnector {
    fn open(&self, sink: TransportSink) -> Box<dyn Transport> {
        let socket = MockSocket {
            sink,
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(None)),
        };
        let transport = MockTransport {
            sent: Arc::clone(&socket.sent),
            closed: Arc::clone(&socket.closed),
        };
        self.sockets.lock().unwrap().push(socket);
        Box::new(transport)
    }
}

pub struct Harness {
    pub manager: ConnectionManager,
    pub connector: MockConnector,
    pub tokens: StaticTokenProvider,
    pub events: Arc<Mutex<Vec<ConnectionEvent>>>,
}

impl Harness {
    pub fn new(config: ConnectionConfig) -> Self {
        setup();
        let connector = MockConnector::default();
        let tokens = StaticTokenProvider::new(Credentials::new("token-1", "user-1"));
        let manager = ConnectionManager::new(
            config,
            Arc::new(connector.clone()),
            Arc::new(tokens.clone()),
        )
        .expect("valid test config");
        let events = record_events(&manager);
        Self {
            manager,
            connector,
            tokens,
            events,
        }
    }

    /// connect() → open → authenticated, returning the live socket.
    pub async fn connect_and_authenticate(&self) -> MockSocket {
        self.manager.connect().unwrap();
        settle().await;
        let socket = self.connector.last();
        socket.open();
        settle().await;
        socket.authenticate();
        settle().await;
        socket
    }

    pub fn events(&self) -> Vec<ConnectionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(|e| e.kind()).collect()
    }

    /// Advances the paused clock just past the scheduled retry.
    pub async fn advance_past_retry(&self) {
        let at = self
            .manager
            .snapshot()
            .next_retry_at
            .expect("no retry scheduled");
        let wait = at.saturating_duration_since(Instant::now()) + Duration::from_millis(1);
        advance(wait).await;
    }
}

pub const RECORDED_EVENTS: [EventKind; 9] = [
    EventKind::Connecting,
    EventKind::Authenticating,
    EventKind::Connect,
    EventKind::Disconnect,
    EventKind::Reconnecting,
    EventKind::Error,
    EventKind::AuthError,
    EventKind::MaxReconnectAttempts,
    EventKind::QueueFull,
];

pub fn record_events(manager: &ConnectionManager) -> Arc<Mutex<Vec<ConnectionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in RECORDED_EVENTS.iter() {
        let events = Arc::clone(&events);
        manager.on(
            kind.clone(),
            Arc::new(move |e: &ConnectionEvent| events.lock().unwrap().push(e.clone())),
        );
    }
    events
}

/// Lets the connection task drain its channels without moving the clock.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}
