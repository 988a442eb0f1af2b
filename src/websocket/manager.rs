//! Connection state machine.
//!
//! [`ConnectionManager`] is a cheap handle; the state itself lives in a single
//! background task that owns the transport, the backoff counter, the outbound
//! queue and every timer. Public calls only enqueue commands and return
//! immediately, so their effects show up through events and snapshots.

use crate::auth::{build_auth_message, Credentials, TokenProvider};
use crate::backoff::Backoff;
use crate::config::ConnectionConfig;
use crate::error::{ConnectorError, Result};
use crate::events::{ConnectionEvent, EventDispatcher, EventKind, EventSource, Handler, ListenerId};
use crate::heartbeat::{HeartbeatAction, HeartbeatWatchdog};
use crate::queue::MessageQueue;
use crate::types::*;
use crate::websocket::transport::{Connector, Transport, TransportEvent, TransportSink};
use log::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Duration, Instant};

/// Effectively "never" for an unarmed timer.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

enum Command {
    Connect,
    Reconnect,
    Disconnect,
    Send(OutgoingMessage),
}

/// Point-in-time view of the state machine, republished after every change.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConnectionSnapshot {
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    /// When the scheduled reconnect fires, if one is scheduled.
    pub next_retry_at: Option<Instant>,
    pub can_manual_reconnect: bool,
    pub last_error: Option<String>,
    pub queued_messages: usize,
    pub dropped_messages: u64,
}

/// Handle to one logical connection. Clones share the same connection; the
/// background task stops (closing its socket) once every handle is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    dispatcher: Arc<EventDispatcher>,
    snapshot_rx: watch::Receiver<ConnectionSnapshot>,
    config: Arc<ConnectionConfig>,
}

impl ConnectionManager {
    /// Spawns the connection task. Must be called from within a tokio runtime.
    ///
    /// Nothing is dialed until [`ConnectionManager::connect`] is called.
    pub fn new(
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(EventDispatcher::new());
        let initial = ConnectionSnapshot {
            max_reconnect_attempts: config.backoff.max_attempts,
            ..ConnectionSnapshot::default()
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let task = ConnectionTask {
            backoff: Backoff::new(config.backoff.clone()),
            queue: MessageQueue::new(config.max_queue_size),
            heartbeat: HeartbeatWatchdog::new(config.heartbeat.clone()),
            config: config.clone(),
            connector,
            tokens,
            dispatcher: Arc::clone(&dispatcher),
            snapshot_tx,
            events_tx,
            status: ConnectionStatus::Disconnected,
            generation: 0,
            transport: None,
            credentials: None,
            connect_deadline: None,
            auth_deadline: None,
            reconnect_at: None,
            can_manual_reconnect: false,
            last_error: None,
        };
        tokio::spawn(task.run(cmd_rx, events_rx));

        Ok(Self {
            cmd_tx,
            dispatcher,
            snapshot_rx,
            config: Arc::new(config),
        })
    }

    /// Starts connecting. A no-op unless the status is `disconnected` or `error`.
    pub fn connect(&self) -> Result<()> {
        self.command(Command::Connect)
    }

    /// Resets the backoff counter and starts a fresh attempt, dropping any
    /// current socket. Ignored while a handshake is already in flight.
    pub fn reconnect(&self) -> Result<()> {
        self.command(Command::Reconnect)
    }

    /// Closes with code 1000, cancels every timer, resets backoff and removes
    /// all listeners. Calling it again is a no-op.
    pub fn disconnect(&self) -> Result<()> {
        self.command(Command::Disconnect)
    }

    /// Sends now if connected, otherwise queues for the next successful
    /// authentication. Messages beyond the queue bound are dropped.
    pub fn send(&self, message: OutgoingMessage) -> Result<()> {
        self.command(Command::Send(message))
    }

    pub fn status(&self) -> ConnectionStatus {
        self.snapshot_rx.borrow().status
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn watch_snapshot(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Number of handlers currently registered for `kind`.
    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.dispatcher.listener_count(kind)
    }

    fn command(&self, cmd: Command) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .map_err(|_| ConnectorError::ManagerStopped)
    }
}

impl EventSource for ConnectionManager {
    fn on(&self, kind: EventKind, handler: Handler) -> ListenerId {
        self.dispatcher.on(kind, handler)
    }

    fn once(&self, kind: EventKind, handler: Handler) -> ListenerId {
        self.dispatcher.once(kind, handler)
    }

    fn off(&self, kind: &EventKind, id: ListenerId) -> bool {
        self.dispatcher.off(kind, id)
    }
}

struct ConnectionTask {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    dispatcher: Arc<EventDispatcher>,
    snapshot_tx: watch::Sender<ConnectionSnapshot>,
    events_tx: mpsc::UnboundedSender<(u64, TransportEvent)>,

    status: ConnectionStatus,
    /// Generation of the most recently opened socket.
    generation: u64,
    transport: Option<(u64, Box<dyn Transport>)>,
    credentials: Option<Credentials>,
    backoff: Backoff,
    queue: MessageQueue,
    heartbeat: HeartbeatWatchdog,

    connect_deadline: Option<Instant>,
    auth_deadline: Option<Instant>,
    reconnect_at: Option<Instant>,

    can_manual_reconnect: bool,
    last_error: Option<String>,
}

impl ConnectionTask {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut events_rx: mpsc::UnboundedReceiver<(u64, TransportEvent)>,
    ) {
        info!("[Manager] Task started for {}", self.config.url);
        loop {
            let timer = self.next_timer();
            let wake_at = timer.unwrap_or_else(|| Instant::now() + FAR_FUTURE);

            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some((generation, event)) = events_rx.recv() => {
                    self.handle_transport_event(generation, event);
                }
                _ = sleep_until(wake_at), if timer.is_some() => {
                    self.fire_timers(Instant::now());
                }
            }
            self.publish();
        }

        if let Some((_, mut transport)) = self.transport.take() {
            transport.close(CLOSE_NORMAL, "client shutdown");
        }
        info!("[Manager] Task finished.");
    }

    fn next_timer(&self) -> Option<Instant> {
        [
            self.connect_deadline,
            self.auth_deadline,
            self.reconnect_at,
            self.heartbeat.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    // --- Commands ---

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => match self.status {
                ConnectionStatus::Disconnected | ConnectionStatus::Error => {
                    self.can_manual_reconnect = false;
                    self.open_transport();
                }
                status => debug!("[Manager] connect() ignored while {}", status),
            },
            Command::Reconnect => {
                if self.status.is_handshaking() {
                    debug!("[Manager] reconnect() ignored while {}", self.status);
                    return;
                }
                info!("[Manager] Manual reconnect requested.");
                self.cancel_timers();
                self.release_transport(CLOSE_NORMAL, "manual reconnect");
                self.backoff.reset();
                self.can_manual_reconnect = false;
                self.open_transport();
            }
            Command::Disconnect => self.disconnect(),
            Command::Send(outgoing) => {
                let scope = outgoing.scope.or_else(|| self.config.scope.clone());
                let message = Message::new(outgoing.kind, outgoing.data, scope);
                if self.status == ConnectionStatus::Connected {
                    if let Err(e) = self.transmit(&message) {
                        warn!("[Manager] Send failed ({}); queueing message {}", e, message.id);
                        self.enqueue(message);
                    }
                } else {
                    self.enqueue(message);
                }
            }
        }
    }

    fn disconnect(&mut self) {
        if self.status == ConnectionStatus::Disconnected
            && self.transport.is_none()
            && self.reconnect_at.is_none()
        {
            debug!("[Manager] Already disconnected.");
            return;
        }
        info!("[Manager] Disconnecting.");
        self.cancel_timers();
        self.release_transport(CLOSE_NORMAL, "client disconnect");
        self.backoff.reset();
        self.can_manual_reconnect = false;
        self.status = ConnectionStatus::Disconnected;
        self.emit(ConnectionEvent::Disconnect {
            code: CLOSE_NORMAL,
            reason: "client disconnect".to_string(),
        });
        self.dispatcher.clear();
    }

    // --- Transport lifecycle ---

    fn open_transport(&mut self) {
        self.cancel_timers();
        self.release_transport(CLOSE_NORMAL, "superseded");

        self.generation += 1;
        let generation = self.generation;
        self.credentials = self.tokens.credentials();
        if self.credentials.is_none() {
            warn!("[Manager] No credentials available; the handshake will be rejected.");
        }

        let sink = TransportSink::new(generation, self.events_tx.clone());
        let transport = self.connector.open(sink);
        self.transport = Some((generation, transport));
        self.status = ConnectionStatus::Connecting;
        self.connect_deadline = Some(Instant::now() + self.config.connect_timeout);

        info!(
            "[Manager] Attempting connection (socket {}, retry {})...",
            generation,
            self.backoff.attempts()
        );
        self.emit(ConnectionEvent::Connecting {
            attempt: self.backoff.attempts(),
        });
    }

    /// Closes and forgets the live socket; its later events become stale.
    fn release_transport(&mut self, code: u16, reason: &str) {
        if let Some((generation, mut transport)) = self.transport.take() {
            debug!("[Manager] Closing socket {} ({} {})", generation, code, reason);
            transport.close(code, reason);
        }
    }

    fn cancel_timers(&mut self) {
        self.connect_deadline = None;
        self.auth_deadline = None;
        self.reconnect_at = None;
        self.heartbeat.stop();
    }

    fn handle_transport_event(&mut self, generation: u64, event: TransportEvent) {
        let live = matches!(&self.transport, Some((g, _)) if *g == generation);
        if !live {
            debug!(
                "[Manager] Ignoring {:?} from stale socket {}",
                event, generation
            );
            return;
        }
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(payload) => self.on_message(&payload),
            TransportEvent::Close { code, reason } => self.on_close(code, reason),
            TransportEvent::Error(detail) => {
                warn!("[Manager] Transport error: {}", detail);
                self.last_error = Some(detail.clone());
                self.emit(ConnectionEvent::Error { message: detail });
            }
        }
    }

    fn on_open(&mut self) {
        if self.status != ConnectionStatus::Connecting {
            warn!("[Manager] Unexpected open while {}", self.status);
            return;
        }
        self.connect_deadline = None;

        let sent = build_auth_message(self.credentials.as_ref(), &self.config)
            .and_then(|payload| self.send_raw(payload));
        if let Err(e) = sent {
            error!("[Manager] Failed to send auth message: {}", e);
            self.release_transport(CLOSE_ABNORMAL, "auth send failed");
            self.handle_lost_connection(CLOSE_ABNORMAL, e.to_string());
            return;
        }

        info!("[Manager] Socket open. Authenticating...");
        self.status = ConnectionStatus::Authenticated;
        self.auth_deadline = Some(Instant::now() + self.config.auth_timeout);
        self.emit(ConnectionEvent::Authenticating);
    }

    fn on_message(&mut self, payload: &str) {
        let message = match Message::from_json(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("[Manager] Ignoring unparseable frame: {}", e);
                return;
            }
        };
        trace!("[Manager] Received {} message", message.kind);

        match message.kind.as_str() {
            TYPE_AUTHENTICATED => {
                if self.status == ConnectionStatus::Authenticated {
                    self.on_authenticated();
                } else {
                    debug!("[Manager] Ignoring authenticated while {}", self.status);
                }
            }
            TYPE_AUTH_ERROR => {
                if self.status == ConnectionStatus::Authenticated {
                    let reason = auth_error_reason(&message.data);
                    self.fail_authentication(CLOSE_AUTH_FAILED, reason);
                } else {
                    debug!("[Manager] Ignoring auth_error while {}", self.status);
                }
            }
            TYPE_PING => {
                let pong = Message::new(TYPE_PONG, json!({}), None);
                if let Err(e) = self.transmit(&pong) {
                    warn!("[Manager] Failed to answer ping: {}", e);
                }
            }
            TYPE_PONG => self.heartbeat.on_pong(),
            _ => self.emit(ConnectionEvent::Message(message)),
        }
    }

    fn on_authenticated(&mut self) {
        self.auth_deadline = None;
        self.backoff.reset();
        self.status = ConnectionStatus::Connected;
        self.can_manual_reconnect = false;
        self.last_error = None;
        self.heartbeat.start(Instant::now());
        self.drain_queue();
        info!("[Manager] Authenticated. Connection established.");
        self.emit(ConnectionEvent::Connect);
    }

    fn fail_authentication(&mut self, code: u16, reason: String) {
        warn!("[Manager] Authentication failed: {}", reason);
        self.cancel_timers();
        self.release_transport(code, &reason);
        self.status = ConnectionStatus::Error;
        self.can_manual_reconnect = true;
        self.last_error = Some(reason.clone());
        self.emit(ConnectionEvent::AuthError { message: reason });
    }

    fn on_close(&mut self, code: u16, reason: String) {
        // The peer already closed it; just forget it.
        self.transport = None;
        if code == CLOSE_NORMAL {
            info!("[Manager] Socket closed normally: {}", reason);
            self.cancel_timers();
            self.backoff.reset();
            self.status = ConnectionStatus::Disconnected;
            self.emit(ConnectionEvent::Disconnect { code, reason });
        } else {
            self.handle_lost_connection(code, reason);
        }
    }

    fn handle_lost_connection(&mut self, code: u16, reason: String) {
        self.cancel_timers();
        self.last_error = Some(format!("{} (code {})", reason, code));
        self.emit(ConnectionEvent::Disconnect { code, reason });
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.backoff.has_reached_max_attempts() {
            self.give_up();
            return;
        }
        match self.backoff.next_delay() {
            Ok(delay) => {
                let attempt = self.backoff.attempts();
                warn!(
                    "[Manager] Disconnected. Retrying in {:?} (attempt {}/{})...",
                    delay,
                    attempt,
                    self.backoff.max_attempts()
                );
                self.status = ConnectionStatus::Reconnecting;
                self.reconnect_at = Some(Instant::now() + delay);
                self.emit(ConnectionEvent::Reconnecting { attempt, delay });
            }
            Err(e) => {
                error!("[Manager] {}", e);
                self.give_up();
            }
        }
    }

    fn give_up(&mut self) {
        let attempts = self.backoff.attempts();
        error!(
            "[Manager] Max retries ({}) reached. Stopping connection attempts.",
            attempts
        );
        self.status = ConnectionStatus::Error;
        self.reconnect_at = None;
        self.can_manual_reconnect = true;
        self.last_error = Some(format!(
            "Gave up after {} reconnection attempts",
            attempts
        ));
        self.emit(ConnectionEvent::MaxReconnectAttempts { attempts });
    }

    // --- Timers ---

    fn fire_timers(&mut self, now: Instant) {
        if matches!(self.connect_deadline, Some(at) if now >= at) {
            self.connect_deadline = None;
            warn!("[Manager] Connection timed out.");
            self.release_transport(CLOSE_CONNECT_TIMEOUT, "connection timeout");
            self.handle_lost_connection(CLOSE_CONNECT_TIMEOUT, "connection timeout".to_string());
        }
        if matches!(self.auth_deadline, Some(at) if now >= at) {
            self.auth_deadline = None;
            self.fail_authentication(CLOSE_AUTH_TIMEOUT, "Authentication timed out".to_string());
        }
        if matches!(self.reconnect_at, Some(at) if now >= at) {
            self.reconnect_at = None;
            self.open_transport();
        }
        match self.heartbeat.poll(now) {
            Some(HeartbeatAction::SendPing) => {
                let ping = Message::new(TYPE_PING, json!({}), None);
                if let Err(e) = self.transmit(&ping) {
                    warn!("[Manager] Failed to send ping: {}", e);
                }
            }
            Some(HeartbeatAction::TimedOut) => {
                warn!("[Manager] No pong within {:?}; dropping socket.", self.config.heartbeat.pong_timeout);
                self.release_transport(CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout");
                self.handle_lost_connection(CLOSE_HEARTBEAT_TIMEOUT, "heartbeat timeout".to_string());
            }
            None => {}
        }
    }

    // --- Outbound ---

    fn enqueue(&mut self, message: Message) {
        if !self.queue.enqueue(message) {
            warn!(
                "[Manager] Message queue full ({}); dropping message.",
                self.queue.capacity()
            );
            self.emit(ConnectionEvent::QueueFull {
                capacity: self.queue.capacity(),
            });
        }
    }

    fn drain_queue(&mut self) {
        let pending = self.queue.drain();
        if pending.is_empty() {
            return;
        }
        info!("[Manager] Flushing {} queued messages...", pending.len());
        let mut pending = pending.into_iter();
        while let Some(message) = pending.next() {
            if let Err(e) = self.transmit(&message) {
                error!("[Manager] Flush aborted: {}", e);
                let rest: Vec<Message> = std::iter::once(message).chain(pending).collect();
                self.queue.requeue_front(rest);
                break;
            }
        }
    }

    fn transmit(&mut self, message: &Message) -> Result<()> {
        let payload = message.to_json()?;
        self.send_raw(payload)
    }

    fn send_raw(&mut self, payload: String) -> Result<()> {
        match self.transport.as_mut() {
            Some((_, transport)) => transport.send(payload),
            None => Err(ConnectorError::WebsocketError("Not connected".to_string())),
        }
    }

    // --- Observability ---

    fn emit(&self, event: ConnectionEvent) {
        // Handlers that read the snapshot must see the post-transition state.
        self.publish();
        self.dispatcher.emit(&event);
    }

    fn publish(&self) {
        let snapshot = ConnectionSnapshot {
            status: self.status,
            reconnect_attempts: self.backoff.attempts(),
            max_reconnect_attempts: self.backoff.max_attempts(),
            next_retry_at: self.reconnect_at,
            can_manual_reconnect: self.can_manual_reconnect,
            last_error: self.last_error.clone(),
            queued_messages: self.queue.len(),
            dropped_messages: self.queue.dropped(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

fn auth_error_reason(data: &Value) -> String {
    data.get("message")
        .or_else(|| data.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| "Authentication rejected".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_reason_fallbacks() {
        assert_eq!(
            auth_error_reason(&json!({"message": "token expired"})),
            "token expired"
        );
        assert_eq!(auth_error_reason(&json!({"error": "bad"})), "bad");
        assert_eq!(auth_error_reason(&Value::Null), "Authentication rejected");
    }
}
