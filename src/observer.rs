//! Display-oriented view of a connection for UI code.
//!
//! The observer listens to the manager's events for immediate updates and
//! re-reads the authoritative snapshot on a short interval, so a missed event
//! never leaves the UI showing a stale status.

use crate::error::Result;
use crate::events::{ConnectionEvent, EventKind, EventSource, ListenerId};
use crate::types::{ConnectionStatus, CLOSE_NORMAL};
use crate::websocket::manager::{ConnectionManager, ConnectionSnapshot};
use log::*;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

const OBSERVED_EVENTS: [EventKind; 8] = [
    EventKind::Connecting,
    EventKind::Authenticating,
    EventKind::Connect,
    EventKind::Disconnect,
    EventKind::Reconnecting,
    EventKind::Error,
    EventKind::AuthError,
    EventKind::MaxReconnectAttempts,
];

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionObserverState {
    pub status: ConnectionStatus,
    pub is_connected: bool,
    pub is_connecting: bool,
    pub is_reconnecting: bool,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    /// Whole seconds until the scheduled retry; 0 when none is scheduled.
    pub reconnect_countdown_seconds: u64,
    pub can_manual_reconnect: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct Tracked {
    status: ConnectionStatus,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
    next_retry_at: Option<Instant>,
    can_manual_reconnect: bool,
    last_error: Option<String>,
}

impl Tracked {
    fn apply_event(&mut self, event: &ConnectionEvent, now: Instant) {
        match event {
            ConnectionEvent::Connecting { .. } => {
                self.status = ConnectionStatus::Connecting;
                self.next_retry_at = None;
            }
            ConnectionEvent::Authenticating => self.status = ConnectionStatus::Authenticated,
            ConnectionEvent::Connect => {
                self.status = ConnectionStatus::Connected;
                self.reconnect_attempts = 0;
                self.can_manual_reconnect = false;
                self.last_error = None;
                self.next_retry_at = None;
            }
            ConnectionEvent::Disconnect { code, reason } => {
                self.next_retry_at = None;
                if *code == CLOSE_NORMAL {
                    self.status = ConnectionStatus::Disconnected;
                } else {
                    self.last_error = Some(format!("{} (code {})", reason, code));
                }
            }
            ConnectionEvent::Reconnecting { attempt, delay } => {
                self.status = ConnectionStatus::Reconnecting;
                self.reconnect_attempts = *attempt;
                self.next_retry_at = Some(now + *delay);
            }
            ConnectionEvent::Error { message } => self.last_error = Some(message.clone()),
            ConnectionEvent::AuthError { message } => {
                self.status = ConnectionStatus::Error;
                self.can_manual_reconnect = true;
                self.last_error = Some(message.clone());
            }
            ConnectionEvent::MaxReconnectAttempts { attempts } => {
                self.status = ConnectionStatus::Error;
                self.reconnect_attempts = *attempts;
                self.can_manual_reconnect = true;
                self.next_retry_at = None;
            }
            _ => {}
        }
    }

    /// Snapshot values win over anything derived from events.
    fn apply_snapshot(&mut self, snapshot: &ConnectionSnapshot) {
        if self.status != snapshot.status {
            debug!(
                "[Observer] Correcting status {} -> {}",
                self.status, snapshot.status
            );
        }
        self.status = snapshot.status;
        self.reconnect_attempts = snapshot.reconnect_attempts;
        self.max_reconnect_attempts = snapshot.max_reconnect_attempts;
        self.next_retry_at = snapshot.next_retry_at;
        self.can_manual_reconnect = snapshot.can_manual_reconnect;
        if snapshot.last_error.is_some() || snapshot.status == ConnectionStatus::Connected {
            self.last_error = snapshot.last_error.clone();
        }
    }

    fn derive(&self, now: Instant) -> ConnectionObserverState {
        let countdown = match (self.status, self.next_retry_at) {
            (ConnectionStatus::Reconnecting, Some(at)) => {
                let remaining = at.saturating_duration_since(now).as_millis() as u64;
                (remaining + 999) / 1000
            }
            _ => 0,
        };
        ConnectionObserverState {
            status: self.status,
            is_connected: self.status == ConnectionStatus::Connected,
            is_connecting: self.status.is_handshaking(),
            is_reconnecting: self.status == ConnectionStatus::Reconnecting,
            reconnect_attempts: self.reconnect_attempts,
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_countdown_seconds: countdown,
            can_manual_reconnect: self.can_manual_reconnect,
            last_error: self.last_error.clone(),
        }
    }
}

struct Shared {
    tracked: Mutex<Tracked>,
    state_tx: watch::Sender<ConnectionObserverState>,
}

impl Shared {
    fn update(&self, f: impl FnOnce(&mut Tracked, Instant)) {
        let now = Instant::now();
        let state = match self.tracked.lock() {
            Ok(mut tracked) => {
                f(&mut tracked, now);
                tracked.derive(now)
            }
            Err(_) => return,
        };
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

/// UI adapter over a [`ConnectionManager`]. Owns no transport logic.
///
/// Stops polling and unsubscribes when dropped. Listeners are also removed by
/// [`ConnectionManager::disconnect`]; after that the observer keeps tracking
/// through polling alone.
pub struct ConnectionObserver {
    manager: ConnectionManager,
    shared: Arc<Shared>,
    listeners: Vec<(EventKind, ListenerId)>,
    poll_task: JoinHandle<()>,
}

impl ConnectionObserver {
    pub fn new(manager: &ConnectionManager) -> Self {
        Self::with_poll_interval(manager, DEFAULT_POLL_INTERVAL)
    }

    /// Must be called from within a tokio runtime.
    pub fn with_poll_interval(manager: &ConnectionManager, poll_interval: Duration) -> Self {
        let mut tracked = Tracked::default();
        tracked.apply_snapshot(&manager.snapshot());
        let initial = tracked.derive(Instant::now());
        let (state_tx, _) = watch::channel(initial);
        let shared = Arc::new(Shared {
            tracked: Mutex::new(tracked),
            state_tx,
        });

        let listeners = OBSERVED_EVENTS
            .iter()
            .map(|kind| {
                let shared = Arc::clone(&shared);
                let id = manager.on(
                    kind.clone(),
                    Arc::new(move |event: &ConnectionEvent| {
                        shared.update(|tracked, now| tracked.apply_event(event, now));
                    }),
                );
                (kind.clone(), id)
            })
            .collect();

        let poll_task = tokio::spawn({
            let shared = Arc::clone(&shared);
            let snapshots = manager.watch_snapshot();
            async move {
                let mut ticker = time::interval(poll_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    let snapshot = snapshots.borrow().clone();
                    shared.update(|tracked, _| tracked.apply_snapshot(&snapshot));
                }
            }
        });

        Self {
            manager: manager.clone(),
            shared,
            listeners,
            poll_task,
        }
    }

    /// Current derived state, with the countdown computed against now.
    pub fn state(&self) -> ConnectionObserverState {
        let now = Instant::now();
        match self.shared.tracked.lock() {
            Ok(tracked) => tracked.derive(now),
            Err(_) => self.shared.state_tx.borrow().clone(),
        }
    }

    /// Receives every change of the derived state, including countdown ticks.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionObserverState> {
        self.shared.state_tx.subscribe()
    }

    /// Starts a fresh connection attempt with a reset backoff.
    ///
    /// Returns `Ok(false)` without doing anything unless a manual reconnect is
    /// currently offered.
    pub fn reconnect(&self) -> Result<bool> {
        let mut allowed = false;
        self.shared.update(|tracked, _| {
            if tracked.can_manual_reconnect {
                allowed = true;
                tracked.can_manual_reconnect = false;
                tracked.reconnect_attempts = 0;
            }
        });
        if !allowed {
            debug!("[Observer] reconnect() ignored; manual reconnect not offered.");
            return Ok(false);
        }
        info!("[Observer] Manual reconnect.");
        self.manager.reconnect()?;
        Ok(true)
    }
}

impl Drop for ConnectionObserver {
    fn drop(&mut self) {
        self.poll_task.abort();
        for (kind, id) in &self.listeners {
            self.manager.off(kind, *id);
        }
    }
}
