//! Typed publish/subscribe between the connection state machine and its consumers.
//!
//! Event names form a closed set ([`EventKind`]); server messages the state
//! machine does not handle itself are forwarded as [`EventKind::Message`] keyed
//! by their `type` field.
//!
//! ```
//! use realtime_connector_rs::events::{EventDispatcher, EventKind, EventSource, ConnectionEvent};
//! use std::sync::Arc;
//!
//! let dispatcher = EventDispatcher::new();
//! let id = dispatcher.on(EventKind::Connect, Arc::new(|_event: &ConnectionEvent| {
//!     println!("connected");
//! }));
//! dispatcher.emit(&ConnectionEvent::Connect);
//! dispatcher.off(&EventKind::Connect, id);
//! ```

use crate::types::{ConnectionStatus, Message};
use log::*;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connecting,
    Authenticating,
    Connect,
    Disconnect,
    Reconnecting,
    Error,
    AuthError,
    MaxReconnectAttempts,
    QueueFull,
    /// A server message of the given `type`.
    Message(String),
}

impl EventKind {
    pub fn message(kind: impl Into<String>) -> Self {
        EventKind::Message(kind.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connecting { attempt: u32 },
    Authenticating,
    Connect,
    Disconnect { code: u16, reason: String },
    Reconnecting { attempt: u32, delay: Duration },
    Error { message: String },
    AuthError { message: String },
    MaxReconnectAttempts { attempts: u32 },
    QueueFull { capacity: usize },
    Message(Message),
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Connecting { .. } => EventKind::Connecting,
            ConnectionEvent::Authenticating => EventKind::Authenticating,
            ConnectionEvent::Connect => EventKind::Connect,
            ConnectionEvent::Disconnect { .. } => EventKind::Disconnect,
            ConnectionEvent::Reconnecting { .. } => EventKind::Reconnecting,
            ConnectionEvent::Error { .. } => EventKind::Error,
            ConnectionEvent::AuthError { .. } => EventKind::AuthError,
            ConnectionEvent::MaxReconnectAttempts { .. } => EventKind::MaxReconnectAttempts,
            ConnectionEvent::QueueFull { .. } => EventKind::QueueFull,
            ConnectionEvent::Message(msg) => EventKind::Message(msg.kind.clone()),
        }
    }

    /// Status the state machine is in after emitting this event, when the event
    /// itself implies one.
    pub fn implied_status(&self) -> Option<ConnectionStatus> {
        match self {
            ConnectionEvent::Connecting { .. } => Some(ConnectionStatus::Connecting),
            ConnectionEvent::Authenticating => Some(ConnectionStatus::Authenticated),
            ConnectionEvent::Connect => Some(ConnectionStatus::Connected),
            ConnectionEvent::Reconnecting { .. } => Some(ConnectionStatus::Reconnecting),
            ConnectionEvent::AuthError { .. } | ConnectionEvent::MaxReconnectAttempts { .. } => {
                Some(ConnectionStatus::Error)
            }
            _ => None,
        }
    }
}

pub type Handler = Arc<dyn Fn(&ConnectionEvent) + Send + Sync + 'static>;

/// Handle returned by `on`/`once`, used to remove that registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Subscribe/unsubscribe capability, implemented by the dispatcher and by the
/// connection manager that fronts it.
pub trait EventSource {
    fn on(&self, kind: EventKind, handler: Handler) -> ListenerId;
    /// Like `on`, but the registration is removed after its first invocation.
    fn once(&self, kind: EventKind, handler: Handler) -> ListenerId;
    /// Returns `false` if `id` was not registered for `kind`.
    fn off(&self, kind: &EventKind, id: ListenerId) -> bool;
}

struct Listener {
    id: ListenerId,
    handler: Handler,
    once: bool,
}

#[derive(Default)]
pub struct EventDispatcher {
    listeners: Mutex<HashMap<EventKind, Vec<Listener>>>,
    next_id: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, kind: EventKind, handler: Handler, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners
                .entry(kind)
                .or_default()
                .push(Listener { id, handler, once });
        }
        id
    }

    /// Calls every current subscriber of `event.kind()` in turn.
    ///
    /// Handlers run outside the registry lock, so they may subscribe or
    /// unsubscribe. A panicking handler is logged and skipped.
    pub fn emit(&self, event: &ConnectionEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = match self.listeners.lock() {
            Ok(mut listeners) => match listeners.get_mut(&kind) {
                Some(list) => {
                    let handlers = list.iter().map(|l| Arc::clone(&l.handler)).collect();
                    list.retain(|l| !l.once);
                    if list.is_empty() {
                        listeners.remove(&kind);
                    }
                    handlers
                }
                None => return,
            },
            Err(_) => {
                error!("[Events] Listener registry poisoned; dropping {:?}", kind);
                return;
            }
        };

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                warn!("[Events] Handler for {:?} panicked; continuing", kind);
            }
        }
    }

    pub fn clear(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.clear();
        }
    }

    pub fn listener_count(&self, kind: &EventKind) -> usize {
        self.listeners
            .lock()
            .map(|l| l.get(kind).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

impl EventSource for EventDispatcher {
    fn on(&self, kind: EventKind, handler: Handler) -> ListenerId {
        self.register(kind, handler, false)
    }

    fn once(&self, kind: EventKind, handler: Handler) -> ListenerId {
        self.register(kind, handler, true)
    }

    fn off(&self, kind: &EventKind, id: ListenerId) -> bool {
        let Ok(mut listeners) = self.listeners.lock() else {
            return false;
        };
        let Some(list) = listeners.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|l| l.id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            listeners.remove(kind);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Handler) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handler: Handler = Arc::new(move |_e: &ConnectionEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (count, handler)
    }

    #[test]
    fn test_on_and_off() {
        let dispatcher = EventDispatcher::new();
        let (count, handler) = counter();
        let id = dispatcher.on(EventKind::Connect, handler);
        dispatcher.emit(&ConnectionEvent::Connect);
        dispatcher.emit(&ConnectionEvent::Connect);
        assert!(dispatcher.off(&EventKind::Connect, id));
        assert!(!dispatcher.off(&EventKind::Connect, id));
        dispatcher.emit(&ConnectionEvent::Connect);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_once_fires_once() {
        let dispatcher = EventDispatcher::new();
        let (count, handler) = counter();
        dispatcher.once(EventKind::Connect, handler);
        dispatcher.emit(&ConnectionEvent::Connect);
        dispatcher.emit(&ConnectionEvent::Connect);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.listener_count(&EventKind::Connect), 0);
    }

    #[test]
    fn test_same_handler_on_multiple_events_removed_individually() {
        let dispatcher = EventDispatcher::new();
        let (count, handler) = counter();
        let on_connect = dispatcher.on(EventKind::Connect, Arc::clone(&handler));
        dispatcher.on(EventKind::Authenticating, handler);
        dispatcher.off(&EventKind::Connect, on_connect);

        dispatcher.emit(&ConnectionEvent::Connect);
        dispatcher.emit(&ConnectionEvent::Authenticating);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let dispatcher = EventDispatcher::new();
        let (count, handler) = counter();
        dispatcher.on(
            EventKind::Error,
            Arc::new(|_e: &ConnectionEvent| panic!("handler bug")),
        );
        dispatcher.on(EventKind::Error, handler);
        dispatcher.emit(&ConnectionEvent::Error {
            message: "boom".to_string(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_message_events_keyed_by_type() {
        let dispatcher = EventDispatcher::new();
        let (orders, handler) = counter();
        dispatcher.on(EventKind::message("order_update"), handler);

        let order = Message::new("order_update", serde_json::json!({}), None);
        let table = Message::new("table_update", serde_json::json!({}), None);
        dispatcher.emit(&ConnectionEvent::Message(order));
        dispatcher.emit(&ConnectionEvent::Message(table));
        assert_eq!(orders.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emission_order_within_event() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        dispatcher.on(
            EventKind::Reconnecting,
            Arc::new(move |e: &ConnectionEvent| {
                if let ConnectionEvent::Reconnecting { attempt, .. } = e {
                    s.lock().unwrap().push(*attempt);
                }
            }),
        );
        for attempt in 1..=3 {
            dispatcher.emit(&ConnectionEvent::Reconnecting {
                attempt,
                delay: Duration::from_secs(1),
            });
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_clear_removes_everything() {
        let dispatcher = EventDispatcher::new();
        let (count, handler) = counter();
        dispatcher.on(EventKind::Connect, handler);
        dispatcher.clear();
        dispatcher.emit(&ConnectionEvent::Connect);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
