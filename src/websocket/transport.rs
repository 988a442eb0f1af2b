use crate::error::Result;
use tokio::sync::mpsc;

/// Something that happened on a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message(String),
    Close { code: u16, reason: String },
    Error(String),
}

/// Event channel handed to a freshly opened transport.
///
/// Every event is tagged with the generation of the socket that produced it, so
/// the state machine can ignore anything from a socket it already discarded.
#[derive(Debug, Clone)]
pub struct TransportSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl TransportSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<(u64, TransportEvent)>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn open(&self) {
        self.emit(TransportEvent::Open);
    }

    pub fn message(&self, payload: impl Into<String>) {
        self.emit(TransportEvent::Message(payload.into()));
    }

    pub fn close(&self, code: u16, reason: impl Into<String>) {
        self.emit(TransportEvent::Close {
            code,
            reason: reason.into(),
        });
    }

    pub fn error(&self, detail: impl Into<String>) {
        self.emit(TransportEvent::Error(detail.into()));
    }

    fn emit(&self, event: TransportEvent) {
        // The receiver only goes away when the manager stops.
        let _ = self.tx.send((self.generation, event));
    }
}

/// A live bidirectional, message-oriented socket.
///
/// Dropping a transport must release it; the state machine drops every socket
/// it is done with and never reuses one across reconnects.
pub trait Transport: Send {
    fn send(&mut self, payload: String) -> Result<()>;
    fn close(&mut self, code: u16, reason: &str);
}

/// Factory for transports. `open` must not block: the socket reports
/// `Open`, `Message`, `Close` and `Error` through `sink` asynchronously.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, sink: TransportSink) -> Box<dyn Transport>;
}
