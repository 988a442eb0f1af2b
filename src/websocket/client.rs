use crate::config::ConnectionConfig;
use crate::error::{ConnectorError, Result};
use crate::types::{CLOSE_ABNORMAL, CLOSE_NORMAL};
use crate::websocket::transport::{Connector, Transport, TransportSink};
use futures_util::{SinkExt, StreamExt};
use log::*;
use std::borrow::Cow;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message as WsMessage},
};

/// Dials real WebSocket connections with tokio-tungstenite.
///
/// Each `open` spawns one task that owns the socket: it reports lifecycle
/// events through the sink, forwards text frames, answers protocol pings and
/// writes whatever the returned [`WsTransport`] hands it.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self::new(config.url.clone())
    }
}

impl Connector for WsConnector {
    fn open(&self, sink: TransportSink) -> Box<dyn Transport> {
        let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
        tokio::spawn(run_socket(self.url.clone(), sink, rx));
        Box::new(WsTransport { tx })
    }
}

/// Handle to a socket task. Dropping it closes the socket with code 1000.
pub struct WsTransport {
    tx: mpsc::UnboundedSender<WsMessage>,
}

impl Transport for WsTransport {
    fn send(&mut self, payload: String) -> Result<()> {
        self.tx
            .send(WsMessage::Text(payload))
            .map_err(|e| ConnectorError::WebsocketError(format!("Failed to send message: {}", e)))
    }

    fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: Cow::Owned(reason.to_string()),
        };
        let _ = self.tx.send(WsMessage::Close(Some(frame)));
    }
}

async fn run_socket(url: String, sink: TransportSink, mut rx: mpsc::UnboundedReceiver<WsMessage>) {
    let generation = sink.generation();
    info!("[Socket {}] Connecting to WebSocket: {}", generation, url);

    let ws_stream = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((stream, response)) => {
                info!(
                    "[Socket {}] WebSocket connected. Response: {:?}",
                    generation,
                    response.status()
                );
                stream
            }
            Err(e) => {
                error!("[Socket {}] WebSocket connection failed: {}", generation, e);
                sink.error(format!("WebSocket connection failed: {}", e));
                sink.close(CLOSE_ABNORMAL, "connection failed");
                return;
            }
        },
        // Closed or dropped before the dial finished.
        _ = rx.recv() => {
            debug!("[Socket {}] Abandoned while connecting.", generation);
            return;
        }
    };

    sink.open();
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let message = outbound.unwrap_or_else(|| {
                    WsMessage::Close(Some(CloseFrame {
                        code: CloseCode::from(CLOSE_NORMAL),
                        reason: Cow::Borrowed("client closed"),
                    }))
                });
                let is_close = matches!(message, WsMessage::Close(_));
                trace!("[Socket {}] Sending WS frame", generation);
                if let Err(e) = write.send(message).await {
                    error!("[Socket {}] WebSocket send error: {}", generation, e);
                    sink.error(format!("WebSocket send error: {}", e));
                    sink.close(CLOSE_ABNORMAL, "send failed");
                    break;
                }
                if is_close {
                    debug!("[Socket {}] Close frame sent.", generation);
                    break;
                }
            }
            inbound = read.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    trace!("[Socket {}] Received WS Text: {}", generation, text);
                    sink.message(text);
                }
                Some(Ok(WsMessage::Binary(bin))) => {
                    trace!("[Socket {}] Ignoring {} byte binary frame", generation, bin.len());
                }
                Some(Ok(WsMessage::Ping(data))) => {
                    if let Err(e) = write.send(WsMessage::Pong(data)).await {
                        warn!("[Socket {}] Failed to send Pong: {}", generation, e);
                    }
                }
                Some(Ok(WsMessage::Pong(_))) | Some(Ok(WsMessage::Frame(_))) => {}
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(f) => (u16::from(f.code), f.reason.into_owned()),
                        None => (CLOSE_ABNORMAL, "closed without status".to_string()),
                    };
                    warn!("[Socket {}] Received WS Close: {} {}", generation, code, reason);
                    sink.close(code, reason);
                    break;
                }
                Some(Err(e)) => {
                    error!("[Socket {}] WebSocket read error: {}", generation, e);
                    sink.error(format!("WebSocket read error: {}", e));
                    sink.close(CLOSE_ABNORMAL, e.to_string());
                    break;
                }
                None => {
                    info!("[Socket {}] WebSocket stream ended.", generation);
                    sink.close(CLOSE_ABNORMAL, "stream ended");
                    break;
                }
            }
        }
    }
    info!("[Socket {}] Socket task finished.", generation);
}
