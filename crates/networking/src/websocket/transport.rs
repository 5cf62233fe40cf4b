//! Transport seam between a managed connection and a physical socket
//!
//! Opening a transport is non-blocking, like constructing a browser
//! `WebSocket`: the caller gets a session immediately and learns about the
//! handshake outcome through [`TransportEvent`]s. The managed connection owns
//! the event receiver; dropping it abandons the session.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Normal, intentional closure
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close frame carried no status code
pub const NO_STATUS_CLOSURE: u16 = 1005;
/// Connection dropped without a close handshake
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Handshake did not complete within the connection timeout
pub const TIMEOUT_CLOSURE: u16 = 4008;

/// Why a transport session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    /// Whether the close handshake completed
    pub was_clean: bool,
}

impl CloseInfo {
    /// Intentional close with a clean handshake
    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: NORMAL_CLOSURE,
            reason: reason.into(),
            was_clean: true,
        }
    }

    /// Connection lost (refused, reset, stream ended)
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: reason.into(),
            was_clean: false,
        }
    }

    /// Forced close after the connection timeout elapsed
    pub fn timeout() -> Self {
        Self {
            code: TIMEOUT_CLOSURE,
            reason: "connection timeout".to_string(),
            was_clean: false,
        }
    }

    /// Only a clean 1000 close counts as intentional; everything else retries
    pub fn is_intentional(&self) -> bool {
        self.code == NORMAL_CLOSURE && self.was_clean
    }
}

/// Lifecycle and data events reported by a transport session
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Error(String),
    Closed(CloseInfo),
}

/// Frames written to a transport session
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    Close(CloseInfo),
}

/// One physical connection attempt
pub struct TransportSession {
    pub outbound: UnboundedSender<OutboundFrame>,
    pub events: UnboundedReceiver<TransportEvent>,
}

/// Factory for transport sessions
pub trait Transport: Send + Sync + 'static {
    /// Start connecting to `url`; must not block
    fn open(&self, url: &str) -> TransportSession;
}

// ─── WebSocket implementation ────────────────────────────────────────

/// WebSocket transport over tokio-tungstenite
///
/// Each session runs in its own task. Must be used from within a tokio
/// runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn open(&self, url: &str) -> TransportSession {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_socket(url.to_string(), events_tx, outbound_rx));

        TransportSession {
            outbound: outbound_tx,
            events: events_rx,
        }
    }
}

async fn run_socket(
    url: String,
    events: UnboundedSender<TransportEvent>,
    mut outbound: UnboundedReceiver<OutboundFrame>,
) {
    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        _ = events.closed() => {
            debug!("Connect to {} abandoned by owner", url);
            return;
        }
    };

    let ws_stream = match connected {
        Ok((stream, _response)) => stream,
        Err(e) => {
            let _ = events.send(TransportEvent::Error(e.to_string()));
            let _ = events.send(TransportEvent::Closed(CloseInfo::abnormal(e.to_string())));
            return;
        }
    };

    if events.send(TransportEvent::Opened).is_err() {
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    let close = loop {
        tokio::select! {
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if events.send(TransportEvent::Message(text.as_str().to_owned())).is_err() {
                        break None;
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => {
                        if events.send(TransportEvent::Message(text)).is_err() {
                            break None;
                        }
                    }
                    Err(_) => warn!("Dropping non-UTF-8 binary frame from {}", url),
                },
                Some(Ok(Message::Close(frame))) => {
                    break Some(match frame {
                        Some(frame) => CloseInfo {
                            code: u16::from(frame.code),
                            reason: frame.reason.as_str().to_owned(),
                            was_clean: true,
                        },
                        None => CloseInfo {
                            code: NO_STATUS_CLOSURE,
                            reason: String::new(),
                            was_clean: true,
                        },
                    });
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    break Some(CloseInfo::abnormal(e.to_string()));
                }
                None => break Some(CloseInfo::abnormal("stream ended")),
            },
            frame = outbound.recv() => match frame {
                Some(OutboundFrame::Text(text)) => {
                    if let Err(e) = write.send(Message::text(text)).await {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break Some(CloseInfo::abnormal(e.to_string()));
                    }
                }
                Some(OutboundFrame::Close(info)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(info.code),
                        reason: info.reason.clone().into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    break Some(info);
                }
                None => {
                    // Owner dropped the session
                    let _ = write.send(Message::Close(None)).await;
                    break None;
                }
            },
        }
    };

    if let Some(info) = close {
        debug!("Socket {} closed: {} {}", url, info.code, info.reason);
        let _ = events.send(TransportEvent::Closed(info));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_clean_normal_close_is_intentional() {
        assert!(CloseInfo::normal("bye").is_intentional());
        assert!(!CloseInfo::abnormal("reset").is_intentional());
        assert!(!CloseInfo::timeout().is_intentional());
        assert!(!CloseInfo {
            code: NORMAL_CLOSURE,
            reason: String::new(),
            was_clean: false,
        }
        .is_intentional());
        assert!(!CloseInfo {
            code: 1001,
            reason: "going away".into(),
            was_clean: true,
        }
        .is_intentional());
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error_then_close() {
        // Nothing listens on the discard port
        let mut session = WsTransport.open("ws://127.0.0.1:9/ws");

        let first = session.events.recv().await.unwrap();
        assert!(matches!(first, TransportEvent::Error(_)));

        match session.events.recv().await.unwrap() {
            TransportEvent::Closed(info) => assert!(!info.is_intentional()),
            other => panic!("expected close, got {:?}", other),
        }
    }
}
