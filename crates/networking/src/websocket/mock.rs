//! In-memory transport for driving connections from tests
//!
//! Every `open` records a [`MockSession`] the test can script: complete the
//! handshake, push messages, inject errors, close with any code, and inspect
//! what the connection wrote.

use super::transport::{CloseInfo, OutboundFrame, Transport, TransportEvent, TransportSession};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// One scripted session
#[derive(Debug)]
pub struct MockSession {
    url: String,
    events: UnboundedSender<TransportEvent>,
    outbound: Mutex<UnboundedReceiver<OutboundFrame>>,
}

impl MockSession {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Complete the handshake
    pub fn open(&self) {
        let _ = self.events.send(TransportEvent::Opened);
    }

    /// Deliver a raw text frame
    pub fn message(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(text.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Error(message.into()));
    }

    pub fn close(&self, info: CloseInfo) {
        let _ = self.events.send(TransportEvent::Closed(info));
    }

    /// Drain every frame the connection has written so far
    pub fn sent(&self) -> Vec<OutboundFrame> {
        let mut rx = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[derive(Debug, Default)]
struct MockState {
    sessions: Vec<Arc<MockSession>>,
    /// `None` means fail forever
    failures_left: Option<usize>,
}

/// Scriptable [`Transport`]
///
/// Clones share the same session log.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Sessions stay pending until the test opens them
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                sessions: Vec::new(),
                failures_left: Some(0),
            })),
        }
    }

    /// The first `n` opens are refused immediately
    pub fn failing_first(n: usize) -> Self {
        let transport = Self::new();
        transport.lock().failures_left = Some(n);
        transport
    }

    /// Every open is refused immediately
    pub fn always_failing() -> Self {
        let transport = Self::new();
        transport.lock().failures_left = None;
        transport
    }

    pub fn stop_failing(&self) {
        self.lock().failures_left = Some(0);
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of connection attempts so far
    pub fn open_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn session(&self, index: usize) -> Option<Arc<MockSession>> {
        self.lock().sessions.get(index).cloned()
    }

    pub fn last_session(&self) -> Option<Arc<MockSession>> {
        self.lock().sessions.last().cloned()
    }
}

impl Transport for MockTransport {
    fn open(&self, url: &str) -> TransportSession {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let session = Arc::new(MockSession {
            url: url.to_string(),
            events: events_tx,
            outbound: Mutex::new(outbound_rx),
        });

        let refuse = {
            let mut state = self.lock();
            state.sessions.push(Arc::clone(&session));
            match state.failures_left.as_mut() {
                None => true,
                Some(0) => false,
                Some(n) => {
                    *n -= 1;
                    true
                }
            }
        };

        if refuse {
            session.error("connection refused");
            session.close(CloseInfo::abnormal("connection refused"));
        }

        TransportSession {
            outbound: outbound_tx,
            events: events_rx,
        }
    }
}
