//! Listener bundles attached to a managed connection

use super::transport::CloseInfo;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

pub type OpenCallback = Arc<dyn Fn() + Send + Sync>;
pub type MessageCallback = Arc<dyn Fn(&Value) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type CloseCallback = Arc<dyn Fn(&CloseInfo) + Send + Sync>;
pub type FailedCallback = Arc<dyn Fn() + Send + Sync>;

/// Opaque identity of one attached bundle
///
/// Ids are handed out in increasing order, so ordering by id is registration
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

/// Optional lifecycle callbacks for one subscriber of a connection
///
/// Two bundles with identical callbacks are still distinct subscribers; the
/// registry tells them apart by [`ListenerId`], never by content.
#[derive(Clone, Default)]
pub struct ListenerBundle {
    on_open: Option<OpenCallback>,
    on_message: Option<MessageCallback>,
    on_error: Option<ErrorCallback>,
    on_close: Option<CloseCallback>,
    on_failed: Option<FailedCallback>,
}

impl ListenerBundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_open(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_open = Some(Arc::new(f));
        self
    }

    pub fn on_message(mut self, f: impl Fn(&Value) + Send + Sync + 'static) -> Self {
        self.on_message = Some(Arc::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_close(mut self, f: impl Fn(&CloseInfo) + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(f));
        self
    }

    /// Called once when the connection gives up reconnecting
    pub fn on_failed(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_failed = Some(Arc::new(f));
        self
    }

    pub(crate) fn emit_open(&self) {
        if let Some(cb) = &self.on_open {
            call_guarded("on_open", || cb());
        }
    }

    pub(crate) fn emit_message(&self, value: &Value) {
        if let Some(cb) = &self.on_message {
            call_guarded("on_message", || cb(value));
        }
    }

    pub(crate) fn emit_error(&self, message: &str) {
        if let Some(cb) = &self.on_error {
            call_guarded("on_error", || cb(message));
        }
    }

    pub(crate) fn emit_close(&self, info: &CloseInfo) {
        if let Some(cb) = &self.on_close {
            call_guarded("on_close", || cb(info));
        }
    }

    pub(crate) fn emit_failed(&self) {
        if let Some(cb) = &self.on_failed {
            call_guarded("on_failed", || cb());
        }
    }
}

impl fmt::Debug for ListenerBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBundle")
            .field("on_open", &self.on_open.is_some())
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_failed", &self.on_failed.is_some())
            .finish()
    }
}

/// Run a subscriber callback, containing any panic it raises
///
/// Returns false if the callback panicked. The panic is logged and swallowed
/// so delivery to the remaining subscribers and the connection/poll loops
/// keep running.
pub fn call_guarded<F: FnOnce()>(context: &str, f: F) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => true,
        Err(payload) => {
            error!("{} callback panicked: {}", context, panic_message(payload.as_ref()));
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
