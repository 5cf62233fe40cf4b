//! Live socket layer
//!
//! A [`ConnectionRegistry`] keeps one [`ManagedConnection`] per endpoint URL
//! and fans its events out to every attached [`ListenerBundle`]. Connections
//! reconnect with jittered exponential backoff (see [`backoff`]) and report
//! `on_failed` once they give up.

pub mod backoff;
pub mod connection;
pub mod endpoint;
pub mod listener;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod registry;
pub mod transport;

pub use backoff::{base_delay, jittered_delay, reconnect_delay};
pub use connection::{ConnectionState, ManagedConnection};
pub use endpoint::{build_ws_url, endpoint_url};
pub use listener::{call_guarded, ListenerBundle, ListenerId};
pub use registry::{ConnectConfig, ConnectionRegistry, ListenerHandle};
pub use transport::{
    CloseInfo, OutboundFrame, Transport, TransportEvent, TransportSession, WsTransport,
};
