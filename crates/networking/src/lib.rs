//! Livefeed Networking - dashboard HTTP client, live socket layer, and API wrappers

pub mod api;
pub mod http;
pub mod websocket;

pub use http::DashboardClient;
