//! Livefeed Core - Shared data models, configuration, types, and errors

pub mod config;
pub mod errors;
pub mod models;
pub mod types;

pub use config::{DashboardConfig, EndpointConfig, FallbackConfig, ReconnectConfig};
pub use errors::{Error, Result};
pub use models::*;
pub use types::*;
