//! High-level API wrappers for dashboard endpoints
//!
//! This module adds the feed's own conventions (status filter, page size
//! validation) on top of the raw HTTP client.

mod pending;

pub use pending::*;
