//! HTTP access to the dashboard read API

mod client;

pub use client::DashboardClient;
