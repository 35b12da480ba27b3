//! Host process for the performance engine
//!
//! Composes a `PerformanceModule` and serves health, Prometheus metrics,
//! reports and optimizer control over HTTP.

pub mod api;
pub mod config;
