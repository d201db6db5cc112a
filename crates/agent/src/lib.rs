//! Air-quality forecasting agent
//!
//! Wires the forecasting core to a SQLite store, a JSON-lines reading
//! source on stdin and an HTTP server for health, metrics and queries.

pub mod api;
pub mod config;
pub mod source;
