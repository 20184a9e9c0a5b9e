//! Library crate for fleet-scan-rs exposing reusable modules.
pub mod classify;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod iprange;
pub mod ping;
pub mod scanner;
pub mod server;
pub mod types;
