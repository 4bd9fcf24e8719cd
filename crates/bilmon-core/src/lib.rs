//! Core domain + application logic for the BIL block monitor.
//!
//! This crate is intentionally framework-agnostic. The ledger gateway,
//! Telegram and Discord live behind ports (traits) implemented in adapter
//! crates.

pub mod channel;
pub mod config;
pub mod detector;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod format;
pub mod liveness;
pub mod logging;
pub mod monitor;
pub mod ports;
pub mod supervisor;

pub use errors::{Error, Result};
