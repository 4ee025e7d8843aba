//! `libhilog` is the core of the hilog daemon.
//!
//! It contains:
//! - The in-memory log buffer with per-reader cursors and statistics
//! - Flow control (per-process and per-domain byte quotas)
//! - The collector feeding producer records into the buffer
//! - Control-socket sessions (query, tail, persist, buffer management)
//! - Persist jobs: staging, compression, rotation and crash recovery
//! - Kernel message ingestion
//! - Wire codecs, the property store, configuration and logging setup

pub mod buffer;
pub mod collector;
pub mod config;
pub mod error;
pub mod filter;
pub mod flow_control;
pub mod kmsg;
pub mod lock_ext;
pub mod log_entry;
pub mod logging;
pub mod persist;
pub mod properties;
pub mod protocol;
pub mod server;
pub mod service;

#[cfg(test)]
mod tests;
