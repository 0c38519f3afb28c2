//! Arena Combat Server Library
//!
//! An authoritative top-down tank arena served over WebTransport.
//!
//! # Features
//!
//! - `file_store` - JSON-file persistence under `DATA_DIR` (enabled by default).
//!   Without it, or without `DATA_DIR`, accounts and chat live in memory.

pub mod config;
pub mod game;
pub mod metrics;
pub mod net;
pub mod store;
pub mod util;
