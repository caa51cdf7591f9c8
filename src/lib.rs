//! # Sense Bridge Library
//!
//! Stream, display and record data from a wireless environmental sensor board.
//!
//! This library decodes the board's binary characteristic payloads, keeps a
//! rolling window of every field for live display, and batches readings of a
//! recording session into a storage backend.

pub mod channel;
pub mod config;
pub mod device;
pub mod error;
pub mod session;
pub mod telemetry;
pub mod transport;
