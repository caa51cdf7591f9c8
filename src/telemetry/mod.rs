//! # Telemetry Module
//!
//! Live sensor data flow for one device connection.
//!
//! This module handles:
//! - Dispatching pushed and polled datums through a single queue
//! - Decoding each datum and fanning it out to display and recording
//! - Keeping the last N samples of every field for live display
//! - Tearing everything down on disconnect or link loss

pub mod dispatcher;
pub mod rolling;

pub use dispatcher::{ChannelState, ConnectionContext, DispatcherSettings};
pub use rolling::RollingBuffer;
