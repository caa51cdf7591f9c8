//! # Device Module
//!
//! Narrow interface to the wireless link of the sensor board.
//!
//! The pairing handshake and radio stack belong to the platform. This module
//! only describes what the bridge consumes from a connected device:
//! - Resolving characteristics of the sensor service by UUID
//! - Subscribing to notifications, reading and writing values
//! - Observing link loss
//!
//! A [`SimulatedDevice`] is provided for running without hardware.

pub mod link_trait;
pub mod simulated;

pub use link_trait::{ChannelHandle, DeviceLink};
pub use simulated::SimulatedDevice;
