//! # Channel Module
//!
//! Characteristic table and binary codec for the sensor board.
//!
//! This module handles:
//! - The fixed channel registry (UUIDs, delivery modes, layouts, field names)
//! - Little-endian payload decoding into typed readings
//! - Payload encoding for the LED actuator

pub mod protocol;
pub mod decoder;
pub mod encoder;
