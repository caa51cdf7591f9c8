//! # Session Module
//!
//! Recording sessions and everything derived from their readings.
//!
//! This module handles:
//! - Session, reading and pagination types shared with the storage backend
//! - The session recorder (lifecycle, batching, retry)
//! - Per-session analytics and trends
//! - JSON and CSV export

pub mod analytics;
pub mod export;
pub mod recorder;
pub mod types;

pub use recorder::{FlushOutcome, RecorderSettings, RecorderStats, SessionRecorder};
pub use types::{NewSession, SensorReadingRecord, Session, SessionStatus};
