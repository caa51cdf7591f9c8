//! # Transport Module
//!
//! Boundary between the session recorder and the storage backend.
//!
//! This module handles:
//! - The `TransportAdapter` contract consumed by the recorder
//! - An HTTP adapter speaking the backend's REST API
//! - An in-memory store used offline and in tests
//!
//! Adapters never retry. Any error means "not persisted"; retry policy lives
//! in the recorder.

use async_trait::async_trait;

use crate::error::Result;
use crate::session::types::{NewSession, SensorReadingRecord, Session, SessionEnd};

pub mod http;
pub mod memory;

pub use http::HttpTransport;
pub use memory::MemoryStore;

/// Persistence calls made by the session recorder
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Create a session and return it with its assigned id and start time
    async fn create_session(&self, request: &NewSession) -> Result<Session>;

    /// Mark a session completed
    async fn end_session(&self, session_id: &str) -> Result<SessionEnd>;

    /// Persist a batch of readings, returning the stored count
    async fn send_batch(&self, readings: &[SensorReadingRecord]) -> Result<usize>;
}
