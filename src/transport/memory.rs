//! # In-Memory Store
//!
//! A complete persistence engine held in memory. Implements the recorder's
//! [`TransportAdapter`] contract plus the read side of the backend: paged
//! reads, cascade delete, listings, analytics and exports.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use super::TransportAdapter;
use crate::error::{Result, SenseBridgeError};
use crate::session::analytics::{self, Metric, SessionAnalytics, Summary, TrendBucket};
use crate::session::export::{self, ExportFormat};
use crate::session::types::*;

/// Number of sessions listed in the summary
const RECENT_SESSIONS: usize = 5;

#[derive(Default)]
struct StoreInner {
    sessions: Vec<Session>,
    readings: Vec<StoredReading>,
}

/// In-memory sessions and readings
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
    failing_batches: AtomicUsize,
    batch_calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
    batch_latency: Mutex<Duration>,
    end_latency: Mutex<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` batch inserts fail, for exercising retry paths
    pub fn fail_next_batches(&self, count: usize) {
        self.failing_batches.store(count, Ordering::SeqCst);
    }

    /// Delay every batch insert, simulating a slow backend
    pub fn set_batch_latency(&self, latency: Duration) {
        *self.batch_latency.lock() = latency;
    }

    /// Delay every session end call
    pub fn set_end_latency(&self, latency: Duration) {
        *self.end_latency.lock() = latency;
    }

    /// Number of batch insert calls received, failed ones included
    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// Sizes of the batches that were stored, in arrival order
    pub fn stored_batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    pub fn get_session(&self, session_id: &str) -> Result<Session> {
        self.inner
            .lock()
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
            .ok_or_else(|| SenseBridgeError::SessionNotFound(session_id.to_string()))
    }

    /// Every reading of a session ordered by timestamp (stable for ties)
    pub fn session_readings(&self, session_id: &str) -> Result<Vec<StoredReading>> {
        let inner = self.inner.lock();
        if !inner.sessions.iter().any(|s| s.id == session_id) {
            return Err(SenseBridgeError::SessionNotFound(session_id.to_string()));
        }
        let mut readings: Vec<StoredReading> = inner
            .readings
            .iter()
            .filter(|r| r.session_id == session_id)
            .cloned()
            .collect();
        readings.sort_by_key(|r| r.timestamp);
        Ok(readings)
    }

    /// One page of a session's readings (pages are 1-based)
    pub fn fetch_readings(&self, session_id: &str, page: usize, limit: usize) -> Result<ReadingsPage> {
        let readings = self.session_readings(session_id)?;
        let pagination = Pagination::new(page, limit, readings.len());
        let readings = readings
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.limit)
            .collect();
        Ok(ReadingsPage { readings, pagination })
    }

    /// Sessions newest first, optionally filtered by status
    pub fn list_sessions(
        &self,
        status: Option<SessionStatus>,
        page: usize,
        limit: usize,
    ) -> SessionsPage {
        let inner = self.inner.lock();
        let mut sessions: Vec<&Session> = inner
            .sessions
            .iter()
            .filter(|s| status.map_or(true, |st| s.status == st))
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let pagination = Pagination::new(page, limit, sessions.len());
        let sessions = sessions
            .into_iter()
            .skip(pagination.offset())
            .take(pagination.limit)
            .map(|s| SessionSummary {
                session: s.clone(),
                reading_count: inner.readings.iter().filter(|r| r.session_id == s.id).count(),
                duration_ms: s.ended_at.map(|end| end - s.started_at),
            })
            .collect();

        SessionsPage { sessions, pagination }
    }

    /// Delete a session and, by cascade, all of its readings
    ///
    /// Returns the number of readings removed.
    pub fn delete_session(&self, session_id: &str) -> Result<usize> {
        let mut inner = self.inner.lock();
        let before = inner.sessions.len();
        inner.sessions.retain(|s| s.id != session_id);
        if inner.sessions.len() == before {
            return Err(SenseBridgeError::SessionNotFound(session_id.to_string()));
        }

        let readings_before = inner.readings.len();
        inner.readings.retain(|r| r.session_id != session_id);
        let removed = readings_before - inner.readings.len();
        info!("Deleted session {} and {} readings", session_id, removed);
        Ok(removed)
    }

    pub fn analytics(&self, session_id: &str) -> Result<SessionAnalytics> {
        let session = self.get_session(session_id)?;
        let readings = self.session_readings(session_id)?;
        Ok(SessionAnalytics::compute(&session, &readings, now_millis()))
    }

    pub fn trends(&self, session_id: &str, metric: Metric, interval_ms: i64) -> Result<Vec<TrendBucket>> {
        let readings = self.session_readings(session_id)?;
        analytics::trends(&readings, metric, interval_ms)
    }

    pub fn summary(&self) -> Summary {
        let inner = self.inner.lock();
        let mut recent = inner.sessions.clone();
        recent.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        recent.truncate(RECENT_SESSIONS);
        Summary {
            total_sessions: inner.sessions.len(),
            total_readings: inner.readings.len(),
            recent_sessions: recent,
        }
    }

    /// Render a session export in the requested format
    pub fn export(&self, session_id: &str, format: ExportFormat) -> Result<String> {
        let session = self.get_session(session_id)?;
        let readings = self.session_readings(session_id)?;
        match format {
            ExportFormat::Json => export::to_json(&session, &readings),
            ExportFormat::Csv => export::to_csv(&readings),
        }
    }
}

#[async_trait]
impl TransportAdapter for MemoryStore {
    async fn create_session(&self, request: &NewSession) -> Result<Session> {
        let request = request.clone().validated()?;
        let session = Session {
            id: Uuid::new_v4().to_string(),
            name: request.name,
            device_name: request.device_name.unwrap_or_else(|| "Unknown".to_string()),
            device_id: request.device_id,
            notes: request.notes,
            tags: request.tags.into_iter().collect::<BTreeSet<_>>(),
            started_at: now_millis(),
            ended_at: None,
            status: SessionStatus::Active,
        };

        self.inner.lock().sessions.push(session.clone());
        debug!("Created session {} ({})", session.id, session.name);
        Ok(session)
    }

    async fn end_session(&self, session_id: &str) -> Result<SessionEnd> {
        let latency = *self.end_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.inner.lock();
        let session = inner
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| SenseBridgeError::SessionNotFound(session_id.to_string()))?;

        // A completed session keeps its original end time
        if session.status == SessionStatus::Active {
            session.ended_at = Some(now_millis());
            session.status = SessionStatus::Completed;
        }

        Ok(SessionEnd {
            id: session.id.clone(),
            ended_at: session.ended_at.unwrap_or(session.started_at),
            status: session.status,
        })
    }

    async fn send_batch(&self, readings: &[SensorReadingRecord]) -> Result<usize> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);

        let latency = *self.batch_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let injected = self
            .failing_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SenseBridgeError::TransportFailure(
                "injected batch failure".to_string(),
            ));
        }

        if readings.is_empty() {
            return Err(SenseBridgeError::TransportFailure(
                "readings array is required".to_string(),
            ));
        }

        let mut inner = self.inner.lock();
        if let Some(orphan) = readings
            .iter()
            .find(|r| !inner.sessions.iter().any(|s| s.id == r.session_id))
        {
            return Err(SenseBridgeError::SessionNotFound(orphan.session_id.clone()));
        }

        let now = now_millis();
        inner.readings.extend(
            readings
                .iter()
                .map(|r| StoredReading::from_record(Uuid::new_v4().to_string(), r, now)),
        );
        self.batch_sizes.lock().push(readings.len());
        Ok(readings.len())
    }
}
