//! # Session Recorder
//!
//! Owns the recording lifecycle and the batch buffer.
//!
//! ## Lifecycle
//!
//! `NoSession → Active → NoSession`. Only one session is active per recorder.
//!
//! ## Flushing
//!
//! Readings are queued while a session is active and sent to the transport:
//! - when the queue reaches `batch_size` (inline from `record()`, or by a
//!   flusher task when the caller only uses `enqueue()`)
//! - every `flush_interval` from the periodic timer
//! - on `stop()` and on link loss
//!
//! A flush swaps the queue for an empty one before sending, so readings
//! recorded while a send is in flight land in the fresh queue. A failed batch
//! is put back in front of the queue in its original order.
//!
//! ## Retry bounds
//!
//! Consecutive failures open a backoff window (doubling from `retry_base`,
//! capped at `retry_max`) during which automatic flushes are skipped. Explicit
//! `flush()` calls always send. The queue never holds more than
//! `max_pending_readings`; on overflow the oldest readings are dropped and
//! counted.
//!
//! ## Stopping
//!
//! `stop()` detaches the session before its final flush, so readings arriving
//! while the backend ends the session are ignored rather than stranded. A
//! failed stop reattaches it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::types::{NewSession, SensorReadingRecord, Session, SessionStatus};
use crate::channel::decoder::DecodedReading;
use crate::config::RecorderConfig;
use crate::error::{Result, SenseBridgeError};
use crate::transport::TransportAdapter;

/// Readings per automatic flush
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Period of the background flush timer
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 5_000;

/// Recorder tuning
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_pending_readings: usize,
    pub retry_base: Duration,
    pub retry_max: Duration,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            max_pending_readings: 10_000,
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
        }
    }
}

impl From<&RecorderConfig> for RecorderSettings {
    fn from(config: &RecorderConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            flush_interval: Duration::from_millis(config.flush_interval_ms),
            max_pending_readings: config.max_pending_readings,
            retry_base: Duration::from_millis(config.retry_base_ms),
            retry_max: Duration::from_millis(config.retry_max_ms),
        }
    }
}

impl RecorderSettings {
    /// Backoff after `failures` consecutive failed sends
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.retry_base.saturating_mul(factor).min(self.retry_max)
    }
}

/// Result of one flush attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing queued; no transport call made
    Empty,
    /// Batch of this size persisted
    Sent(usize),
    /// Send failed; this many readings went back to the queue
    Requeued(usize),
    /// Automatic flush skipped: inside the backoff window
    Deferred,
    /// Automatic flush skipped: another flush is in flight
    Busy,
}

/// Snapshot of recorder counters
#[derive(Debug, Clone, PartialEq)]
pub struct RecorderStats {
    pub session: Option<Session>,
    pub pending: usize,
    pub stored: u64,
    pub dropped: u64,
    pub consecutive_failures: u32,
}

#[derive(Default)]
struct RecorderState {
    session: Option<Session>,
    buffer: VecDeque<SensorReadingRecord>,
    stored: u64,
    dropped: u64,
    consecutive_failures: u32,
    retry_at: Option<Instant>,
    /// Set while the cap is dropping readings, cleared by a successful send
    overflowing: bool,
}

impl RecorderState {
    fn in_backoff(&self, now: Instant) -> bool {
        self.retry_at.is_some_and(|at| now < at)
    }
}

/// Session-scoped batching of decoded readings
pub struct SessionRecorder {
    transport: Arc<dyn TransportAdapter>,
    settings: RecorderSettings,
    state: Mutex<RecorderState>,
    /// Serialises flushes so a requeued batch is resent before newer readings
    flush_lock: Mutex<()>,
    /// Serialises start/stop
    lifecycle: Mutex<()>,
}

impl SessionRecorder {
    pub fn new(transport: Arc<dyn TransportAdapter>, settings: RecorderSettings) -> Self {
        Self {
            transport,
            settings,
            state: Mutex::new(RecorderState::default()),
            flush_lock: Mutex::new(()),
            lifecycle: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &RecorderSettings {
        &self.settings
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.session.is_some()
    }

    pub async fn current_session(&self) -> Option<Session> {
        self.state.lock().await.session.clone()
    }

    /// Number of readings waiting to be flushed
    pub async fn pending(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    pub async fn stats(&self) -> RecorderStats {
        let state = self.state.lock().await;
        RecorderStats {
            session: state.session.clone(),
            pending: state.buffer.len(),
            stored: state.stored,
            dropped: state.dropped,
            consecutive_failures: state.consecutive_failures,
        }
    }

    /// Start a recording session
    ///
    /// # Errors
    ///
    /// - `MissingName` if the name is blank (no transport call is made)
    /// - `SessionAlreadyActive` if a session is already recording
    /// - `TransportFailure` if the backend rejects the creation
    pub async fn start(&self, request: NewSession) -> Result<Session> {
        let request = request.validated()?;
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(active) = &self.state.lock().await.session {
            return Err(SenseBridgeError::SessionAlreadyActive(active.id.clone()));
        }

        let session = self.transport.create_session(&request).await?;

        let mut state = self.state.lock().await;
        *state = RecorderState {
            session: Some(session.clone()),
            ..Default::default()
        };
        info!("Recording session \"{}\" started ({})", session.name, session.id);
        Ok(session)
    }

    /// Queue a decoded reading for the active session
    ///
    /// No-op when no session is active or the channel is not persisted.
    /// Triggers a flush once the queue reaches `batch_size`.
    pub async fn record(&self, reading: &DecodedReading) {
        if self.enqueue(reading).await {
            self.auto_flush().await;
        }
    }

    /// Queue a reading without flushing
    ///
    /// Returns `true` once the queue has reached `batch_size`, leaving the
    /// caller to trigger `auto_flush()` wherever it fits.
    pub async fn enqueue(&self, reading: &DecodedReading) -> bool {
        let mut state = self.state.lock().await;
        let Some(session) = &state.session else {
            return false;
        };
        let Some(record) = SensorReadingRecord::from_reading(&session.id, reading) else {
            return false;
        };
        state.buffer.push_back(record);
        self.enforce_cap(&mut state);
        state.buffer.len() >= self.settings.batch_size
    }

    /// Drop the oldest readings beyond `max_pending_readings`
    fn enforce_cap(&self, state: &mut RecorderState) {
        let overflow = state
            .buffer
            .len()
            .saturating_sub(self.settings.max_pending_readings);
        if overflow == 0 {
            return;
        }

        state.buffer.drain(..overflow);
        state.dropped += overflow as u64;
        if !state.overflowing {
            state.overflowing = true;
            error!(
                "Pending readings exceeded {}; dropping oldest until the backend recovers",
                self.settings.max_pending_readings
            );
        }
        debug!("Dropped {} readings ({} dropped total)", overflow, state.dropped);
    }

    /// Send every queued reading now
    ///
    /// Never fails: a failed send requeues the batch for the next trigger.
    pub async fn flush(&self) -> FlushOutcome {
        let _flushing = self.flush_lock.lock().await;
        self.flush_locked().await
    }

    /// Flush from an automatic trigger, honouring backoff and in-flight sends
    pub async fn auto_flush(&self) -> FlushOutcome {
        let Ok(_flushing) = self.flush_lock.try_lock() else {
            return FlushOutcome::Busy;
        };
        if self.state.lock().await.in_backoff(Instant::now()) {
            return FlushOutcome::Deferred;
        }
        self.flush_locked().await
    }

    async fn flush_locked(&self) -> FlushOutcome {
        let batch: Vec<SensorReadingRecord> = {
            let mut state = self.state.lock().await;
            if state.buffer.is_empty() {
                return FlushOutcome::Empty;
            }
            std::mem::take(&mut state.buffer).into()
        };

        let count = batch.len();
        let result = self.transport.send_batch(&batch).await;

        let mut state = self.state.lock().await;
        match result {
            Ok(_) => {
                state.stored += count as u64;
                state.consecutive_failures = 0;
                state.retry_at = None;
                if state.overflowing {
                    state.overflowing = false;
                    info!("Backend recovered; {} readings were dropped", state.dropped);
                }
                debug!("Flushed {} readings ({} stored)", count, state.stored);
                FlushOutcome::Sent(count)
            }
            Err(e) => {
                state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                let backoff = self.settings.backoff(state.consecutive_failures);
                state.retry_at = Some(Instant::now() + backoff);
                warn!(
                    "Failed to store batch of {} readings (attempt {}), retrying in {:?}: {}",
                    count, state.consecutive_failures, backoff, e
                );

                let mut merged: VecDeque<SensorReadingRecord> = batch.into();
                merged.append(&mut state.buffer);
                state.buffer = merged;
                self.enforce_cap(&mut state);
                FlushOutcome::Requeued(count)
            }
        }
    }

    /// Stop the active session
    ///
    /// Detaches the session, flushes the queue, then asks the backend to end
    /// the session. Readings offered after this point are ignored. On any
    /// failure the session is reattached and nothing queued is lost.
    ///
    /// # Errors
    ///
    /// - `NoActiveSession` if nothing is recording
    /// - `TransportFailure` if the final flush or the end call fails
    pub async fn stop(&self) -> Result<Session> {
        let _lifecycle = self.lifecycle.lock().await;

        let Some(mut session) = self.state.lock().await.session.take() else {
            return Err(SenseBridgeError::NoActiveSession);
        };

        if let FlushOutcome::Requeued(count) = self.flush().await {
            self.reattach(&session).await;
            return Err(SenseBridgeError::TransportFailure(format!(
                "final flush of {} readings failed; session {} left active",
                count, session.id
            )));
        }

        let end = match self.transport.end_session(&session.id).await {
            Ok(end) => end,
            Err(e) => {
                self.reattach(&session).await;
                return Err(e);
            }
        };

        let state = self.state.lock().await;
        session.ended_at = Some(end.ended_at);
        session.status = SessionStatus::Completed;
        info!(
            "Recording session \"{}\" stopped. {} readings stored",
            session.name, state.stored
        );
        Ok(session)
    }

    async fn reattach(&self, session: &Session) {
        self.state.lock().await.session = Some(session.clone());
        warn!("Session {} left active", session.id);
    }

    /// Spawn the periodic flush timer
    ///
    /// Flushes whenever a session is active and readings are pending, so
    /// low-rate channels are not held back by the size threshold.
    pub fn spawn_flush_timer(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let recorder = Arc::clone(self);
        tokio::spawn(async move {
            let period = recorder.settings.flush_interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Flush timer stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let due = {
                            let state = recorder.state.lock().await;
                            state.session.is_some() && !state.buffer.is_empty()
                        };
                        if due {
                            let outcome = recorder.auto_flush().await;
                            debug!("Periodic flush: {:?}", outcome);
                        }
                    }
                }
            }
        })
    }
}
