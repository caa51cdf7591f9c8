//! # Channel Dispatcher
//!
//! Owns everything that lives for one device connection.
//!
//! Producers are per-channel tasks feeding one unbounded queue:
//! - [`PushSource`]: forwards notifications of a push channel
//! - [`PollSource`]: reads a poll channel on a fixed interval, one read at a time
//!
//! A single dispatch task drains the queue, so decoding and recording of one
//! datum never interleave with another. Each datum is decoded, its fields are
//! pushed into the [`RollingBuffer`], and the reading is queued on the
//! [`SessionRecorder`] if one is attached. Size-triggered sends run on a
//! separate flusher task, so a slow backend never stalls decoding.
//!
//! Disconnect (explicit or link loss) cancels every task through one
//! [`CancellationToken`], resets the buffers and returns channels to `Idle`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::rolling::RollingBuffer;
use crate::channel::decoder::decode_reading;
use crate::channel::encoder::encode_led;
use crate::channel::protocol::{ChannelId, ChannelRegistry, DeliveryMode, DEFAULT_POLL_INTERVAL_MS};
use crate::config::DeviceConfig;
use crate::device::{ChannelHandle, DeviceLink};
use crate::error::{Result, SenseBridgeError};
use crate::session::recorder::{FlushOutcome, SessionRecorder};
use crate::session::types::now_millis;

/// Per-channel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Subscribed,
    Polling,
}

/// Item on the dispatch queue
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    Datum { channel: ChannelId, payload: Bytes },
    LinkLost,
}

/// Polling cadence
#[derive(Debug, Clone, Copy)]
pub struct DispatcherSettings {
    pub poll_interval: Duration,
    pub read_timeout: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            read_timeout: Duration::from_millis(1_000),
        }
    }
}

impl From<&DeviceConfig> for DispatcherSettings {
    fn from(config: &DeviceConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        }
    }
}

/// Forwards notifications of a push channel into the dispatch queue
pub struct PushSource {
    pub channel: ChannelId,
    pub handle: Arc<dyn ChannelHandle>,
}

impl PushSource {
    /// Subscribe and spawn the forwarding task
    ///
    /// # Errors
    ///
    /// Returns the device error if the subscription cannot be started
    pub async fn start(
        self,
        queue: mpsc::UnboundedSender<DispatchEvent>,
        token: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let mut notifications = self.handle.subscribe().await?;
        let channel = self.channel;

        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = notifications.recv() => match next {
                        Some(payload) => {
                            if queue.send(DispatchEvent::Datum { channel, payload }).is_err() {
                                break;
                            }
                        }
                        None => {
                            debug!("Notifications for {} ended", channel);
                            break;
                        }
                    },
                }
            }
            // Receiver drops here, which unsubscribes
        }))
    }
}

/// Reads a poll channel on a fixed interval
///
/// The next read is issued only after the previous one completed or timed
/// out, so reads never overlap. A failed read is logged and polling goes on.
pub struct PollSource {
    pub channel: ChannelId,
    pub handle: Arc<dyn ChannelHandle>,
    pub settings: DispatcherSettings,
}

impl PollSource {
    pub fn start(
        self,
        queue: mpsc::UnboundedSender<DispatchEvent>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let PollSource {
            channel,
            handle,
            settings,
        } = self;

        tokio::spawn(async move {
            let period = settings.poll_interval;
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // A read still in flight at cancellation is discarded
                let read = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    read = timeout(settings.read_timeout, handle.read()) => read,
                };

                match read {
                    Ok(Ok(payload)) => {
                        if queue.send(DispatchEvent::Datum { channel, payload }).is_err() {
                            break;
                        }
                    }
                    Ok(Err(e)) => warn!("Read of {} failed: {}", channel, e),
                    Err(_) => warn!(
                        "Read of {} timed out after {:?}",
                        channel, settings.read_timeout
                    ),
                }
            }
            debug!("Polling of {} stopped", channel);
        })
    }
}

/// Write-busy-guarded LED actuator
pub struct LedWriter {
    handle: Arc<dyn ChannelHandle>,
    busy: AtomicBool,
}

impl LedWriter {
    pub fn new(handle: Arc<dyn ChannelHandle>) -> Self {
        Self {
            handle,
            busy: AtomicBool::new(false),
        }
    }

    /// Write a colour; returns `false` if dropped because a write is in flight
    pub async fn write(&self, r: u8, g: u8, b: u8) -> Result<bool> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("LED write in flight, dropping ({}, {}, {})", r, g, b);
            return Ok(false);
        }

        let _busy = BusyGuard(&self.busy);
        self.handle.write(&encode_led(r, g, b)).await?;
        Ok(true)
    }
}

/// Clears the busy flag when the write completes or its future is dropped
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// State shared between the context and its dispatch task
struct Dispatch {
    registry: ChannelRegistry,
    buffers: Arc<RollingBuffer>,
    recorder: Option<Arc<SessionRecorder>>,
    /// Wakes the flusher task once the recorder queue reaches its batch size
    flush_signal: Notify,
    states: RwLock<HashMap<ChannelId, ChannelState>>,
    token: CancellationToken,
    lost: AtomicBool,
    datums: AtomicU64,
    decode_errors: AtomicU64,
}

impl Dispatch {
    async fn run(self: Arc<Self>, mut queue: mpsc::UnboundedReceiver<DispatchEvent>) {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                event = queue.recv() => event,
            };

            match event {
                Some(DispatchEvent::Datum { channel, payload }) => {
                    self.handle_datum(channel, &payload).await;
                }
                Some(DispatchEvent::LinkLost) => {
                    self.handle_link_lost().await;
                    break;
                }
                None => break,
            }
        }
        debug!("Dispatch task stopped");
    }

    /// Runs threshold flushes off the dispatch path
    ///
    /// Signals raised during a send coalesce into one follow-up flush.
    async fn run_flusher(self: Arc<Self>, recorder: Arc<SessionRecorder>) {
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = self.flush_signal.notified() => {
                    let outcome = recorder.auto_flush().await;
                    debug!("Threshold flush: {:?}", outcome);
                }
            }
        }
        debug!("Flusher task stopped");
    }

    async fn handle_datum(&self, channel: ChannelId, payload: &[u8]) {
        let descriptor = match self.registry.describe(channel) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!("Dropping datum: {}", e);
                return;
            }
        };

        let reading = match decode_reading(descriptor, payload, now_millis()) {
            Ok(reading) => reading,
            Err(e) => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to decode {} datum: {}", channel, e);
                return;
            }
        };

        for (field, value) in &reading.fields {
            self.buffers.push(channel, field, *value);
        }
        self.datums.fetch_add(1, Ordering::Relaxed);

        if let Some(recorder) = &self.recorder {
            if recorder.enqueue(&reading).await {
                self.flush_signal.notify_one();
            }
        }
    }

    async fn handle_link_lost(&self) {
        warn!("Link to device lost");
        self.lost.store(true, Ordering::Release);

        // Best effort; the session stays active for the caller to stop or resume
        if let Some(recorder) = &self.recorder {
            if recorder.is_active().await {
                match recorder.flush().await {
                    FlushOutcome::Sent(count) => info!("Flushed {} readings after link loss", count),
                    FlushOutcome::Requeued(count) => {
                        warn!("Could not flush {} readings after link loss", count)
                    }
                    _ => {}
                }
            }
        }

        self.teardown();
        self.token.cancel();
    }

    fn set_state(&self, channel: ChannelId, state: ChannelState) {
        self.states.write().insert(channel, state);
    }

    fn teardown(&self) {
        self.buffers.reset_all();
        for state in self.states.write().values_mut() {
            *state = ChannelState::Idle;
        }
    }
}

/// One live device connection
pub struct ConnectionContext {
    link: Arc<dyn DeviceLink>,
    dispatch: Arc<Dispatch>,
    led: Option<LedWriter>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionContext {
    /// Set up every registry channel on `link` and start dispatching
    ///
    /// A channel whose characteristic is missing or whose subscription fails
    /// is skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `Device` error if no channel could be set up at all
    pub async fn connect(
        link: Arc<dyn DeviceLink>,
        registry: ChannelRegistry,
        settings: DispatcherSettings,
        buffers: Arc<RollingBuffer>,
        recorder: Option<Arc<SessionRecorder>>,
    ) -> Result<Self> {
        let token = CancellationToken::new();
        let (queue, rx) = mpsc::unbounded_channel();

        let dispatch = Arc::new(Dispatch {
            states: RwLock::new(registry.iter().map(|d| (d.id, ChannelState::Idle)).collect()),
            registry: registry.clone(),
            buffers,
            recorder,
            flush_signal: Notify::new(),
            token: token.clone(),
            lost: AtomicBool::new(false),
            datums: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
        });

        let mut tasks = Vec::new();
        let mut led = None;

        for descriptor in registry.iter() {
            let channel = descriptor.id;
            let handle = match link.channel(descriptor.uuid).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Skipping channel {}: {}", channel, e);
                    continue;
                }
            };

            match descriptor.delivery {
                DeliveryMode::Push => {
                    let source = PushSource { channel, handle };
                    match source.start(queue.clone(), token.clone()).await {
                        Ok(task) => {
                            tasks.push(task);
                            dispatch.set_state(channel, ChannelState::Subscribed);
                        }
                        Err(e) => warn!("Skipping channel {}: {}", channel, e),
                    }
                }
                DeliveryMode::Poll => {
                    let source = PollSource {
                        channel,
                        handle,
                        settings,
                    };
                    tasks.push(source.start(queue.clone(), token.clone()));
                    dispatch.set_state(channel, ChannelState::Polling);
                }
                DeliveryMode::Write => led = Some(LedWriter::new(handle)),
            }
        }

        if tasks.is_empty() && led.is_none() {
            token.cancel();
            return Err(SenseBridgeError::Device(format!(
                "no sensor channels available on {}",
                link.name()
            )));
        }

        let producers = tasks.len();

        let watcher_link = Arc::clone(&link);
        let watcher_token = token.clone();
        tasks.push(tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = watcher_token.cancelled() => {}
                _ = watcher_link.closed() => {
                    let _ = queue.send(DispatchEvent::LinkLost);
                }
            }
        }));

        if let Some(recorder) = &dispatch.recorder {
            tasks.push(tokio::spawn(
                Arc::clone(&dispatch).run_flusher(Arc::clone(recorder)),
            ));
        }
        tasks.push(tokio::spawn(Arc::clone(&dispatch).run(rx)));

        info!(
            "Connected to {} ({} channels streaming{})",
            link.name(),
            producers,
            if led.is_some() { ", LED available" } else { "" }
        );

        Ok(Self {
            link,
            dispatch,
            led,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn device_name(&self) -> &str {
        self.link.name()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.link.id()
    }

    pub fn buffers(&self) -> &Arc<RollingBuffer> {
        &self.dispatch.buffers
    }

    pub fn channel_state(&self, channel: ChannelId) -> ChannelState {
        self.dispatch
            .states
            .read()
            .get(&channel)
            .copied()
            .unwrap_or(ChannelState::Idle)
    }

    /// True once the link dropped without a client-side disconnect
    pub fn is_lost(&self) -> bool {
        self.dispatch.lost.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        !self.dispatch.token.is_cancelled()
    }

    /// Resolves once the connection is torn down for any reason
    pub async fn closed(&self) {
        self.dispatch.token.cancelled().await;
    }

    /// Datums decoded and dispatched so far
    pub fn datums(&self) -> u64 {
        self.dispatch.datums.load(Ordering::Relaxed)
    }

    pub fn decode_errors(&self) -> u64 {
        self.dispatch.decode_errors.load(Ordering::Relaxed)
    }

    /// Set the on-board LED colour
    ///
    /// Returns `Ok(false)` when dropped because another write is in flight.
    ///
    /// # Errors
    ///
    /// - `UnknownChannel` if the device exposes no LED characteristic
    /// - `Device` if the connection is closed or the write fails
    pub async fn write_led(&self, r: u8, g: u8, b: u8) -> Result<bool> {
        let Some(led) = &self.led else {
            return Err(SenseBridgeError::UnknownChannel(ChannelId::Led.to_string()));
        };
        if !self.is_connected() {
            return Err(SenseBridgeError::Device("not connected".to_string()));
        }
        led.write(r, g, b).await
    }

    /// Stop every producer, reset the buffers and close the link
    pub async fn disconnect(&self) -> Result<()> {
        self.dispatch.token.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Connection task ended abnormally: {}", e);
            }
        }

        self.dispatch.teardown();
        self.link.disconnect().await?;
        info!("Disconnected from {}", self.link.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::encoder::encode;
    use crate::device::link_trait::mocks::MockDevice;
    use crate::session::recorder::RecorderSettings;
    use crate::session::types::NewSession;
    use crate::transport::MemoryStore;

    fn uuid(id: ChannelId) -> &'static str {
        ChannelRegistry::full().describe(id).unwrap().uuid
    }

    fn accel(x: f64, y: f64, z: f64) -> Vec<u8> {
        let layout = ChannelRegistry::full().describe(ChannelId::Accelerometer).unwrap().layout;
        encode(layout, &[x, y, z]).unwrap()
    }

    async fn eventually<F: Fn() -> bool>(condition: F) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("Condition not reached in time");
    }

    async fn connect(
        device: &Arc<MockDevice>,
        channels: &[ChannelId],
        settings: DispatcherSettings,
        recorder: Option<Arc<SessionRecorder>>,
    ) -> Result<ConnectionContext> {
        ConnectionContext::connect(
            device.clone(),
            ChannelRegistry::with_channels(channels),
            settings,
            Arc::new(RollingBuffer::new(64)),
            recorder,
        )
        .await
    }

    #[tokio::test]
    async fn test_push_datum_reaches_buffers() {
        let device = Arc::new(MockDevice::new(&[uuid(ChannelId::Accelerometer)]));
        let ctx = connect(&device, &[ChannelId::Accelerometer], Default::default(), None)
            .await
            .unwrap();
        assert_eq!(ctx.channel_state(ChannelId::Accelerometer), ChannelState::Subscribed);

        device
            .mock_channel(uuid(ChannelId::Accelerometer))
            .notify(&accel(0.5, -0.25, 1.0));
        eventually(|| ctx.datums() == 1).await;

        let buffers = ctx.buffers();
        assert_eq!(buffers.latest(ChannelId::Accelerometer, "Ax").unwrap(), 0.5);
        assert_eq!(buffers.latest(ChannelId::Accelerometer, "Ay").unwrap(), -0.25);
        assert_eq!(buffers.latest(ChannelId::Accelerometer, "Az").unwrap(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_continues_after_failed_read() {
        let temp = uuid(ChannelId::Temperature);
        let device = Arc::new(MockDevice::new(&[temp]));
        let mock = device.mock_channel(temp);
        mock.push_read(Err(SenseBridgeError::Device("GATT busy".to_string())));
        mock.set_default_read(&21.5f32.to_le_bytes());

        let ctx = connect(&device, &[ChannelId::Temperature], Default::default(), None)
            .await
            .unwrap();
        assert_eq!(ctx.channel_state(ChannelId::Temperature), ChannelState::Polling);

        tokio::time::sleep(Duration::from_millis(1_600)).await;
        assert_eq!(mock.reads(), 3);
        assert_eq!(ctx.datums(), 2);
        assert_eq!(
            ctx.buffers().latest(ChannelId::Temperature, "temperature").unwrap(),
            21.5
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_reads_never_overlap() {
        let temp = uuid(ChannelId::Temperature);
        let device = Arc::new(MockDevice::new(&[temp]));
        let mock = device.mock_channel(temp);
        mock.set_default_read(&20.0f32.to_le_bytes());
        mock.set_read_delay(Duration::from_millis(1_200));

        let settings = DispatcherSettings {
            read_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        let _ctx = connect(&device, &[ChannelId::Temperature], settings, None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(mock.reads() >= 5);
        assert_eq!(mock.max_in_flight_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_read_times_out_and_polling_continues() {
        let temp = uuid(ChannelId::Temperature);
        let device = Arc::new(MockDevice::new(&[temp]));
        let mock = device.mock_channel(temp);
        mock.set_default_read(&20.0f32.to_le_bytes());
        mock.set_read_delay(Duration::from_secs(60));

        let _ctx = connect(&device, &[ChannelId::Temperature], Default::default(), None)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(mock.reads() >= 3);
    }

    #[tokio::test]
    async fn test_malformed_datum_is_isolated() {
        let device = Arc::new(MockDevice::new(&[
            uuid(ChannelId::Accelerometer),
            uuid(ChannelId::Gyroscope),
        ]));
        let ctx = connect(
            &device,
            &[ChannelId::Accelerometer, ChannelId::Gyroscope],
            Default::default(),
            None,
        )
        .await
        .unwrap();

        device.mock_channel(uuid(ChannelId::Accelerometer)).notify(&[1, 2, 3]);
        device
            .mock_channel(uuid(ChannelId::Gyroscope))
            .notify(&accel(10.0, 20.0, 30.0));
        eventually(|| ctx.decode_errors() == 1 && ctx.datums() == 1).await;

        assert!(ctx.buffers().latest(ChannelId::Accelerometer, "Ax").is_err());
        assert_eq!(ctx.buffers().latest(ChannelId::Gyroscope, "z").unwrap(), 30.0);

        // The failing channel keeps working
        device
            .mock_channel(uuid(ChannelId::Accelerometer))
            .notify(&accel(1.0, 1.0, 1.0));
        eventually(|| ctx.datums() == 2).await;
        assert_eq!(ctx.buffers().latest(ChannelId::Accelerometer, "Ax").unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_missing_characteristic_is_skipped() {
        let device = Arc::new(MockDevice::new(&[uuid(ChannelId::Temperature)]));
        let ctx = connect(&device, &ChannelId::ALL, Default::default(), None)
            .await
            .unwrap();

        assert_eq!(ctx.channel_state(ChannelId::Temperature), ChannelState::Polling);
        assert_eq!(ctx.channel_state(ChannelId::Accelerometer), ChannelState::Idle);
        assert!(matches!(
            ctx.write_led(1, 2, 3).await,
            Err(SenseBridgeError::UnknownChannel(_))
        ));
    }

    #[tokio::test]
    async fn test_no_channels_fails() {
        let device = Arc::new(MockDevice::new(&[]));
        assert!(matches!(
            connect(&device, &ChannelId::ALL, Default::default(), None).await,
            Err(SenseBridgeError::Device(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stops_producers_and_resets() {
        let accel_uuid = uuid(ChannelId::Accelerometer);
        let temp_uuid = uuid(ChannelId::Temperature);
        let device = Arc::new(MockDevice::new(&[accel_uuid, temp_uuid]));
        let temp = device.mock_channel(temp_uuid);
        temp.set_default_read(&20.0f32.to_le_bytes());

        let ctx = connect(
            &device,
            &[ChannelId::Accelerometer, ChannelId::Temperature],
            Default::default(),
            None,
        )
        .await
        .unwrap();

        device.mock_channel(accel_uuid).notify(&accel(1.0, 2.0, 3.0));
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(!ctx.buffers().is_empty());
        assert_eq!(device.mock_channel(accel_uuid).live_subscribers(), 1);

        ctx.disconnect().await.unwrap();

        assert!(!ctx.is_connected());
        assert!(!ctx.is_lost());
        assert!(ctx.buffers().is_empty());
        assert_eq!(device.mock_channel(accel_uuid).live_subscribers(), 0);
        assert_eq!(ctx.channel_state(ChannelId::Accelerometer), ChannelState::Idle);
        assert_eq!(ctx.channel_state(ChannelId::Temperature), ChannelState::Idle);

        let reads = temp.reads();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(temp.reads(), reads);
        assert!(ctx.buffers().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_in_flight_at_disconnect_is_discarded() {
        let temp = uuid(ChannelId::Temperature);
        let device = Arc::new(MockDevice::new(&[temp]));
        let mock = device.mock_channel(temp);
        mock.set_default_read(&20.0f32.to_le_bytes());
        mock.set_read_delay(Duration::from_secs(2));

        let settings = DispatcherSettings {
            read_timeout: Duration::from_secs(10),
            ..Default::default()
        };
        let ctx = connect(&device, &[ChannelId::Temperature], settings, None)
            .await
            .unwrap();

        // First tick at 500 ms; the read completes at 2.5 s
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(mock.reads(), 1);
        assert_eq!(mock.in_flight_reads.load(Ordering::SeqCst), 1);

        ctx.disconnect().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(ctx.datums(), 0);
        assert!(ctx.buffers().is_empty());
        assert_eq!(mock.reads(), 1);
        // The read future was dropped before completing
        assert_eq!(mock.in_flight_reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_send_does_not_stall_dispatch() {
        let accel_uuid = uuid(ChannelId::Accelerometer);
        let device = Arc::new(MockDevice::new(&[accel_uuid]));

        let store = Arc::new(MemoryStore::new());
        store.set_batch_latency(Duration::from_secs(3));
        let recorder = Arc::new(SessionRecorder::new(store.clone(), RecorderSettings::default()));
        let session = recorder.start(NewSession::new("Bench Test")).await.unwrap();

        let ctx = connect(
            &device,
            &[ChannelId::Accelerometer],
            Default::default(),
            Some(recorder.clone()),
        )
        .await
        .unwrap();

        let mock = device.mock_channel(accel_uuid);
        for i in 0..35 {
            mock.notify(&accel(i as f64, 0.0, 1.0));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        // The first batch went out at 0.9 s and is still in flight
        assert_eq!(store.batch_calls(), 1);
        assert!(store.stored_batch_sizes().is_empty());
        assert_eq!(ctx.datums(), 35);
        assert_eq!(ctx.buffers().len(ChannelId::Accelerometer, "Ax"), 35);
        assert_eq!(ctx.buffers().latest(ChannelId::Accelerometer, "Ax").unwrap(), 34.0);
        assert_eq!(recorder.pending().await, 25);

        // Signals raised during the send coalesce into one follow-up batch
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(store.stored_batch_sizes(), vec![10, 25]);
        assert_eq!(store.session_readings(&session.id).unwrap().len(), 35);

        ctx.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_link_loss_flushes_and_keeps_session() {
        let accel_uuid = uuid(ChannelId::Accelerometer);
        let device = Arc::new(MockDevice::new(&[accel_uuid]));

        let store = Arc::new(MemoryStore::new());
        let recorder = Arc::new(SessionRecorder::new(store.clone(), RecorderSettings::default()));
        let session = recorder.start(NewSession::new("Bench Test")).await.unwrap();

        let ctx = connect(
            &device,
            &[ChannelId::Accelerometer],
            Default::default(),
            Some(recorder.clone()),
        )
        .await
        .unwrap();

        let mock = device.mock_channel(accel_uuid);
        for i in 0..3 {
            mock.notify(&accel(i as f64, 0.0, 1.0));
        }
        eventually(|| ctx.datums() == 3).await;
        assert_eq!(store.batch_calls(), 0);

        device.drop_link();
        ctx.closed().await;

        assert!(ctx.is_lost());
        assert!(ctx.buffers().is_empty());
        assert_eq!(ctx.channel_state(ChannelId::Accelerometer), ChannelState::Idle);
        assert_eq!(store.session_readings(&session.id).unwrap().len(), 3);
        assert!(recorder.is_active().await);

        ctx.disconnect().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_led_write_dropped_while_busy() {
        let led_uuid = uuid(ChannelId::Led);
        let device = Arc::new(MockDevice::new(&[led_uuid]));
        let mock = device.mock_channel(led_uuid);
        mock.set_write_delay(Duration::from_millis(100));

        let ctx = connect(&device, &[ChannelId::Led], Default::default(), None)
            .await
            .unwrap();

        let (first, second) = tokio::join!(ctx.write_led(255, 0, 0), ctx.write_led(0, 255, 0));
        assert!(first.unwrap());
        assert!(!second.unwrap());
        assert_eq!(mock.get_written_data(), vec![vec![255, 0, 0]]);

        assert!(ctx.write_led(0, 0, 255).await.unwrap());
        assert_eq!(mock.get_written_data().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_led_write_releases_busy_flag() {
        let led_uuid = uuid(ChannelId::Led);
        let device = Arc::new(MockDevice::new(&[led_uuid]));
        let mock = device.mock_channel(led_uuid);
        mock.set_write_delay(Duration::from_secs(1));

        let ctx = connect(&device, &[ChannelId::Led], Default::default(), None)
            .await
            .unwrap();

        let abandoned = tokio::time::timeout(Duration::from_millis(100), ctx.write_led(255, 0, 0)).await;
        assert!(abandoned.is_err());
        assert!(mock.get_written_data().is_empty());

        assert!(ctx.write_led(0, 255, 0).await.unwrap());
        assert_eq!(mock.get_written_data(), vec![vec![0, 255, 0]]);
    }
}
