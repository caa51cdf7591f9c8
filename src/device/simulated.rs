//! # Simulated Sensor Board
//!
//! A [`DeviceLink`] that synthesises plausible sensor values with the real
//! characteristic layouts. Lets the bridge run end to end without hardware.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;

use super::link_trait::{ChannelHandle, DeviceLink};
use crate::channel::encoder::encode;
use crate::channel::protocol::{ChannelDescriptor, ChannelId, ChannelRegistry};
use crate::error::{Result, SenseBridgeError};

/// Notification period of the simulated motion characteristics
const NOTIFY_INTERVAL_MS: u64 = 100;

/// Simulated board exposing every characteristic of the table
pub struct SimulatedDevice {
    name: String,
    registry: ChannelRegistry,
    started: Instant,
    led: Arc<Mutex<[u8; 3]>>,
    closed_tx: watch::Sender<bool>,
}

impl SimulatedDevice {
    pub fn new(name: impl Into<String>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            name: name.into(),
            registry: ChannelRegistry::full(),
            started: Instant::now(),
            led: Arc::new(Mutex::new([0, 0, 0])),
            closed_tx,
        }
    }

    /// Last colour written to the LED characteristic
    pub fn led_colour(&self) -> [u8; 3] {
        *self.led.lock()
    }
}

#[async_trait]
impl DeviceLink for SimulatedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn id(&self) -> Option<&str> {
        None
    }

    async fn channel(&self, uuid: &str) -> Result<Arc<dyn ChannelHandle>> {
        let descriptor = self
            .registry
            .describe_uuid(uuid)
            .map_err(|_| SenseBridgeError::Device(format!("Characteristic {} not found", uuid)))?;

        Ok(Arc::new(SimulatedChannel {
            descriptor,
            started: self.started,
            led: self.led.clone(),
        }))
    }

    async fn closed(&self) {
        let mut rx = self.closed_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn disconnect(&self) -> Result<()> {
        debug!("Simulated device {} disconnected", self.name);
        self.closed_tx.send_replace(true);
        Ok(())
    }
}

struct SimulatedChannel {
    descriptor: &'static ChannelDescriptor,
    started: Instant,
    led: Arc<Mutex<[u8; 3]>>,
}

impl SimulatedChannel {
    fn sample(&self) -> Result<Bytes> {
        let t = self.started.elapsed().as_secs_f64();
        let values = synthetic_values(self.descriptor.id, t);
        Ok(Bytes::from(encode(self.descriptor.layout, &values)?))
    }
}

/// Smooth synthetic values for a channel at `t` seconds after power-up
fn synthetic_values(id: ChannelId, t: f64) -> Vec<f64> {
    match id {
        ChannelId::Temperature => vec![22.0 + 0.5 * (t / 30.0).sin()],
        ChannelId::Humidity => vec![45.0 + 3.0 * (t / 45.0).sin()],
        ChannelId::Pressure => vec![1013.25 + 0.8 * (t / 60.0).cos()],
        ChannelId::Accelerometer => vec![0.02 * (t * 3.0).sin(), 0.02 * (t * 2.0).cos(), 1.0],
        ChannelId::Gyroscope => vec![0.5 * (t * 1.3).sin(), 0.4 * (t * 0.7).cos(), 0.1],
        ChannelId::Quaternion => {
            let half = t * 0.25;
            vec![0.0, 0.0, half.sin(), half.cos()]
        }
        ChannelId::Led => vec![0.0, 0.0, 0.0],
        ChannelId::Bsec => vec![50.0 + 10.0 * (t / 20.0).sin()],
        ChannelId::Co2 => vec![600.0 + 40.0 * (t / 25.0).sin()],
        ChannelId::Gas => vec![12_000.0 + 500.0 * (t / 15.0).cos()],
    }
}

#[async_trait]
impl ChannelHandle for SimulatedChannel {
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Bytes>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let descriptor = self.descriptor;
        let started = self.started;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(NOTIFY_INTERVAL_MS));
            loop {
                ticker.tick().await;
                let t = started.elapsed().as_secs_f64();
                let values = synthetic_values(descriptor.id, t);
                let Ok(payload) = encode(descriptor.layout, &values) else {
                    break;
                };
                // Receiver dropped means the subscription was cancelled
                if tx.send(Bytes::from(payload)).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn read(&self) -> Result<Bytes> {
        self.sample()
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        if data.len() < 3 {
            return Err(SenseBridgeError::Device(format!(
                "LED payload too short: {} bytes",
                data.len()
            )));
        }
        *self.led.lock() = [data[0], data[1], data[2]];
        Ok(())
    }
}
