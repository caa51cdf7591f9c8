//! Fixed-capacity per-field sample history for live display

use std::collections::{BTreeMap, HashMap, VecDeque};

use parking_lot::Mutex;

use crate::channel::protocol::{ChannelId, DEFAULT_MAX_RECORDS};
use crate::error::{Result, SenseBridgeError};

type FieldSeries = BTreeMap<String, VecDeque<f64>>;

/// Most recent `max_records` samples of every (channel, field) pair
///
/// Pushing past capacity evicts the oldest sample.
#[derive(Debug)]
pub struct RollingBuffer {
    max_records: usize,
    series: Mutex<HashMap<ChannelId, FieldSeries>>,
}

impl Default for RollingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORDS)
    }
}

impl RollingBuffer {
    /// Create a buffer keeping `max_records` samples per field (at least one)
    pub fn new(max_records: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            series: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_records(&self) -> usize {
        self.max_records
    }

    /// Append a sample, evicting the oldest once full
    pub fn push(&self, channel: ChannelId, field: &str, value: f64) {
        let mut series = self.series.lock();
        let samples = series
            .entry(channel)
            .or_default()
            .entry(field.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.max_records));

        if samples.len() == self.max_records {
            samples.pop_front();
        }
        samples.push_back(value);
    }

    /// Most recent sample of a field
    ///
    /// # Errors
    ///
    /// Returns `EmptyBuffer` if the field has no samples
    pub fn latest(&self, channel: ChannelId, field: &str) -> Result<f64> {
        self.series
            .lock()
            .get(&channel)
            .and_then(|fields| fields.get(field))
            .and_then(|samples| samples.back().copied())
            .ok_or_else(|| SenseBridgeError::EmptyBuffer {
                channel: channel.to_string(),
                field: field.to_string(),
            })
    }

    /// Snapshot of a field's samples, oldest first
    pub fn samples(&self, channel: ChannelId, field: &str) -> Vec<f64> {
        self.series
            .lock()
            .get(&channel)
            .and_then(|fields| fields.get(field))
            .map(|samples| samples.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, channel: ChannelId, field: &str) -> usize {
        self.series
            .lock()
            .get(&channel)
            .and_then(|fields| fields.get(field))
            .map_or(0, VecDeque::len)
    }

    /// True if no channel holds any sample
    pub fn is_empty(&self) -> bool {
        self.series
            .lock()
            .values()
            .all(|fields| fields.values().all(VecDeque::is_empty))
    }

    /// Clear every field of one channel
    pub fn reset(&self, channel: ChannelId) {
        self.series.lock().remove(&channel);
    }

    pub fn reset_all(&self) {
        self.series.lock().clear();
    }
}
