//! # Session Analytics
//!
//! Aggregate statistics over a session's persisted readings: per-metric
//! min/max/mean, motion magnitudes and time-bucketed trends.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::{Session, StoredReading};
use crate::error::{Result, SenseBridgeError};

/// Default trend bucket width (one minute)
pub const DEFAULT_TREND_INTERVAL_MS: i64 = 60_000;

/// Scalar metrics that support statistics and trends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Temperature,
    Humidity,
    Pressure,
    Bsec,
    Co2,
    Gas,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::Temperature,
        Metric::Humidity,
        Metric::Pressure,
        Metric::Bsec,
        Metric::Co2,
        Metric::Gas,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::Pressure => "pressure",
            Metric::Bsec => "bsec",
            Metric::Co2 => "co2",
            Metric::Gas => "gas",
        }
    }

    /// Value of this metric in a row, if recorded
    pub fn value(self, reading: &StoredReading) -> Option<f64> {
        match self {
            Metric::Temperature => reading.temperature,
            Metric::Humidity => reading.humidity,
            Metric::Pressure => reading.pressure,
            Metric::Bsec => reading.bsec,
            Metric::Co2 => reading.co2,
            Metric::Gas => reading.gas,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = SenseBridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Metric::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| SenseBridgeError::InvalidSession(format!("Invalid metric: {}", s)))
    }
}

/// Min / max / mean of one series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub count: usize,
}

impl MetricStats {
    /// Statistics of `values`, or `None` when empty
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Option<Self> {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut count = 0usize;

        for v in values {
            min = min.min(v);
            max = max.max(v);
            sum += v;
            count += 1;
        }

        (count > 0).then(|| Self {
            min,
            max,
            avg: sum / count as f64,
            count,
        })
    }
}

/// Statistics over every reading of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub total_readings: usize,
    pub metrics: BTreeMap<String, MetricStats>,
    pub accel_magnitude: Option<MetricStats>,
    pub gyro_magnitude: Option<MetricStats>,
}

impl SessionStatistics {
    pub fn compute(readings: &[StoredReading]) -> Self {
        let metrics = Metric::ALL
            .iter()
            .filter_map(|&metric| {
                MetricStats::from_values(readings.iter().filter_map(|r| metric.value(r)))
                    .map(|stats| (metric.name().to_string(), stats))
            })
            .collect();

        Self {
            total_readings: readings.len(),
            metrics,
            accel_magnitude: MetricStats::from_values(
                readings.iter().filter_map(|r| r.accelerometer()).map(|v| v.magnitude()),
            ),
            gyro_magnitude: MetricStats::from_values(
                readings.iter().filter_map(|r| r.gyroscope()).map(|v| v.magnitude()),
            ),
        }
    }

    pub fn metric(&self, metric: Metric) -> Option<&MetricStats> {
        self.metrics.get(metric.name())
    }
}

/// Analytics report for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAnalytics {
    pub session_id: String,
    pub session_name: String,
    pub duration_ms: i64,
    pub statistics: SessionStatistics,
}

impl SessionAnalytics {
    pub fn compute(session: &Session, readings: &[StoredReading], now: i64) -> Self {
        Self {
            session_id: session.id.clone(),
            session_name: session.name.clone(),
            duration_ms: session.duration_ms(now),
            statistics: SessionStatistics::compute(readings),
        }
    }
}

/// One time bucket of a trend series
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrendBucket {
    pub interval_start: i64,
    pub avg_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub sample_count: usize,
}

/// Average a metric over fixed-width time buckets
///
/// Buckets start at multiples of `interval_ms`; rows without the metric are
/// skipped and empty buckets are omitted.
///
/// # Errors
///
/// Returns `InvalidSession` if `interval_ms` is not positive
pub fn trends(readings: &[StoredReading], metric: Metric, interval_ms: i64) -> Result<Vec<TrendBucket>> {
    if interval_ms <= 0 {
        return Err(SenseBridgeError::InvalidSession(format!(
            "trend interval must be positive, got {}",
            interval_ms
        )));
    }

    let mut buckets: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
    for reading in readings {
        if let Some(value) = metric.value(reading) {
            let start = reading.timestamp.div_euclid(interval_ms) * interval_ms;
            buckets.entry(start).or_default().push(value);
        }
    }

    Ok(buckets
        .into_iter()
        .filter_map(|(start, values)| {
            MetricStats::from_values(values).map(|s| TrendBucket {
                interval_start: start,
                avg_value: s.avg,
                min_value: s.min,
                max_value: s.max,
                sample_count: s.count,
            })
        })
        .collect())
}

/// Store-wide totals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub total_sessions: usize,
    pub total_readings: usize,
    pub recent_sessions: Vec<Session>,
}
