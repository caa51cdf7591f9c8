//! # Session and Reading Types
//!
//! Persisted entities and their wire shapes (snake_case JSON, as spoken by
//! the storage backend).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::channel::decoder::{DecodedReading, SensorValue};
use crate::channel::protocol::ChannelId;
use crate::error::{Result, SenseBridgeError};

/// Longest accepted session name, in characters
pub const MAX_SESSION_NAME_LEN: usize = 200;

/// Current wall-clock time in Unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Lifecycle status of a recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
        }
    }
}

/// A user-scoped recording window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub device_name: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub started_at: i64,
    #[serde(default)]
    pub ended_at: Option<i64>,
    pub status: SessionStatus,
}

impl Session {
    /// Elapsed recording time; open sessions are measured against `now`
    pub fn duration_ms(&self, now: i64) -> i64 {
        self.ended_at.unwrap_or(now) - self.started_at
    }
}

/// Session creation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewSession {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl NewSession {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_device(mut self, name: impl Into<String>, id: Option<String>) -> Self {
        self.device_name = Some(name.into());
        self.device_id = id;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Normalise and validate the request
    ///
    /// Trims the name, notes and tags, drops empty and duplicate tags.
    ///
    /// # Errors
    ///
    /// - `MissingName` if the name is empty or whitespace
    /// - `InvalidSession` if the name exceeds [`MAX_SESSION_NAME_LEN`]
    pub fn validated(self) -> Result<Self> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(SenseBridgeError::MissingName);
        }
        if name.chars().count() > MAX_SESSION_NAME_LEN {
            return Err(SenseBridgeError::InvalidSession(format!(
                "name must be at most {} characters",
                MAX_SESSION_NAME_LEN
            )));
        }

        let notes = self
            .notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let mut seen = BTreeSet::new();
        let tags = self
            .tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect();

        Ok(Self {
            name,
            notes,
            tags,
            device_name: self.device_name,
            device_id: self.device_id,
        })
    }
}

/// Backend acknowledgement of a session end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnd {
    pub id: String,
    pub ended_at: i64,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

/// One reading queued for persistence, keyed by channel type
///
/// Exactly one of the value fields is set per record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SensorReadingRecord {
    pub session_id: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerometer: Option<Vector3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gyroscope: Option<Vector3>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quaternion: Option<Quaternion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bsec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub co2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<f64>,
}

impl SensorReadingRecord {
    /// Map a decoded reading into a record for `session_id`
    ///
    /// Returns `None` for channels that are not persisted (the LED actuator).
    pub fn from_reading(session_id: &str, reading: &DecodedReading) -> Option<Self> {
        let mut record = Self {
            session_id: session_id.to_string(),
            timestamp: reading.captured_at_millis,
            ..Default::default()
        };

        match (reading.channel, reading.value) {
            (ChannelId::Accelerometer, SensorValue::Vector3 { x, y, z }) => {
                record.accelerometer = Some(Vector3 { x, y, z });
            }
            (ChannelId::Gyroscope, SensorValue::Vector3 { x, y, z }) => {
                record.gyroscope = Some(Vector3 { x, y, z });
            }
            (ChannelId::Quaternion, SensorValue::Quaternion { x, y, z, w }) => {
                record.quaternion = Some(Quaternion { x, y, z, w });
            }
            (ChannelId::Temperature, SensorValue::Scalar { value, .. }) => record.temperature = Some(value),
            (ChannelId::Humidity, SensorValue::Scalar { value, .. }) => record.humidity = Some(value),
            (ChannelId::Pressure, SensorValue::Scalar { value, .. }) => record.pressure = Some(value),
            (ChannelId::Bsec, SensorValue::Scalar { value, .. }) => record.bsec = Some(value),
            (ChannelId::Co2, SensorValue::Scalar { value, .. }) => record.co2 = Some(value),
            (ChannelId::Gas, SensorValue::Scalar { value, .. }) => record.gas = Some(value),
            _ => return None,
        }

        Some(record)
    }
}

/// A persisted sensor reading row
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StoredReading {
    pub id: String,
    pub session_id: String,
    pub timestamp: i64,
    pub accel_x: Option<f64>,
    pub accel_y: Option<f64>,
    pub accel_z: Option<f64>,
    pub gyro_x: Option<f64>,
    pub gyro_y: Option<f64>,
    pub gyro_z: Option<f64>,
    pub quat_x: Option<f64>,
    pub quat_y: Option<f64>,
    pub quat_z: Option<f64>,
    pub quat_w: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub bsec: Option<f64>,
    pub co2: Option<f64>,
    pub gas: Option<f64>,
    pub created_at: i64,
}

impl StoredReading {
    /// Flatten a queued record into a row
    pub fn from_record(id: String, record: &SensorReadingRecord, created_at: i64) -> Self {
        let accel = record.accelerometer;
        let gyro = record.gyroscope;
        let quat = record.quaternion;
        Self {
            id,
            session_id: record.session_id.clone(),
            timestamp: record.timestamp,
            accel_x: accel.map(|v| v.x),
            accel_y: accel.map(|v| v.y),
            accel_z: accel.map(|v| v.z),
            gyro_x: gyro.map(|v| v.x),
            gyro_y: gyro.map(|v| v.y),
            gyro_z: gyro.map(|v| v.z),
            quat_x: quat.map(|q| q.x),
            quat_y: quat.map(|q| q.y),
            quat_z: quat.map(|q| q.z),
            quat_w: quat.map(|q| q.w),
            temperature: record.temperature,
            humidity: record.humidity,
            pressure: record.pressure,
            bsec: record.bsec,
            co2: record.co2,
            gas: record.gas,
            created_at,
        }
    }

    /// Accelerometer vector, if every axis is present
    pub fn accelerometer(&self) -> Option<Vector3> {
        Some(Vector3 {
            x: self.accel_x?,
            y: self.accel_y?,
            z: self.accel_z?,
        })
    }

    /// Gyroscope vector, if every axis is present
    pub fn gyroscope(&self) -> Option<Vector3> {
        Some(Vector3 {
            x: self.gyro_x?,
            y: self.gyro_y?,
            z: self.gyro_z?,
        })
    }
}

/// Page metadata for paginated listings (pages are 1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    #[serde(rename = "totalPages")]
    pub total_pages: usize,
}

impl Pagination {
    pub fn new(page: usize, limit: usize, total: usize) -> Self {
        let limit = limit.max(1);
        Self {
            page: page.max(1),
            limit,
            total,
            total_pages: total.div_ceil(limit),
        }
    }

    /// Index of the first item on this page
    ///
    /// Saturates for page numbers far past the end; such a page is empty.
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

/// One page of a session's readings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingsPage {
    pub readings: Vec<StoredReading>,
    pub pagination: Pagination,
}

/// Session listing entry with its reading count
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: Session,
    pub reading_count: usize,
    pub duration_ms: Option<i64>,
}

/// One page of sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionsPage {
    pub sessions: Vec<SessionSummary>,
    pub pagination: Pagination,
}
