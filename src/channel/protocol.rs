//! # Channel Table and Registry
//!
//! Binary layouts and identifiers of every characteristic exposed by the
//! sensor board. The table must match the firmware byte-for-byte.

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SenseBridgeError};

/// Primary service exposing all sensor characteristics
pub const SERVICE_UUID: &str = "19b10000-0000-537e-4f6c-d104768a1214";

/// Default number of samples kept per field for live display
pub const DEFAULT_MAX_RECORDS: usize = 64;

/// Default poll period for read-only characteristics
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Primitive field types found in characteristic payloads (all little-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    U8,
    U16,
    U32,
    I16,
    F32,
}

impl FieldType {
    /// Width of the field on the wire in bytes
    pub const fn width(self) -> usize {
        match self {
            FieldType::U8 => 1,
            FieldType::U16 | FieldType::I16 => 2,
            FieldType::U32 | FieldType::F32 => 4,
        }
    }
}

/// How the device delivers a characteristic's value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Device notifies on every new value
    Push,
    /// Value must be read on an interval
    Poll,
    /// Actuator, written by the client and never read
    Write,
}

/// Shape of the decoded value, used to map fields into persisted records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Scalar,
    Vector3,
    Quaternion,
    Rgb,
}

/// Every channel the board exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    Temperature,
    Humidity,
    Pressure,
    Accelerometer,
    Gyroscope,
    Quaternion,
    Led,
    Bsec,
    Co2,
    Gas,
}

impl ChannelId {
    /// All channels in table order
    pub const ALL: [ChannelId; 10] = [
        ChannelId::Temperature,
        ChannelId::Humidity,
        ChannelId::Pressure,
        ChannelId::Accelerometer,
        ChannelId::Gyroscope,
        ChannelId::Quaternion,
        ChannelId::Led,
        ChannelId::Bsec,
        ChannelId::Co2,
        ChannelId::Gas,
    ];

    /// Stable lowercase name, also used as the persisted column name for scalars
    pub const fn name(self) -> &'static str {
        match self {
            ChannelId::Temperature => "temperature",
            ChannelId::Humidity => "humidity",
            ChannelId::Pressure => "pressure",
            ChannelId::Accelerometer => "accelerometer",
            ChannelId::Gyroscope => "gyroscope",
            ChannelId::Quaternion => "quaternion",
            ChannelId::Led => "led",
            ChannelId::Bsec => "bsec",
            ChannelId::Co2 => "co2",
            ChannelId::Gas => "gas",
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChannelId {
    type Err = SenseBridgeError;

    fn from_str(s: &str) -> Result<Self> {
        ChannelId::ALL
            .iter()
            .copied()
            .find(|id| id.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SenseBridgeError::UnknownChannel(s.to_string()))
    }
}

/// Static description of one characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDescriptor {
    pub id: ChannelId,
    pub uuid: &'static str,
    pub delivery: DeliveryMode,
    pub shape: ValueShape,
    pub layout: &'static [FieldType],
    pub field_names: &'static [&'static str],
}

impl ChannelDescriptor {
    /// Total payload size declared by the layout
    pub fn payload_size(&self) -> usize {
        self.layout.iter().map(|t| t.width()).sum()
    }
}

const F32_1: &[FieldType] = &[FieldType::F32];
const F32_3: &[FieldType] = &[FieldType::F32, FieldType::F32, FieldType::F32];
const F32_4: &[FieldType] = &[FieldType::F32, FieldType::F32, FieldType::F32, FieldType::F32];

/// The board's characteristic table
pub const CHANNEL_TABLE: [ChannelDescriptor; 10] = [
    ChannelDescriptor {
        id: ChannelId::Temperature,
        uuid: "19b10000-2001-537e-4f6c-d104768a1214",
        delivery: DeliveryMode::Poll,
        shape: ValueShape::Scalar,
        layout: F32_1,
        field_names: &["temperature"],
    },
    ChannelDescriptor {
        id: ChannelId::Humidity,
        uuid: "19b10000-3001-537e-4f6c-d104768a1214",
        delivery: DeliveryMode::Poll,
        shape: ValueShape::Scalar,
        layout: &[FieldType::U8],
        field_names: &["humidity"],
    },
    ChannelDescriptor {
        id: ChannelId::Pressure,
        uuid: "19b10000-4001-537e-4f6c-d104768a1214",
        delivery: DeliveryMode::Poll,
        shape: ValueShape::Scalar,
        layout: F32_1,
        field_names: &["pressure"],
    },
    ChannelDescriptor {
        id: ChannelId::Accelerometer,
        uuid: "19b10000-5001-537e-4f6c-d104768a1214",
        delivery: DeliveryMode::Push,
        shape: ValueShape::Vector3,
        layout: F32_3,
        field_names: &["Ax", "Ay", "Az"],
    },
    ChannelDescriptor {
        id: ChannelId::Gyroscope,
        uuid: "19b10000-6001-537e-4f6c-d104768a1214",
        delivery: DeliveryMode::Push,
        shape: ValueShape::Vector3,
        layout: F32_3,
        field_names: &["x", "y", "z"],
    },
    ChannelDescriptor {
        id: ChannelId::Quaternion,
        uuid: "19b10000-7001-537e-4f6c-d104768a1214",
        delivery: DeliveryMode::Push,
        shape: ValueShape::Quaternion,
        layout: F32_4,
        field_names: &["x", "y", "z", "w"],
    },
    ChannelDescriptor {
        id: ChannelId::Led,
        uuid: "19b10000-8001-537e-4f6c-d104768a1214",
        delivery: DeliveryMode::Write,
        shape: ValueShape::Rgb,
        layout: &[FieldType::U8, FieldType::U8, FieldType::U8],
        field_names: &["R", "G", "B"],
    },
    ChannelDescriptor {
        id: ChannelId::Bsec,
        uuid: "19b10000-9001-537e-4f6c-d104768a1214",
        delivery: DeliveryMode::Poll,
        shape: ValueShape::Scalar,
        layout: F32_1,
        field_names: &["bsec"],
    },
    ChannelDescriptor {
        id: ChannelId::Co2,
        uuid: "19b10000-9002-537e-4f6c-d104768a1214",
        delivery: DeliveryMode::Poll,
        shape: ValueShape::Scalar,
        layout: &[FieldType::U32],
        field_names: &["co2"],
    },
    ChannelDescriptor {
        id: ChannelId::Gas,
        uuid: "19b10000-9003-537e-4f6c-d104768a1214",
        delivery: DeliveryMode::Poll,
        shape: ValueShape::Scalar,
        layout: &[FieldType::U32],
        field_names: &["gas"],
    },
];

/// Lookup table over the enabled subset of [`CHANNEL_TABLE`]
///
/// Constructed once per connection; descriptors are never mutated.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    channels: Vec<&'static ChannelDescriptor>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::full()
    }
}

impl ChannelRegistry {
    /// Registry with every channel of the board
    pub fn full() -> Self {
        Self {
            channels: CHANNEL_TABLE.iter().collect(),
        }
    }

    /// Registry restricted to the given channels, in table order
    pub fn with_channels(enabled: &[ChannelId]) -> Self {
        Self {
            channels: CHANNEL_TABLE
                .iter()
                .filter(|d| enabled.contains(&d.id))
                .collect(),
        }
    }

    /// Describe a channel
    ///
    /// # Errors
    ///
    /// Returns `UnknownChannel` if the channel is not part of this registry
    pub fn describe(&self, id: ChannelId) -> Result<&'static ChannelDescriptor> {
        self.channels
            .iter()
            .copied()
            .find(|d| d.id == id)
            .ok_or_else(|| SenseBridgeError::UnknownChannel(id.to_string()))
    }

    /// Describe a channel by its characteristic UUID (case-insensitive)
    pub fn describe_uuid(&self, uuid: &str) -> Result<&'static ChannelDescriptor> {
        self.channels
            .iter()
            .copied()
            .find(|d| d.uuid.eq_ignore_ascii_case(uuid))
            .ok_or_else(|| SenseBridgeError::UnknownChannel(uuid.to_string()))
    }

    /// Iterate the enabled descriptors in table order
    pub fn iter(&self) -> impl Iterator<Item = &'static ChannelDescriptor> + '_ {
        self.channels.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
