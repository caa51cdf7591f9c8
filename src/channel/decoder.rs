//! # Characteristic Decoder
//!
//! Decodes raw characteristic payloads into typed readings.

use super::protocol::*;
use crate::error::{Result, SenseBridgeError};

/// Typed value of one decoded datum
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SensorValue {
    /// Single named quantity (temperature, humidity, ...)
    Scalar { name: &'static str, value: f64 },
    Vector3 { x: f64, y: f64, z: f64 },
    Quaternion { x: f64, y: f64, z: f64, w: f64 },
    Rgb { r: f64, g: f64, b: f64 },
}

/// One datum decoded against its channel layout
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReading {
    /// Channel the datum arrived on
    pub channel: ChannelId,

    /// Field values zipped with the descriptor's field names, in layout order
    pub fields: Vec<(&'static str, f64)>,

    /// Typed view of the same values
    pub value: SensorValue,

    /// Wall-clock capture time in Unix milliseconds
    pub captured_at_millis: i64,
}

impl DecodedReading {
    /// Value of a named field, if present
    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| *value)
    }
}

/// Decode a payload against a layout
///
/// Walks the layout left to right, reading each field little-endian at the
/// current offset and advancing by the field width. Bytes past the end of the
/// layout are ignored.
///
/// # Arguments
///
/// * `layout` - Ordered field types
/// * `buffer` - Raw payload bytes
///
/// # Returns
///
/// * `Result<Vec<f64>>` - One value per layout entry
///
/// # Errors
///
/// Returns `BufferTooShort` if the payload ends before any field is complete
///
/// # Examples
///
/// ```
/// use sense_bridge::channel::decoder::decode;
/// use sense_bridge::channel::protocol::FieldType;
///
/// let values = decode(&[FieldType::U8, FieldType::I16], &[7, 0xFE, 0xFF]).unwrap();
/// assert_eq!(values, vec![7.0, -2.0]);
/// ```
pub fn decode(layout: &[FieldType], buffer: &[u8]) -> Result<Vec<f64>> {
    let mut values = Vec::with_capacity(layout.len());
    let mut offset = 0;

    for (index, &field_type) in layout.iter().enumerate() {
        let width = field_type.width();
        let available = buffer.len().saturating_sub(offset);
        if available < width {
            return Err(SenseBridgeError::BufferTooShort {
                field: index,
                offset,
                needed: width,
                available,
            });
        }

        let bytes = &buffer[offset..offset + width];
        values.push(read_field(field_type, bytes));
        offset += width;
    }

    Ok(values)
}

/// Read one little-endian field; `bytes` is exactly `field_type.width()` long
fn read_field(field_type: FieldType, bytes: &[u8]) -> f64 {
    match field_type {
        FieldType::U8 => bytes[0] as f64,
        FieldType::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        FieldType::I16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        FieldType::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        FieldType::F32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
    }
}

/// Decode a datum into a [`DecodedReading`] for the given channel
///
/// # Errors
///
/// Returns `BufferTooShort` if the payload does not cover the layout
pub fn decode_reading(
    descriptor: &ChannelDescriptor,
    buffer: &[u8],
    captured_at_millis: i64,
) -> Result<DecodedReading> {
    let values = decode(descriptor.layout, buffer)?;
    let fields: Vec<(&'static str, f64)> = descriptor
        .field_names
        .iter()
        .copied()
        .zip(values.iter().copied())
        .collect();

    let value = match descriptor.shape {
        ValueShape::Scalar => SensorValue::Scalar {
            name: descriptor.id.name(),
            value: values[0],
        },
        ValueShape::Vector3 => SensorValue::Vector3 {
            x: values[0],
            y: values[1],
            z: values[2],
        },
        ValueShape::Quaternion => SensorValue::Quaternion {
            x: values[0],
            y: values[1],
            z: values[2],
            w: values[3],
        },
        ValueShape::Rgb => SensorValue::Rgb {
            r: values[0],
            g: values[1],
            b: values[2],
        },
    };

    Ok(DecodedReading {
        channel: descriptor.id,
        fields,
        value,
        captured_at_millis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::encoder::encode;

    fn sample_values(layout: &[FieldType]) -> Vec<f64> {
        layout
            .iter()
            .enumerate()
            .map(|(i, t)| match t {
                FieldType::U8 => 200.0 + i as f64,
                FieldType::U16 => 60_000.0 + i as f64,
                FieldType::I16 => -1_200.0 - i as f64,
                FieldType::U32 => 4_000_000_000.0 + i as f64,
                FieldType::F32 => -12.5 + i as f64 * 0.25,
            })
            .collect()
    }

    #[test]
    fn test_decode_round_trip_for_every_channel() {
        for desc in CHANNEL_TABLE.iter() {
            let values = sample_values(desc.layout);
            let bytes = encode(desc.layout, &values).unwrap();
            assert_eq!(bytes.len(), desc.payload_size());

            let decoded = decode(desc.layout, &bytes).unwrap();
            assert_eq!(decoded, values, "round trip failed for {}", desc.id);
        }
    }

    #[test]
    fn test_decode_little_endian() {
        let values = decode(&[FieldType::U16, FieldType::U32], &[0x34, 0x12, 0x78, 0x56, 0x34, 0x12]).unwrap();
        assert_eq!(values, vec![0x1234 as f64, 0x1234_5678 as f64]);
    }

    #[test]
    fn test_decode_float() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&23.5f32.to_le_bytes());
        let values = decode(&[FieldType::F32], &bytes).unwrap();
        assert_eq!(values, vec![23.5]);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let values = decode(&[FieldType::U8], &[42, 1, 2, 3]).unwrap();
        assert_eq!(values, vec![42.0]);
    }

    #[test]
    fn test_decode_buffer_too_short() {
        // Second f32 is truncated after two bytes
        let bytes = [0u8; 6];
        match decode(&[FieldType::F32, FieldType::F32], &bytes) {
            Err(SenseBridgeError::BufferTooShort { field, offset, needed, available }) => {
                assert_eq!(field, 1);
                assert_eq!(offset, 4);
                assert_eq!(needed, 4);
                assert_eq!(available, 2);
            }
            other => panic!("Expected BufferTooShort, got: {:?}", other),
        }
    }

    #[test]
    fn test_decode_empty_buffer() {
        assert!(decode(&[FieldType::U8], &[]).is_err());
        assert_eq!(decode(&[], &[]).unwrap(), Vec::<f64>::new());
    }

    #[test]
    fn test_decode_quaternion_reading() {
        let reg = ChannelRegistry::full();
        let desc = reg.describe(ChannelId::Quaternion).unwrap();

        let mut bytes = Vec::new();
        for v in [0.0f32, 0.0, 0.0, 1.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }

        let reading = decode_reading(desc, &bytes, 1_000).unwrap();
        assert_eq!(reading.channel, ChannelId::Quaternion);
        assert_eq!(
            reading.value,
            SensorValue::Quaternion { x: 0.0, y: 0.0, z: 0.0, w: 1.0 }
        );
        assert_eq!(reading.field("w"), Some(1.0));
        assert_eq!(reading.captured_at_millis, 1_000);
    }

    #[test]
    fn test_decode_accelerometer_field_names() {
        let reg = ChannelRegistry::full();
        let desc = reg.describe(ChannelId::Accelerometer).unwrap();
        let bytes = encode(desc.layout, &[1.0, -2.0, 9.75]).unwrap();

        let reading = decode_reading(desc, &bytes, 0).unwrap();
        assert_eq!(reading.fields, vec![("Ax", 1.0), ("Ay", -2.0), ("Az", 9.75)]);
        assert_eq!(reading.value, SensorValue::Vector3 { x: 1.0, y: -2.0, z: 9.75 });
    }

    #[test]
    fn test_decode_scalar_uses_channel_name() {
        let reg = ChannelRegistry::full();
        let desc = reg.describe(ChannelId::Co2).unwrap();
        let reading = decode_reading(desc, &612u32.to_le_bytes(), 0).unwrap();
        assert_eq!(reading.value, SensorValue::Scalar { name: "co2", value: 612.0 });
    }

    #[test]
    fn test_decode_reading_truncated() {
        let reg = ChannelRegistry::full();
        let desc = reg.describe(ChannelId::Gyroscope).unwrap();
        assert!(decode_reading(desc, &[0u8; 11], 0).is_err());
    }
}
