//! # Characteristic Encoder
//!
//! Encodes values into characteristic payloads. Used for LED writes and by
//! the simulated device.

use super::protocol::*;
use crate::error::{Result, SenseBridgeError};

/// Encode values into a little-endian payload following `layout`
///
/// Integer fields are rounded and clamped to the range of their type.
///
/// # Arguments
///
/// * `layout` - Ordered field types
/// * `values` - One value per layout entry
///
/// # Returns
///
/// * `Result<Vec<u8>>` - Payload of exactly the layout's size
///
/// # Errors
///
/// Returns `LayoutMismatch` error if the value count does not match the layout
///
/// # Examples
///
/// ```
/// use sense_bridge::channel::encoder::encode;
/// use sense_bridge::channel::protocol::FieldType;
///
/// let bytes = encode(&[FieldType::U16], &[0x1234 as f64]).unwrap();
/// assert_eq!(bytes, vec![0x34, 0x12]);
/// ```
pub fn encode(layout: &[FieldType], values: &[f64]) -> Result<Vec<u8>> {
    if layout.len() != values.len() {
        return Err(SenseBridgeError::LayoutMismatch {
            expected: layout.len(),
            actual: values.len(),
        });
    }

    let size = layout.iter().map(|t| t.width()).sum();
    let mut payload = Vec::with_capacity(size);

    for (&field_type, &value) in layout.iter().zip(values) {
        match field_type {
            FieldType::U8 => payload.push(clamp_round(value, u8::MIN as f64, u8::MAX as f64) as u8),
            FieldType::U16 => payload.extend_from_slice(
                &(clamp_round(value, u16::MIN as f64, u16::MAX as f64) as u16).to_le_bytes(),
            ),
            FieldType::I16 => payload.extend_from_slice(
                &(clamp_round(value, i16::MIN as f64, i16::MAX as f64) as i16).to_le_bytes(),
            ),
            FieldType::U32 => payload.extend_from_slice(
                &(clamp_round(value, u32::MIN as f64, u32::MAX as f64) as u32).to_le_bytes(),
            ),
            FieldType::F32 => payload.extend_from_slice(&(value as f32).to_le_bytes()),
        }
    }

    Ok(payload)
}

/// Encode an RGB colour for the LED characteristic
///
/// # Examples
///
/// ```
/// use sense_bridge::channel::encoder::encode_led;
///
/// assert_eq!(encode_led(255, 0, 16), vec![255, 0, 16]);
/// ```
pub fn encode_led(r: u8, g: u8, b: u8) -> Vec<u8> {
    vec![r, g, b]
}

fn clamp_round(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        return min;
    }
    value.round().clamp(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_led_matches_layout() {
        let reg = ChannelRegistry::full();
        let desc = reg.describe(ChannelId::Led).unwrap();
        let via_layout = encode(desc.layout, &[10.0, 20.0, 30.0]).unwrap();
        assert_eq!(via_layout, encode_led(10, 20, 30));
    }

    #[test]
    fn test_encode_clamps_integers() {
        let bytes = encode(&[FieldType::U8, FieldType::U8], &[300.0, -5.0]).unwrap();
        assert_eq!(bytes, vec![255, 0]);
    }

    #[test]
    fn test_encode_rounds_integers() {
        let bytes = encode(&[FieldType::U8], &[41.6]).unwrap();
        assert_eq!(bytes, vec![42]);
    }

    #[test]
    fn test_encode_signed() {
        let bytes = encode(&[FieldType::I16], &[-2.0]).unwrap();
        assert_eq!(bytes, vec![0xFE, 0xFF]);
    }

    #[test]
    fn test_encode_value_count_mismatch() {
        match encode(&[FieldType::F32, FieldType::F32], &[1.0]) {
            Err(SenseBridgeError::LayoutMismatch { expected, actual }) => {
                assert_eq!(expected, 2);
                assert_eq!(actual, 1);
            }
            other => panic!("Expected LayoutMismatch, got: {:?}", other),
        }
    }

    #[test]
    fn test_encode_payload_size() {
        for desc in CHANNEL_TABLE.iter() {
            let zeros = vec![0.0; desc.layout.len()];
            assert_eq!(encode(desc.layout, &zeros).unwrap().len(), desc.payload_size());
        }
    }
}
