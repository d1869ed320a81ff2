//! Conversion between raw register bytes and application values.
//!
//! Raw values are little-endian.  For 32-bit registers the gateway may deliver
//! the two 16-bit words in either order; `word_swap = true` means the words
//! arrive swapped (`[b2, b3, b0, b1]`) and must be put back before the integer
//! is assembled.  Encoding applies the same permutation in reverse.

use std::time::SystemTime;

use thiserror::Error;

use crate::coil::definition::{CoilData, CoilValue, Encoding, RegisterDefinition};

/// Errors produced by [`decode`] and [`encode`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoilError {
    #[error("register {address}: need {needed} value bytes, got {available}")]
    InsufficientData {
        address: u16,
        needed: usize,
        available: usize,
    },

    #[error("register {address} is read-only")]
    NotWritable { address: u16 },

    #[error("register {address} has no mapping for {label:?}")]
    UnknownMapping { address: u16, label: String },

    #[error("value {value} for register {address} is outside {min}..={max}")]
    ValueOutOfRange {
        address: u16,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("register {address} cannot store {value:?}")]
    InvalidValue { address: u16, value: String },
}

// ── Decode ────────────────────────────────────────────────────────────────────

/// Decodes the first `width` bytes of `raw` according to `definition`.
///
/// Readings that are out of bounds, have no mapping, or equal the encoding's
/// "no reading" sentinel are returned with `validated == false`.
///
/// # Errors
///
/// Returns [`CoilError::InsufficientData`] if `raw` is shorter than the
/// register's width.
///
/// # Examples
///
/// ```rust
/// use nibe_core::coil::{decode, CoilValue, Encoding, RegisterDefinition};
///
/// let def = RegisterDefinition::new(40033, "room-temp", Encoding::S16).with_factor(10);
/// let data = decode(&def, &[0xD7, 0x00], false).unwrap();
/// assert_eq!(data.value, CoilValue::Number(21.5));
/// ```
pub fn decode(definition: &RegisterDefinition, raw: &[u8], word_swap: bool) -> Result<CoilData, CoilError> {
    let int = decode_raw(definition, raw, word_swap)?;
    Ok(from_raw(definition, int))
}

/// Builds a reading from a value that arrived already scaled, as the RMU40
/// room unit broadcasts do.
///
/// The value is multiplied by the register's factor and rounded, then goes
/// through the same mapping and validation as a decoded raw integer.
///
/// ```rust
/// use nibe_core::coil::{from_scaled, CoilValue, Encoding, RegisterDefinition};
///
/// let def = RegisterDefinition::new(40004, "bt1-outdoor-temperature-40004", Encoding::S16).with_factor(10);
/// let data = from_scaled(&def, 15.0);
/// assert_eq!(data.raw, 150);
/// assert_eq!(data.value, CoilValue::Number(15.0));
/// ```
pub fn from_scaled(definition: &RegisterDefinition, value: f64) -> CoilData {
    let int = (value * definition.factor as f64).round() as i64;
    from_raw(definition, int)
}

fn from_raw(definition: &RegisterDefinition, int: i64) -> CoilData {
    let mut validated = int != definition.encoding.sentinel() && within_bounds(definition, int);

    let value = match definition.mappings.as_ref().and_then(|m| m.get(&int)) {
        Some(label) => CoilValue::Label(label.clone()),
        None => {
            if definition.mappings.is_some() {
                validated = false;
            }
            CoilValue::Number(int as f64 / definition.factor as f64)
        }
    };

    CoilData {
        address: definition.address,
        value,
        raw: int,
        validated,
        timestamp: SystemTime::now(),
    }
}

fn decode_raw(definition: &RegisterDefinition, raw: &[u8], word_swap: bool) -> Result<i64, CoilError> {
    let width = definition.encoding.width();
    let bytes = raw.get(..width).ok_or(CoilError::InsufficientData {
        address: definition.address,
        needed: width,
        available: raw.len(),
    })?;

    let int = match definition.encoding {
        Encoding::U8 => bytes[0] as i64,
        Encoding::S8 => bytes[0] as i8 as i64,
        Encoding::U16 => u16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        Encoding::S16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
        Encoding::U32 => u32::from_le_bytes(word_order(bytes, word_swap)) as i64,
        Encoding::S32 => i32::from_le_bytes(word_order(bytes, word_swap)) as i64,
    };
    Ok(int)
}

fn within_bounds(definition: &RegisterDefinition, int: i64) -> bool {
    definition.min.map_or(true, |min| int >= min) && definition.max.map_or(true, |max| int <= max)
}

// ── Encode ────────────────────────────────────────────────────────────────────

/// Encodes `value` into exactly `width` little-endian bytes.
///
/// # Errors
///
/// - [`CoilError::NotWritable`] for read-only registers.
/// - [`CoilError::UnknownMapping`] if a mapped register has no matching label
///   (compared case-insensitively) or the number is not a mapping key.
/// - [`CoilError::ValueOutOfRange`] if the scaled value is outside the declared
///   bounds or what the encoding can represent.
/// - [`CoilError::InvalidValue`] for non-finite numbers or non-numeric text on
///   an unmapped register.
pub fn encode(definition: &RegisterDefinition, value: &CoilValue, word_swap: bool) -> Result<Vec<u8>, CoilError> {
    if !definition.writable {
        return Err(CoilError::NotWritable {
            address: definition.address,
        });
    }

    let int = match &definition.mappings {
        Some(_) => mapped_raw(definition, value)?,
        None => scaled_raw(definition, value)?,
    };

    Ok(encode_raw(definition.encoding, int, word_swap))
}

fn mapped_raw(definition: &RegisterDefinition, value: &CoilValue) -> Result<i64, CoilError> {
    let mappings = definition.mappings.as_ref();
    let unknown = |label: String| CoilError::UnknownMapping {
        address: definition.address,
        label,
    };

    match value {
        CoilValue::Label(label) => mappings
            .and_then(|m| {
                m.iter()
                    .find(|(_, l)| l.eq_ignore_ascii_case(label.trim()))
                    .map(|(k, _)| *k)
            })
            .ok_or_else(|| unknown(label.clone())),
        CoilValue::Number(n) => {
            let key = *n as i64;
            let is_key = n.fract() == 0.0 && mappings.is_some_and(|m| m.contains_key(&key));
            if is_key {
                Ok(key)
            } else {
                Err(unknown(n.to_string()))
            }
        }
    }
}

fn scaled_raw(definition: &RegisterDefinition, value: &CoilValue) -> Result<i64, CoilError> {
    let invalid = |value: String| CoilError::InvalidValue {
        address: definition.address,
        value,
    };

    let number = match value {
        CoilValue::Number(n) => *n,
        CoilValue::Label(text) => text.trim().parse::<f64>().map_err(|_| invalid(text.clone()))?,
    };
    if !number.is_finite() {
        return Err(invalid(number.to_string()));
    }

    let factor = definition.factor as f64;
    let scaled = (number * factor).round();

    let lower = definition
        .min
        .map_or(definition.encoding.min_value(), |min| min.max(definition.encoding.min_value()));
    let upper = definition
        .max
        .map_or(definition.encoding.max_value(), |max| max.min(definition.encoding.max_value()));

    if scaled < lower as f64 || scaled > upper as f64 {
        return Err(CoilError::ValueOutOfRange {
            address: definition.address,
            value: number,
            min: lower as f64 / factor,
            max: upper as f64 / factor,
        });
    }

    Ok(scaled as i64)
}

fn encode_raw(encoding: Encoding, int: i64, word_swap: bool) -> Vec<u8> {
    match encoding {
        Encoding::U8 => vec![int as u8],
        Encoding::S8 => (int as i8).to_le_bytes().to_vec(),
        Encoding::U16 => (int as u16).to_le_bytes().to_vec(),
        Encoding::S16 => (int as i16).to_le_bytes().to_vec(),
        Encoding::U32 => word_order(&(int as u32).to_le_bytes(), word_swap).to_vec(),
        Encoding::S32 => word_order(&(int as i32).to_le_bytes(), word_swap).to_vec(),
    }
}

/// Swapping the 16-bit words is its own inverse, so decode and encode share it.
fn word_order(bytes: &[u8], word_swap: bool) -> [u8; 4] {
    if word_swap {
        [bytes[2], bytes[3], bytes[0], bytes[1]]
    } else {
        [bytes[0], bytes[1], bytes[2], bytes[3]]
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn room_temperature() -> RegisterDefinition {
        RegisterDefinition::new(40033, "bt50-room-temp-s1-40033", Encoding::S16)
            .with_factor(10)
            .with_unit("°C")
    }

    fn operating_mode() -> RegisterDefinition {
        RegisterDefinition::new(43005, "operating-mode-43005", Encoding::U8)
            .with_mappings([(0, "Off"), (1, "On")])
            .writable()
    }

    // ── Decode ───────────────────────────────────────────────────────────────

    #[test]
    fn test_from_scaled_applies_factor() {
        let data = from_scaled(&room_temperature(), 22.1);

        assert_eq!(data.raw, 221);
        assert_eq!(data.value, CoilValue::Number(22.1));
        assert!(data.validated);
    }

    #[test]
    fn test_from_scaled_maps_label() {
        let data = from_scaled(&operating_mode(), 1.0);

        assert_eq!(data.value, CoilValue::Label("On".into()));
    }

    #[test]
    fn test_from_scaled_unmapped_value_is_unvalidated() {
        let data = from_scaled(&operating_mode(), 7.0);

        assert_eq!(data.value, CoilValue::Number(7.0));
        assert!(!data.validated);
    }

    #[test]
    fn test_decode_scaled_s16() {
        // Arrange – raw 215 little-endian
        let def = room_temperature();

        // Act
        let data = decode(&def, &[0xD7, 0x00, 0x00, 0x00], false).unwrap();

        // Assert
        assert_eq!(data.value, CoilValue::Number(21.5));
        assert_eq!(data.raw, 215);
        assert!(data.validated);
    }

    #[test]
    fn test_decode_negative_s16() {
        let def = room_temperature();

        let data = decode(&def, &(-55i16).to_le_bytes(), false).unwrap();

        assert_eq!(data.value, CoilValue::Number(-5.5));
    }

    #[test]
    fn test_decode_mapped_label() {
        let data = decode(&operating_mode(), &[0x01], false).unwrap();

        assert_eq!(data.value, CoilValue::Label("On".to_owned()));
        assert!(data.validated);
    }

    #[test]
    fn test_decode_unmapped_value_is_numeric_and_unvalidated() {
        let data = decode(&operating_mode(), &[0x07], false).unwrap();

        assert_eq!(data.value, CoilValue::Number(7.0));
        assert!(!data.validated);
    }

    #[test]
    fn test_decode_out_of_bounds_is_returned_unvalidated() {
        let def = room_temperature().with_bounds(Some(0), Some(300));

        let data = decode(&def, &400i16.to_le_bytes(), false).unwrap();

        assert_eq!(data.value, CoilValue::Number(40.0));
        assert!(!data.validated);
    }

    #[test]
    fn test_decode_sentinel_is_unvalidated() {
        let cases = [
            (Encoding::U8, vec![0xFF]),
            (Encoding::S8, vec![0x80]),
            (Encoding::U16, vec![0xFF, 0xFF]),
            (Encoding::S16, vec![0x00, 0x80]),
            (Encoding::U32, vec![0xFF, 0xFF, 0xFF, 0xFF]),
            (Encoding::S32, vec![0x00, 0x00, 0x00, 0x80]),
        ];

        for (encoding, bytes) in cases {
            let def = RegisterDefinition::new(1, "x", encoding);
            let data = decode(&def, &bytes, false).unwrap();
            assert!(!data.validated, "{encoding} sentinel must not validate");
            assert_eq!(data.raw, encoding.sentinel());
        }
    }

    #[test]
    fn test_decode_insufficient_data() {
        let def = RegisterDefinition::new(43424, "x", Encoding::S32);

        let result = decode(&def, &[0x01, 0x02], false);

        assert_eq!(
            result,
            Err(CoilError::InsufficientData {
                address: 43424,
                needed: 4,
                available: 2
            })
        );
    }

    #[test]
    fn test_decode_word_swap_changes_32_bit_value() {
        // Arrange
        let def = RegisterDefinition::new(43424, "x", Encoding::U32);
        let bytes = [0x01, 0x00, 0x02, 0x00];

        // Act
        let plain = decode(&def, &bytes, false).unwrap();
        let swapped = decode(&def, &bytes, true).unwrap();

        // Assert
        assert_eq!(plain.raw, 0x0002_0001);
        assert_eq!(swapped.raw, 0x0001_0002);
    }

    #[test]
    fn test_word_swap_ignored_for_narrow_registers() {
        let def = RegisterDefinition::new(1, "x", Encoding::S16);
        let bytes = [0x34, 0x12];

        assert_eq!(decode(&def, &bytes, true).unwrap().raw, decode(&def, &bytes, false).unwrap().raw);
    }

    // ── Encode ───────────────────────────────────────────────────────────────

    #[test]
    fn test_encode_scaled_value() {
        let def = room_temperature().writable();

        let bytes = encode(&def, &CoilValue::Number(21.5), false).unwrap();

        assert_eq!(bytes, vec![0xD7, 0x00]);
    }

    #[test]
    fn test_encode_rounds_to_nearest() {
        let def = room_temperature().writable();

        let bytes = encode(&def, &CoilValue::Number(21.46), false).unwrap();

        assert_eq!(bytes, 215i16.to_le_bytes().to_vec());
    }

    #[test]
    fn test_encode_label_case_insensitive() {
        let bytes = encode(&operating_mode(), &CoilValue::from("on"), false).unwrap();
        assert_eq!(bytes, vec![0x01]);
    }

    #[test]
    fn test_encode_unknown_label() {
        let result = encode(&operating_mode(), &CoilValue::from("Maybe"), false);

        assert_eq!(
            result,
            Err(CoilError::UnknownMapping {
                address: 43005,
                label: "Maybe".to_owned()
            })
        );
    }

    #[test]
    fn test_encode_number_on_mapped_register_must_be_key() {
        assert_eq!(encode(&operating_mode(), &CoilValue::Number(0.0), false), Ok(vec![0x00]));
        assert!(matches!(
            encode(&operating_mode(), &CoilValue::Number(2.0), false),
            Err(CoilError::UnknownMapping { .. })
        ));
    }

    #[test]
    fn test_encode_read_only_register() {
        let result = encode(&room_temperature(), &CoilValue::Number(20.0), false);
        assert_eq!(result, Err(CoilError::NotWritable { address: 40033 }));
    }

    #[test]
    fn test_encode_outside_declared_bounds() {
        let def = room_temperature().with_bounds(Some(50), Some(300)).writable();

        let result = encode(&def, &CoilValue::Number(30.1), false);

        assert_eq!(
            result,
            Err(CoilError::ValueOutOfRange {
                address: 40033,
                value: 30.1,
                min: 5.0,
                max: 30.0
            })
        );
    }

    #[test]
    fn test_encode_outside_representable_range() {
        let def = RegisterDefinition::new(1, "x", Encoding::U8).writable();

        assert!(matches!(
            encode(&def, &CoilValue::Number(256.0), false),
            Err(CoilError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            encode(&def, &CoilValue::Number(-1.0), false),
            Err(CoilError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn test_encode_rejects_non_finite_and_non_numeric() {
        let def = room_temperature().writable();

        assert!(matches!(
            encode(&def, &CoilValue::Number(f64::NAN), false),
            Err(CoilError::InvalidValue { .. })
        ));
        assert!(matches!(
            encode(&def, &CoilValue::from("warm"), false),
            Err(CoilError::InvalidValue { .. })
        ));
        assert_eq!(encode(&def, &CoilValue::from("20"), false), Ok(200i16.to_le_bytes().to_vec()));
    }

    #[test]
    fn test_encode_s32_with_word_swap() {
        let def = RegisterDefinition::new(48132, "x", Encoding::S32).writable();

        let bytes = encode(&def, &CoilValue::Number(-2.0), true).unwrap();

        // -2 = FE FF FF FF little-endian
        assert_eq!(bytes, vec![0xFF, 0xFF, 0xFE, 0xFF]);
        let bytes = encode(&def, &CoilValue::Number(65_538.0), true).unwrap();
        assert_eq!(bytes, vec![0x01, 0x00, 0x02, 0x00]);
    }
}
