//! Product announcement broadcast by the heat pump roughly every 15 seconds.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::protocol::command::Command;
use crate::protocol::payload::{require, PayloadError};

/// Model and firmware of the connected heat pump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    /// Model name as announced, e.g. `"F1255-12 R"`.
    pub model: String,
    /// Firmware version number rendered as decimal text, e.g. `"9443"`.
    pub firmware_version: String,
    /// The unescaped payload the values were taken from.
    pub raw: Vec<u8>,
}

impl ProductInfo {
    /// Parses a [`Command::ProductInfo`] payload:
    /// `unknown:1, version:2 BE, model:ASCII…`.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::TooShort`] for fewer than three bytes.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nibe_core::protocol::ProductInfo;
    ///
    /// let payload = b"\x01\x24\xe3F1155-16";
    /// let info = ProductInfo::parse(payload).unwrap();
    /// assert_eq!(info.model, "F1155-16");
    /// assert_eq!(info.firmware_version, "9443");
    /// ```
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(Command::ProductInfo, payload, 3)?;

        let version = u16::from_be_bytes([payload[1], payload[2]]);
        let model = String::from_utf8_lossy(&payload[3..])
            .trim_end_matches('\0')
            .to_owned();

        Ok(Self {
            model,
            firmware_version: version.to_string(),
            raw: payload.to_vec(),
        })
    }
}

impl fmt::Display for ProductInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (firmware {})", self.model, self.firmware_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::decode_all;

    #[test]
    fn test_parse_captured_product_frames() {
        let cases: [(&[u8], &str, &str); 3] = [
            (
                &[0x5C, 0x00, 0x20, 0x6D, 0x0B, 0x01, 0x24, 0xE3, b'F', b'1', b'1', b'5', b'5', b'-', b'1', b'6', 0xEC],
                "F1155-16",
                "9443",
            ),
            (
                &[
                    0x5C, 0x00, 0x20, 0x6D, 0x10, 0x07, 0x24, 0x57, b'T', b'e', b'h', b'o', b'w', b'a', b't', b't', b'i',
                    b' ', b'A', b'i', b'r', 0x1A,
                ],
                "Tehowatti Air",
                "9303",
            ),
            (
                &[
                    0x5C, 0x00, 0x20, 0x6D, 0x0D, 0x01, 0x24, 0xE3, b'F', b'1', b'2', b'5', b'5', b'-', b'1', b'2', b' ',
                    b'R', 0x9F,
                ],
                "F1255-12 R",
                "9443",
            ),
        ];

        for (bytes, model, version) in cases {
            // Arrange
            let frame = decode_all(bytes).next().unwrap().expect("valid frame");

            // Act
            let info = ProductInfo::parse(&frame.payload).unwrap();

            // Assert
            assert_eq!(info.model, model);
            assert_eq!(info.firmware_version, version);
            assert_eq!(info.raw, frame.payload);
        }
    }

    #[test]
    fn test_parse_rejects_short_payload() {
        assert!(ProductInfo::parse(&[0x01, 0x24]).is_err());
    }

    #[test]
    fn test_display() {
        let info = ProductInfo::parse(b"\x01\x24\xe3F1255-12 R").unwrap();
        assert_eq!(info.to_string(), "F1255-12 R (firmware 9443)");
    }
}
