//! Typed views of the payloads the engine sends and receives.
//!
//! | Command        | Payload                                   |
//! |----------------|-------------------------------------------|
//! | ReadRequest    | `addr:2 LE`                               |
//! | ReadResponse   | `addr:2 LE, value:4`                      |
//! | WriteRequest   | `addr:2 LE, value:4` (zero padded)        |
//! | WriteResponse  | `result:1` (non-zero means accepted)      |
//! | Telemetry      | `(addr:2 LE, value:2)*`, `0xFFFF` = empty |
//!
//! Register values stay as raw bytes here; turning them into numbers is the
//! coil codec's job because only the register definition knows the width.

use thiserror::Error;

use crate::protocol::command::Command;

/// Register address that marks an unused telemetry row.
pub const EMPTY_ROW_ADDRESS: u16 = 0xFFFF;

/// Number of value bytes carried by read responses and write requests.
pub const VALUE_WIDTH: usize = 4;

const TELEMETRY_ROW_LEN: usize = 4;

/// Errors that occur while interpreting a frame payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("{command} payload too short: need {needed} bytes, got {available}")]
    TooShort {
        command: Command,
        needed: usize,
        available: usize,
    },

    #[error("register value of {len} bytes does not fit the {VALUE_WIDTH}-byte value field")]
    ValueTooWide { len: usize },
}

/// Payload of a [`Command::ReadResponse`] frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResponse {
    pub address: u16,
    pub value: [u8; VALUE_WIDTH],
}

/// One row of a [`Command::Telemetry`] broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryRow {
    pub address: u16,
    pub value: [u8; 2],
}

/// Builds the payload of a read request for `address`.
pub fn read_request(address: u16) -> [u8; 2] {
    address.to_le_bytes()
}

/// Builds the payload of a write request.
///
/// `value` holds the little-endian raw register bytes produced by the coil
/// codec; narrower values are zero padded to the four-byte field.
///
/// # Errors
///
/// Returns [`PayloadError::ValueTooWide`] for more than four value bytes.
pub fn write_request(address: u16, value: &[u8]) -> Result<[u8; 2 + VALUE_WIDTH], PayloadError> {
    if value.len() > VALUE_WIDTH {
        return Err(PayloadError::ValueTooWide { len: value.len() });
    }

    let mut payload = [0u8; 2 + VALUE_WIDTH];
    payload[..2].copy_from_slice(&address.to_le_bytes());
    payload[2..2 + value.len()].copy_from_slice(value);
    Ok(payload)
}

/// Parses the payload of a read response.
///
/// # Errors
///
/// Returns [`PayloadError::TooShort`] for fewer than six bytes.
pub fn parse_read_response(payload: &[u8]) -> Result<ReadResponse, PayloadError> {
    require(Command::ReadResponse, payload, 2 + VALUE_WIDTH)?;

    let mut value = [0u8; VALUE_WIDTH];
    value.copy_from_slice(&payload[2..2 + VALUE_WIDTH]);
    Ok(ReadResponse {
        address: u16::from_le_bytes([payload[0], payload[1]]),
        value,
    })
}

/// Parses the payload of a write response.  Returns `true` when the heat pump
/// accepted the write.
///
/// # Errors
///
/// Returns [`PayloadError::TooShort`] for an empty payload.
pub fn parse_write_response(payload: &[u8]) -> Result<bool, PayloadError> {
    require(Command::WriteResponse, payload, 1)?;
    Ok(payload[0] != 0)
}

/// Iterates the populated rows of a telemetry broadcast.
///
/// Padding rows (address `0xFFFF`) and a trailing partial row are skipped.
pub fn telemetry_rows(payload: &[u8]) -> impl Iterator<Item = TelemetryRow> + '_ {
    payload
        .chunks_exact(TELEMETRY_ROW_LEN)
        .map(|row| TelemetryRow {
            address: u16::from_le_bytes([row[0], row[1]]),
            value: [row[2], row[3]],
        })
        .filter(|row| row.address != EMPTY_ROW_ADDRESS)
}

pub(crate) fn require(command: Command, payload: &[u8], needed: usize) -> Result<(), PayloadError> {
    if payload.len() < needed {
        Err(PayloadError::TooShort {
            command,
            needed,
            available: payload.len(),
        })
    } else {
        Ok(())
    }
}
