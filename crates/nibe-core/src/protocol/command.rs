//! Command codes carried in the fourth byte of every gateway frame.
//!
//! The gateway forwards frames from the heat pump's RS485 bus verbatim, so the
//! command byte is the only thing that tells us how to interpret a payload.
//! Only the subset of commands the engine acts on gets its own variant; every
//! other code is preserved in [`Command::Unrecognized`] so that diagnostics
//! can still print it.

use serde::{Deserialize, Serialize};

// ── Wire constants ────────────────────────────────────────────────────────────

/// Start marker of frames travelling from the bus to the host.
pub const START_MARKER: u8 = 0x5C;

/// Start byte of request frames sent from the host to the gateway.
pub const REQUEST_START: u8 = 0xC0;

/// Value transmitted instead of a checksum that would collide with [`START_MARKER`].
pub const CHECKSUM_SUBSTITUTE: u8 = 0xC5;

/// Bus address of the MODBUS40 accessory the gateway impersonates.
pub const MODBUS40_ADDRESS: u16 = 0x0020;

// ── Command codes ─────────────────────────────────────────────────────────────

/// Frame command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Periodic bus broadcast carrying up to twenty `(address, value)` rows.
    Telemetry,
    /// Host asks for one register value.
    ReadRequest,
    /// Heat pump answers a [`Command::ReadRequest`].
    ReadResponse,
    /// Host asks the heat pump to store one register value.
    WriteRequest,
    /// Heat pump acknowledges (or rejects) a [`Command::WriteRequest`].
    WriteResponse,
    /// Periodic model / firmware announcement.
    ProductInfo,
    /// Periodic RMU40 room-unit broadcast with already scaled readings.
    RmuData,
    /// Any other command code seen on the bus.
    Unrecognized(u8),
}

impl Command {
    pub const TELEMETRY: u8 = 0x68;
    pub const READ_REQUEST: u8 = 0x69;
    pub const READ_RESPONSE: u8 = 0x6A;
    pub const WRITE_REQUEST: u8 = 0x6B;
    pub const WRITE_RESPONSE: u8 = 0x6C;
    pub const PRODUCT_INFO: u8 = 0x6D;
    pub const RMU_DATA: u8 = 0x62;

    /// Returns the byte written on the wire for this command.
    pub fn code(self) -> u8 {
        match self {
            Command::Telemetry => Self::TELEMETRY,
            Command::ReadRequest => Self::READ_REQUEST,
            Command::ReadResponse => Self::READ_RESPONSE,
            Command::WriteRequest => Self::WRITE_REQUEST,
            Command::WriteResponse => Self::WRITE_RESPONSE,
            Command::ProductInfo => Self::PRODUCT_INFO,
            Command::RmuData => Self::RMU_DATA,
            Command::Unrecognized(code) => code,
        }
    }
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        match value {
            Self::TELEMETRY => Command::Telemetry,
            Self::READ_REQUEST => Command::ReadRequest,
            Self::READ_RESPONSE => Command::ReadResponse,
            Self::WRITE_REQUEST => Command::WriteRequest,
            Self::WRITE_RESPONSE => Command::WriteResponse,
            Self::PRODUCT_INFO => Command::ProductInfo,
            Self::RMU_DATA => Command::RmuData,
            other => Command::Unrecognized(other),
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Telemetry => f.write_str("telemetry"),
            Command::ReadRequest => f.write_str("read-request"),
            Command::ReadResponse => f.write_str("read-response"),
            Command::WriteRequest => f.write_str("write-request"),
            Command::WriteResponse => f.write_str("write-response"),
            Command::ProductInfo => f.write_str("product-info"),
            Command::RmuData => f.write_str("rmu-data"),
            Command::Unrecognized(code) => write!(f, "unrecognized(0x{code:02X})"),
        }
    }
}
