//! RMU40 room-unit broadcast.
//!
//! The heat pump periodically sends every configured RMU40 (bus addresses
//! `0x19`..=`0x1C`, one per climate system S1..S4) a snapshot of the values it
//! displays.  Unlike telemetry rows these readings arrive already scaled and
//! are not tagged with register addresses, so [`RmuData::register_values`]
//! maps them onto the registers they mirror.
//!
//! | Offset | Field                                  |
//! |--------|----------------------------------------|
//! | 0      | BT1 outdoor temperature, s16 LE        |
//! | 2      | BT7 hot water top, s16 LE              |
//! | 4..8   | setpoint (u8) or offset (s8), S1..S4   |
//! | 8      | BT50 room temperature, s16 LE          |
//! | 10     | temporary lux                          |
//! | 11..13 | hot water time h:m                     |
//! | 13     | fan mode                               |
//! | 14     | operational mode                       |
//! | 15     | flags, u16 BE                          |
//! | 17..19 | clock h:m                              |
//! | 19     | alarm                                  |
//! | 20     | unknown                                |
//! | 21..23 | fan time h:m                           |

use serde::{Deserialize, Serialize};

use crate::protocol::command::Command;
use crate::protocol::payload::{require, PayloadError};

/// Bus address of the RMU40 serving climate system S1.
pub const RMU40_S1_ADDRESS: u16 = 0x0019;

const RMU_PAYLOAD_LEN: usize = 23;

/// Operational mode value meaning "manual" (register 47137).
const OPERATIONAL_MODE_MANUAL: u8 = 1;

/// Flag word of an RMU broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmuFlags(pub u16);

impl RmuFlags {
    const HW_PRODUCTION: u16 = 0x0001;
    const USE_ROOM_SENSOR_S1: u16 = 0x0010;
    const ALLOW_ADDITIVE_HEATING: u16 = 0x0100;
    const ALLOW_HEATING: u16 = 0x0200;
    const ALLOW_COOLING: u16 = 0x0400;

    /// Whether climate system `system` (0 = S1 .. 3 = S4) is controlled by a
    /// room sensor, which turns its byte into a setpoint instead of an offset.
    pub fn use_room_sensor(self, system: usize) -> bool {
        system < 4 && self.0 & (Self::USE_ROOM_SENSOR_S1 << system) != 0
    }

    pub fn hw_production(self) -> bool {
        self.0 & Self::HW_PRODUCTION != 0
    }

    pub fn allow_additive_heating(self) -> bool {
        self.0 & Self::ALLOW_ADDITIVE_HEATING != 0
    }

    pub fn allow_heating(self) -> bool {
        self.0 & Self::ALLOW_HEATING != 0
    }

    pub fn allow_cooling(self) -> bool {
        self.0 & Self::ALLOW_COOLING != 0
    }
}

/// Decoded [`Command::RmuData`] payload.  Temperatures are in °C.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RmuData {
    pub flags: RmuFlags,
    pub outdoor_temperature: f64,
    pub hot_water_top: f64,
    /// Room setpoint (room sensor in use) or curve offset, per S1..S4.
    pub setpoint_or_offset: [f64; 4],
    pub room_temperature: f64,
    pub temporary_lux: u8,
    pub hot_water_time: (u8, u8),
    pub fan_mode: u8,
    pub operational_mode: u8,
    pub clock: (u8, u8),
    pub alarm: u8,
    pub fan_time: (u8, u8),
}

impl RmuData {
    /// Parses an RMU broadcast payload.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError::TooShort`] for fewer than 23 bytes.
    pub fn parse(payload: &[u8]) -> Result<Self, PayloadError> {
        require(Command::RmuData, payload, RMU_PAYLOAD_LEN)?;

        let flags = RmuFlags(u16::from_be_bytes([payload[15], payload[16]]));
        let temperature = |at: usize| (i16::from_le_bytes([payload[at], payload[at + 1]]) as f64 - 5.0) / 10.0;
        let setpoint_or_offset = std::array::from_fn(|system| {
            let byte = payload[4 + system];
            if flags.use_room_sensor(system) {
                (byte as f64 + 50.0) / 10.0
            } else {
                byte as i8 as f64 / 10.0
            }
        });

        Ok(Self {
            flags,
            outdoor_temperature: temperature(0),
            hot_water_top: temperature(2),
            setpoint_or_offset,
            room_temperature: temperature(8),
            temporary_lux: payload[10],
            hot_water_time: (payload[11], payload[12]),
            fan_mode: payload[13],
            operational_mode: payload[14],
            clock: (payload[17], payload[18]),
            alarm: payload[19],
            fan_time: (payload[21], payload[22]),
        })
    }

    /// The `(register, scaled value)` pairs this broadcast carries for the
    /// room unit at `bus_address`.
    ///
    /// Flags are reported as `0.0`/`1.0`.  The per-system room temperature is
    /// only included for the four RMU40 addresses.
    pub fn register_values(&self, bus_address: u16) -> Vec<(u16, f64)> {
        let flag = |on: bool| if on { 1.0 } else { 0.0 };
        let mut values = vec![(40004, self.outdoor_temperature), (40013, self.hot_water_top)];

        for (system, &value) in self.setpoint_or_offset.iter().enumerate() {
            let register = if self.flags.use_room_sensor(system) {
                47398 - system as u16
            } else {
                47011 - system as u16
            };
            values.push((register, value));
        }

        if self.operational_mode == OPERATIONAL_MODE_MANUAL {
            values.push((47370, flag(self.flags.allow_additive_heating())));
            values.push((47371, flag(self.flags.allow_heating())));
            values.push((47372, flag(self.flags.allow_cooling())));
        }

        values.push((48132, self.temporary_lux as f64));
        values.push((45001, self.alarm as f64));
        values.push((47137, self.operational_mode as f64));
        values.push((47387, flag(self.flags.hw_production())));

        if let Some(register) = room_temperature_register(bus_address) {
            values.push((register, self.room_temperature));
        }
        values
    }
}

/// Room temperature register (BT50) mirrored by the RMU40 at `bus_address`:
/// S1 → 40033 down to S4 → 40030.
pub fn room_temperature_register(bus_address: u16) -> Option<u16> {
    let system = bus_address.checked_sub(RMU40_S1_ADDRESS)?;
    (system < 4).then(|| 40033 - system)
}
