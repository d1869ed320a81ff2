//! Register metadata and decoded register values.
//!
//! A heat pump exposes its parameters as numbered registers ("coils").  Each
//! register stores a fixed-width integer; the [`RegisterDefinition`] says how
//! wide it is, how to scale it, and whether its integers stand for labels.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::coil::catalog::CatalogError;

/// Storage format of a register's raw value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
}

impl Encoding {
    /// Number of bytes the value occupies.
    pub fn width(self) -> usize {
        match self {
            Encoding::U8 | Encoding::S8 => 1,
            Encoding::U16 | Encoding::S16 => 2,
            Encoding::U32 | Encoding::S32 => 4,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, Encoding::S8 | Encoding::S16 | Encoding::S32)
    }

    /// Smallest representable raw value.
    pub fn min_value(self) -> i64 {
        match self {
            Encoding::U8 | Encoding::U16 | Encoding::U32 => 0,
            Encoding::S8 => i8::MIN as i64,
            Encoding::S16 => i16::MIN as i64,
            Encoding::S32 => i32::MIN as i64,
        }
    }

    /// Largest representable raw value.
    pub fn max_value(self) -> i64 {
        match self {
            Encoding::U8 => u8::MAX as i64,
            Encoding::S8 => i8::MAX as i64,
            Encoding::U16 => u16::MAX as i64,
            Encoding::S16 => i16::MAX as i64,
            Encoding::U32 => u32::MAX as i64,
            Encoding::S32 => i32::MAX as i64,
        }
    }

    /// Raw value the heat pump reports for a register that has no reading
    /// (sensor missing, accessory not installed).
    pub fn sentinel(self) -> i64 {
        if self.is_signed() {
            self.min_value()
        } else {
            self.max_value()
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Encoding::U8 => "u8",
            Encoding::S8 => "s8",
            Encoding::U16 => "u16",
            Encoding::S16 => "s16",
            Encoding::U32 => "u32",
            Encoding::S32 => "s32",
        };
        f.write_str(name)
    }
}

fn default_factor() -> u32 {
    1
}

/// Static description of one register.
///
/// Deserialises from the `[[registers]]` tables of the configuration file:
///
/// ```toml
/// [[registers]]
/// address = 43005
/// name = "operating-mode"
/// size = "u8"
/// mappings = { "0" = "Off", "1" = "On" }
/// write = true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDefinition {
    pub address: u16,
    pub name: String,
    #[serde(rename = "size")]
    pub encoding: Encoding,
    /// Divisor turning the raw integer into the application value.
    #[serde(default = "default_factor")]
    pub factor: u32,
    /// Lower raw bound, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    /// Upper raw bound, inclusive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Raw integer to label table, ordered by raw value.
    #[serde(default, with = "mapping_table", skip_serializing_if = "Option::is_none")]
    pub mappings: Option<BTreeMap<i64, String>>,
    #[serde(default, rename = "write")]
    pub writable: bool,
}

impl RegisterDefinition {
    /// Creates a read-only, unscaled, unbounded definition.
    pub fn new(address: u16, name: impl Into<String>, encoding: Encoding) -> Self {
        Self {
            address,
            name: name.into(),
            encoding,
            factor: 1,
            min: None,
            max: None,
            default: None,
            unit: None,
            mappings: None,
            writable: false,
        }
    }

    pub fn with_factor(mut self, factor: u32) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_bounds(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_mappings<L: Into<String>>(mut self, mappings: impl IntoIterator<Item = (i64, L)>) -> Self {
        self.mappings = Some(mappings.into_iter().map(|(k, v)| (k, v.into())).collect());
        self
    }

    pub fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// `true` for an unscaled register whose only values are 0 and 1.
    pub fn is_boolean(&self) -> bool {
        if self.factor != 1 {
            return false;
        }
        if self.min == Some(0) && self.max == Some(1) {
            return true;
        }
        self.mappings
            .as_ref()
            .is_some_and(|m| !m.is_empty() && m.keys().all(|k| *k == 0 || *k == 1))
    }

    /// Checks the definition's internal consistency.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] naming the first broken rule.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let address = self.address;

        if self.factor == 0 {
            return Err(CatalogError::ZeroFactor { address });
        }

        if let (Some(min), Some(max)) = (self.min, self.max) {
            if min > max {
                return Err(CatalogError::InvertedBounds { address, min, max });
            }
        }

        if let Some(mappings) = &self.mappings {
            if self.factor != 1 {
                return Err(CatalogError::ScaledMapping {
                    address,
                    factor: self.factor,
                });
            }
            let range = self.encoding.min_value()..=self.encoding.max_value();
            if let Some(key) = mappings.keys().find(|k| !range.contains(k)) {
                return Err(CatalogError::MappingKeyOutOfRange {
                    address,
                    key: *key,
                    encoding: self.encoding,
                });
            }
        }

        Ok(())
    }
}

/// An application-level register value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CoilValue {
    Number(f64),
    Label(String),
}

impl CoilValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CoilValue::Number(n) => Some(*n),
            CoilValue::Label(_) => None,
        }
    }

    pub fn as_label(&self) -> Option<&str> {
        match self {
            CoilValue::Number(_) => None,
            CoilValue::Label(label) => Some(label),
        }
    }
}

impl From<f64> for CoilValue {
    fn from(value: f64) -> Self {
        CoilValue::Number(value)
    }
}

impl From<i64> for CoilValue {
    fn from(value: i64) -> Self {
        CoilValue::Number(value as f64)
    }
}

impl From<&str> for CoilValue {
    fn from(value: &str) -> Self {
        CoilValue::Label(value.to_owned())
    }
}

impl From<String> for CoilValue {
    fn from(value: String) -> Self {
        CoilValue::Label(value)
    }
}

impl fmt::Display for CoilValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoilValue::Number(n) => write!(f, "{n}"),
            CoilValue::Label(label) => f.write_str(label),
        }
    }
}

/// A decoded register reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoilData {
    pub address: u16,
    pub value: CoilValue,
    /// The integer the value was derived from.
    pub raw: i64,
    /// `false` when the raw value was out of bounds, unmapped, or the
    /// encoding's "no reading" sentinel.
    pub validated: bool,
    pub timestamp: SystemTime,
}

impl fmt::Display for CoilData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.address, self.value)?;
        if !self.validated {
            f.write_str(" (unvalidated)")?;
        }
        Ok(())
    }
}

/// TOML keys are always strings, so mapping tables travel as
/// `{ "0" = "Off" }` and are converted to integer keys here.
mod mapping_table {
    use std::collections::BTreeMap;

    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<BTreeMap<i64, String>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(map) => serializer.collect_map(map.iter().map(|(k, v)| (k.to_string(), v))),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<BTreeMap<i64, String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(key, label)| {
                key.trim()
                    .parse::<i64>()
                    .map(|k| (k, label))
                    .map_err(|_| D::Error::custom(format!("mapping key {key:?} is not an integer")))
            })
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Some)
    }
}
