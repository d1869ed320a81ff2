//! Immutable register lookup built once at start-up.

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::debug;

use crate::coil::definition::{Encoding, RegisterDefinition};

/// Problems found while building a [`RegisterCatalog`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("register {address}: factor must be positive")]
    ZeroFactor { address: u16 },

    #[error("register {address}: min {min} is greater than max {max}")]
    InvertedBounds { address: u16, min: i64, max: i64 },

    #[error("register {address}: mapping key {key} does not fit {encoding}")]
    MappingKeyOutOfRange { address: u16, key: i64, encoding: Encoding },

    #[error("register {address}: mapped registers must use factor 1, not {factor}")]
    ScaledMapping { address: u16, factor: u32 },

    #[error("register {address} is defined twice")]
    DuplicateAddress { address: u16 },
}

/// Address-keyed collection of [`RegisterDefinition`]s.
///
/// Boolean registers declared only through `min = 0, max = 1` receive the
/// labels `OFF` / `ON`, so every boolean decodes to a label.
#[derive(Debug, Clone, Default)]
pub struct RegisterCatalog {
    registers: BTreeMap<u16, RegisterDefinition>,
    by_name: HashMap<String, u16>,
}

impl RegisterCatalog {
    /// Validates and indexes `definitions`.
    ///
    /// # Errors
    ///
    /// Returns the first [`CatalogError`] encountered.
    pub fn new(definitions: impl IntoIterator<Item = RegisterDefinition>) -> Result<Self, CatalogError> {
        let mut registers = BTreeMap::new();
        let mut by_name = HashMap::new();

        for mut definition in definitions {
            definition.validate()?;

            if definition.is_boolean() && definition.mappings.is_none() {
                definition.mappings = Some(BTreeMap::from([(0, "OFF".to_owned()), (1, "ON".to_owned())]));
            }

            let address = definition.address;
            if registers.contains_key(&address) {
                return Err(CatalogError::DuplicateAddress { address });
            }
            by_name.insert(definition.name.clone(), address);
            registers.insert(address, definition);
        }

        debug!(registers = registers.len(), "register catalog built");
        Ok(Self { registers, by_name })
    }

    pub fn get(&self, address: u16) -> Option<&RegisterDefinition> {
        self.registers.get(&address)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&RegisterDefinition> {
        self.by_name.get(name).and_then(|address| self.registers.get(address))
    }

    pub fn contains(&self, address: u16) -> bool {
        self.registers.contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}
