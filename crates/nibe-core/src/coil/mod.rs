//! Register definitions, the register catalog and the value codec.

pub mod catalog;
pub mod codec;
pub mod definition;

pub use catalog::{CatalogError, RegisterCatalog};
pub use codec::{decode, encode, from_scaled, CoilError};
pub use definition::{CoilData, CoilValue, Encoding, RegisterDefinition};
