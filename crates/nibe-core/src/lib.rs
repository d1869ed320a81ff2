//! # nibe-core
//!
//! Pure codecs for talking to a NIBE heat pump through a NibeGW gateway.
//!
//! The gateway sits on the heat pump's RS485 bus and tunnels bus frames over
//! UDP.  This crate knows how those bytes look and what they mean, but never
//! touches a socket:
//!
//! - **`protocol`** – frame encoding and decoding (start marker, `0x5C`
//!   escaping, XOR checksum, resynchronisation past corrupt frames), payload
//!   layouts and the product announcement.
//!
//! - **`coil`** – register definitions, the immutable register catalog, and
//!   the conversion between raw little-endian register bytes and scaled or
//!   labelled application values.
//!
//! The `nibe-gateway` crate builds the UDP request/response engine on top.

pub mod coil;
pub mod protocol;

pub use coil::{CatalogError, CoilData, CoilError, CoilValue, Encoding, RegisterCatalog, RegisterDefinition};
pub use protocol::{decode_all, encode_frame, encode_request, Command, Frame, FrameError, ProductInfo};
