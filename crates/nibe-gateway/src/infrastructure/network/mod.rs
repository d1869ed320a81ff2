//! Network infrastructure.
//!
//! - **`udp`** – the tokio UDP socket that implements the engine's
//!   `Transport` trait.

pub mod udp;

pub use udp::{UdpTransport, UdpTransportError};
