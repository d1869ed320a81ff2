//! Infrastructure layer: OS-facing adapters.
//!
//! Contains the UDP socket adapter and configuration file storage.  This
//! layer may depend on `application` and `nibe_core`, never the other way
//! round.

pub mod network;
pub mod storage;
