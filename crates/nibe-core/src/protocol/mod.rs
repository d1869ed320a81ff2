//! Wire protocol spoken between the host and a NibeGW gateway.

pub mod command;
pub mod frame;
pub mod payload;
pub mod product;
pub mod rmu;
pub mod sequence;

pub use command::{Command, CHECKSUM_SUBSTITUTE, MODBUS40_ADDRESS, REQUEST_START, START_MARKER};
pub use frame::{
    checksum, decode_all, decode_request, encode_frame, encode_request, Frame, FrameError, Frames, RequestFrame,
};
pub use payload::{PayloadError, ReadResponse, TelemetryRow};
pub use product::ProductInfo;
pub use rmu::{RmuData, RmuFlags};
pub use sequence::SequenceCounter;
