//! Binary codec for gateway frames.
//!
//! Frames travelling from the heat pump's bus to the host:
//! ```text
//! [0x5C][address:2 BE][command:1][length:1][payload:length][checksum:1]
//! ```
//! Any address, command or payload byte equal to `0x5C` is doubled on the
//! wire, and `length` counts the doubled (on-wire) payload bytes.  The
//! checksum is the XOR of every on-wire byte from the address through the
//! payload; a checksum that would equal `0x5C` is sent as `0xC5`.
//!
//! Frames sent from the host to the gateway are simpler and never escaped:
//! ```text
//! [0xC0][command:1][length:1][payload:length][checksum:1]
//! ```
//! with the checksum taken over the start byte through the payload.
//!
//! # Resynchronisation
//!
//! A UDP datagram may carry more than one bus frame, and bus noise can
//! corrupt any of them.  [`decode_all`] therefore walks the buffer looking for
//! start markers and reports each corrupt frame as an individual error before
//! carrying on, so a single bad frame never hides the good frames behind it.

use std::iter::FusedIterator;

use thiserror::Error;

use crate::protocol::command::{Command, CHECKSUM_SUBSTITUTE, REQUEST_START, START_MARKER};

/// Errors that can occur while encoding or decoding a frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer ends before the frame does.
    #[error("truncated frame: need {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// The first byte is not the expected start byte.
    #[error("expected start byte 0x{expected:02X}, found 0x{found:02X}")]
    MissingStartMarker { expected: u8, found: u8 },

    /// A lone `0x5C` appeared where an escaped header byte was expected.
    #[error("unpaired 0x5C inside frame header at offset {offset}")]
    BadEscape { offset: usize },

    /// The checksum carried by the frame does not match its contents.
    #[error("checksum mismatch: frame carries 0x{carried:02X}, computed 0x{computed:02X}")]
    ChecksumMismatch { carried: u8, computed: u8 },

    /// The (escaped) payload does not fit the one-byte length field.
    #[error("payload of {len} bytes does not fit a single length byte")]
    PayloadTooLong { len: usize },

    /// A request frame's length byte disagrees with the bytes present.
    #[error("length byte says {declared}, frame carries {available}")]
    LengthMismatch { declared: usize, available: usize },
}

/// One frame parsed from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Bus address of the sender.
    pub address: u16,
    /// What the payload means.
    pub command: Command,
    /// Payload with escape bytes removed.
    pub payload: Vec<u8>,
    /// `false` when the carried checksum did not match.  Frames produced by
    /// [`decode_all`] always carry `true`; mismatches surface as errors.
    pub checksum_valid: bool,
}

impl Frame {
    /// Creates a frame with a valid checksum flag.
    pub fn new(address: u16, command: Command, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            command,
            payload: payload.into(),
            checksum_valid: true,
        }
    }

    /// Encodes this frame into its escaped on-wire form.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLong`] if the escaped payload exceeds 255 bytes.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        encode_frame(self.address, self.command, &self.payload)
    }
}

/// One request frame as sent from the host to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub command: Command,
    pub payload: Vec<u8>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// XOR checksum used by both frame directions, with the `0x5C → 0xC5`
/// substitution applied.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, b| acc ^ b);
    if sum == START_MARKER {
        CHECKSUM_SUBSTITUTE
    } else {
        sum
    }
}

/// Encodes a bus frame.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLong`] if the escaped payload exceeds 255 bytes.
///
/// # Examples
///
/// ```rust
/// use nibe_core::protocol::{decode_all, encode_frame, Command};
///
/// let bytes = encode_frame(0x0020, Command::WriteResponse, &[0x01]).unwrap();
/// assert_eq!(bytes, [0x5C, 0x00, 0x20, 0x6C, 0x01, 0x01, 0x4C]);
///
/// let frames: Vec<_> = decode_all(&bytes).collect();
/// assert_eq!(frames.len(), 1);
/// assert_eq!(frames[0].as_ref().unwrap().payload, vec![0x01]);
/// ```
pub fn encode_frame(address: u16, command: Command, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let escaped = escape(payload);
    let len = u8::try_from(escaped.len())
        .map_err(|_| FrameError::PayloadTooLong { len: escaped.len() })?;

    let mut buf = Vec::with_capacity(escaped.len() + 9);
    buf.push(START_MARKER);
    for byte in address.to_be_bytes() {
        push_escaped(&mut buf, byte);
    }
    push_escaped(&mut buf, command.code());
    buf.push(len);
    buf.extend_from_slice(&escaped);

    let sum = checksum(&buf[1..]);
    buf.push(sum);
    Ok(buf)
}

/// Returns a lazy iterator over every frame found in `buffer`.
///
/// Bytes before the first start marker are skipped silently.  Each frame that
/// fails to parse yields one `Err` and scanning resumes at the next start
/// marker.
pub fn decode_all(buffer: &[u8]) -> Frames<'_> {
    Frames {
        buffer,
        position: 0,
    }
}

/// Encodes a host → gateway request frame.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLong`] if the payload exceeds 255 bytes.
///
/// # Examples
///
/// ```rust
/// use nibe_core::protocol::{encode_request, Command};
///
/// // Read request for register 43424 (0xA9A0, little-endian on the wire).
/// let bytes = encode_request(Command::ReadRequest, &[0xA0, 0xA9]).unwrap();
/// assert_eq!(bytes, [0xC0, 0x69, 0x02, 0xA0, 0xA9, 0xA2]);
/// ```
pub fn encode_request(command: Command, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len =
        u8::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLong { len: payload.len() })?;

    let mut buf = Vec::with_capacity(payload.len() + 4);
    buf.push(REQUEST_START);
    buf.push(command.code());
    buf.push(len);
    buf.extend_from_slice(payload);

    let sum = checksum(&buf);
    buf.push(sum);
    Ok(buf)
}

/// Decodes a single host → gateway request frame.
///
/// # Errors
///
/// Returns [`FrameError`] if the start byte, length or checksum is wrong.
pub fn decode_request(bytes: &[u8]) -> Result<RequestFrame, FrameError> {
    require_len(bytes, 4)?;
    if bytes[0] != REQUEST_START {
        return Err(FrameError::MissingStartMarker {
            expected: REQUEST_START,
            found: bytes[0],
        });
    }

    let declared = bytes[2] as usize;
    let available = bytes.len() - 4;
    if declared != available {
        return Err(FrameError::LengthMismatch { declared, available });
    }

    let body_end = 3 + declared;
    let carried = bytes[body_end];
    let computed = checksum(&bytes[..body_end]);
    if carried != computed {
        return Err(FrameError::ChecksumMismatch { carried, computed });
    }

    Ok(RequestFrame {
        command: Command::from(bytes[1]),
        payload: bytes[3..body_end].to_vec(),
    })
}

// ── Frame iterator ────────────────────────────────────────────────────────────

/// Iterator returned by [`decode_all`].
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = self.buffer.get(self.position..)?;
        let Some(offset) = rest.iter().position(|&b| b == START_MARKER) else {
            self.position = self.buffer.len();
            return None;
        };

        let start = self.position + offset;
        let (result, resume_at) = parse_frame_at(self.buffer, start);
        self.position = resume_at;
        Some(result)
    }
}

impl FusedIterator for Frames<'_> {}

/// Parses the frame whose start marker sits at `start`.
///
/// Returns the outcome together with the offset at which scanning resumes.
/// Any failure, a wrong checksum included, restarts the scan one byte after
/// the start marker: the length byte may be the corrupted one, so the bytes
/// it claims can belong to the next frame.
fn parse_frame_at(buf: &[u8], start: usize) -> (Result<Frame, FrameError>, usize) {
    let retry_from = start + 1;
    let mut cursor = start + 1;

    let header = (|| {
        let hi = read_escaped(buf, &mut cursor, start)?;
        let lo = read_escaped(buf, &mut cursor, start)?;
        let command = read_escaped(buf, &mut cursor, start)?;
        let len = read_plain(buf, &mut cursor, start)?;
        Ok((u16::from_be_bytes([hi, lo]), Command::from(command), len as usize))
    })();

    let (address, command, len) = match header {
        Ok(header) => header,
        Err(e) => return (Err(e), retry_from),
    };

    let payload_end = cursor + len;
    if buf.len() < payload_end + 1 {
        return (
            Err(FrameError::Truncated {
                needed: payload_end + 1 - start,
                available: buf.len() - start,
            }),
            retry_from,
        );
    }

    let carried = buf[payload_end];
    let computed = checksum(&buf[start + 1..payload_end]);
    let frame_end = payload_end + 1;

    if carried != computed {
        return (Err(FrameError::ChecksumMismatch { carried, computed }), retry_from);
    }

    let frame = Frame {
        address,
        command,
        payload: unescape(&buf[cursor..payload_end]),
        checksum_valid: true,
    };
    (Ok(frame), frame_end)
}

// ── Escape helpers ────────────────────────────────────────────────────────────

fn push_escaped(buf: &mut Vec<u8>, byte: u8) {
    buf.push(byte);
    if byte == START_MARKER {
        buf.push(START_MARKER);
    }
}

fn escape(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len() + 2);
    for &byte in bytes {
        push_escaped(&mut out, byte);
    }
    out
}

/// Collapses doubled `0x5C` pairs.  An unpaired marker is kept as-is.
fn unescape(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        out.push(bytes[i]);
        if bytes[i] == START_MARKER && bytes.get(i + 1) == Some(&START_MARKER) {
            i += 2;
        } else {
            i += 1;
        }
    }
    out
}

fn read_plain(buf: &[u8], cursor: &mut usize, start: usize) -> Result<u8, FrameError> {
    let byte = *buf.get(*cursor).ok_or(FrameError::Truncated {
        needed: *cursor + 1 - start,
        available: buf.len() - start,
    })?;
    *cursor += 1;
    Ok(byte)
}

fn read_escaped(buf: &[u8], cursor: &mut usize, start: usize) -> Result<u8, FrameError> {
    let offset = *cursor;
    let byte = read_plain(buf, cursor, start)?;
    if byte == START_MARKER {
        let pair = read_plain(buf, cursor, start)?;
        if pair != START_MARKER {
            return Err(FrameError::BadEscape { offset: offset - start });
        }
    }
    Ok(byte)
}

fn require_len(buf: &[u8], needed: usize) -> Result<(), FrameError> {
    if buf.len() < needed {
        Err(FrameError::Truncated {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
