//! Resend policy for requests the heat pump may never answer.
//!
//! UDP datagrams and RS485 frames are both lossy, so a request that gets no
//! response within `timeout` is sent again, byte for byte, up to
//! `max_retries` more times.

use std::time::Duration;

/// Per-attempt timeout used when nothing else is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Resends after the first attempt used when nothing else is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// How often and how patiently a request is (re)sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Resends after the first attempt.  `0` means a single attempt.
    pub max_retries: u32,
    /// How long each attempt waits for its response.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, timeout: Duration) -> Self {
        Self { max_retries, timeout }
    }

    /// Total number of times the frame is sent before giving up.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT)
    }
}
