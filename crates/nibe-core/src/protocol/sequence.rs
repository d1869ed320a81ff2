//! Thread-safe counter that numbers outstanding gateway requests.
//!
//! NibeGW request frames carry no correlation id of their own, so the engine
//! stamps every pending read and write with a locally unique number.  The id
//! tells a request apart from a later request for the same register, so a
//! cancelled or timed-out caller only ever removes its own entry.

use std::sync::atomic::{AtomicU64, Ordering};

/// A lock-free, monotonically increasing request id source.
///
/// # Examples
///
/// ```rust
/// use nibe_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug, Default)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next id.  Wraps from `u64::MAX` to 0.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_increase_per_request() {
        let counter = SequenceCounter::new();

        let first = counter.next();
        let second = counter.next();

        assert_eq!(first, 0);
        assert!(second > first);
    }

    #[test]
    fn test_wraps_at_u64_max() {
        let counter = SequenceCounter {
            inner: AtomicU64::new(u64::MAX),
        };

        assert_eq!(counter.next(), u64::MAX);
        assert_eq!(counter.next(), 0);
    }
}
