//! Bookkeeping for requests that are waiting for the heat pump to answer.
//!
//! The engine keeps one [`PendingTable`] per direction (reads and writes), so
//! a table key is simply the register address.  Each key has at most one
//! entry at a time.  Callers for a key that is already in flight queue on the
//! key's gate, an async mutex that is held for the whole request/response
//! exchange.
//!
//! All methods are synchronous: the table lives behind a `std::sync::Mutex`
//! that is never held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::application::engine::GatewayError;

/// Channel half that completes a waiting caller.
pub type Completion<T> = oneshot::Sender<Result<T, GatewayError>>;

/// One outstanding request.
#[derive(Debug)]
pub struct PendingRequest<T> {
    /// Unique id; later requests for the same key get larger ids.
    pub id: u64,
    pub retries_remaining: u32,
    completion: Completion<T>,
}

impl<T> PendingRequest<T> {
    pub fn new(id: u64, retries_remaining: u32, completion: Completion<T>) -> Self {
        Self {
            id,
            retries_remaining,
            completion,
        }
    }

    fn complete(self, outcome: Result<T, GatewayError>) {
        // The receiver is gone when the caller was cancelled; nothing to do.
        let _ = self.completion.send(outcome);
    }
}

/// Outstanding requests of one direction, keyed by register address.
#[derive(Debug)]
pub struct PendingTable<T> {
    entries: HashMap<u16, PendingRequest<T>>,
    gates: HashMap<u16, Arc<AsyncMutex<()>>>,
}

impl<T> Default for PendingTable<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            gates: HashMap::new(),
        }
    }
}

impl<T> PendingTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the gate serialising callers of `address`.
    ///
    /// Gates are kept for the lifetime of the table; there is at most one per
    /// catalog register.
    pub fn gate(&mut self, address: u16) -> Arc<AsyncMutex<()>> {
        Arc::clone(self.gates.entry(address).or_default())
    }

    /// Registers `request`, returning any entry it displaced.
    pub fn insert(&mut self, address: u16, request: PendingRequest<T>) -> Option<PendingRequest<T>> {
        self.entries.insert(address, request)
    }

    /// Completes and removes the entry for `address`.  Returns `false` when
    /// nothing was waiting.
    pub fn resolve(&mut self, address: u16, outcome: Result<T, GatewayError>) -> bool {
        match self.entries.remove(&address) {
            Some(request) => {
                request.complete(outcome);
                true
            }
            None => false,
        }
    }

    /// Completes and removes the entry with the lowest id, i.e. the request
    /// that has been outstanding longest.  Returns its address.
    ///
    /// Write acknowledgements carry no address; the engine keeps at most one
    /// write outstanding, so the oldest entry is the only one.
    pub fn resolve_oldest(&mut self, outcome: impl FnOnce(u16) -> Result<T, GatewayError>) -> Option<u16> {
        let address = self
            .entries
            .iter()
            .min_by_key(|(_, request)| request.id)
            .map(|(address, _)| *address)?;

        let request = self.entries.remove(&address)?;
        request.complete(outcome(address));
        Some(address)
    }

    /// Uses up one retry of request `id`.
    ///
    /// Returns the retries left afterwards, or `None` when the request had
    /// none left or is no longer pending.
    pub fn schedule_retry(&mut self, address: u16, id: u64) -> Option<u32> {
        let request = self.entries.get_mut(&address).filter(|r| r.id == id)?;
        request.retries_remaining = request.retries_remaining.checked_sub(1)?;
        Some(request.retries_remaining)
    }

    /// Removes request `id` without completing it.  A newer request for the
    /// same address is left alone.
    pub fn remove(&mut self, address: u16, id: u64) -> Option<PendingRequest<T>> {
        if self.entries.get(&address).is_some_and(|r| r.id == id) {
            self.entries.remove(&address)
        } else {
            None
        }
    }

    /// Drops every entry.  Their callers observe a closed completion channel.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: u64, retries: u32) -> (PendingRequest<u32>, oneshot::Receiver<Result<u32, GatewayError>>) {
        let (tx, rx) = oneshot::channel();
        (PendingRequest::new(id, retries, tx), rx)
    }

    #[test]
    fn test_resolve_completes_and_removes() {
        // Arrange
        let mut table = PendingTable::new();
        let (req, mut rx) = request(1, 3);
        table.insert(40004, req);

        // Act
        let resolved = table.resolve(40004, Ok(7));

        // Assert
        assert!(resolved);
        assert!(matches!(rx.try_recv(), Ok(Ok(7))));
        assert!(!table.resolve(40004, Ok(8)));
    }

    #[test]
    fn test_resolve_unknown_address_is_noop() {
        let mut table: PendingTable<u32> = PendingTable::new();
        assert!(!table.resolve(1, Ok(0)));
    }

    #[test]
    fn test_resolve_oldest_picks_lowest_id() {
        // Arrange
        let mut table = PendingTable::new();
        let (newer, mut newer_rx) = request(9, 0);
        let (older, mut older_rx) = request(4, 0);
        table.insert(100, newer);
        table.insert(200, older);

        // Act
        let address = table.resolve_oldest(|address| Ok(address as u32));

        // Assert
        assert_eq!(address, Some(200));
        assert!(matches!(older_rx.try_recv(), Ok(Ok(200))));
        assert!(newer_rx.try_recv().is_err());
        assert!(table.resolve(100, Ok(0)));
    }

    #[test]
    fn test_resolve_oldest_on_empty_table() {
        let mut table: PendingTable<()> = PendingTable::new();

        assert_eq!(table.resolve_oldest(|_| Ok(())), None);
    }

    #[test]
    fn test_schedule_retry_consumes_budget() {
        // Arrange
        let mut table = PendingTable::new();
        let (req, _rx) = request(1, 1);
        table.insert(5, req);

        // Act / Assert
        assert_eq!(table.schedule_retry(5, 1), Some(0));
        assert_eq!(table.schedule_retry(5, 1), None);
    }

    #[test]
    fn test_schedule_retry_ignores_other_id() {
        let mut table = PendingTable::new();
        let (req, _rx) = request(2, 3);
        table.insert(5, req);

        assert_eq!(table.schedule_retry(5, 1), None);
        assert_eq!(table.schedule_retry(5, 2), Some(2));
    }

    #[test]
    fn test_remove_only_matching_id() {
        // Arrange
        let mut table = PendingTable::new();
        let (req, _rx) = request(2, 0);
        table.insert(5, req);

        // Act / Assert
        assert!(table.remove(5, 1).is_none());
        assert!(table.remove(5, 2).is_some());
        assert!(table.remove(5, 2).is_none());
    }

    #[test]
    fn test_clear_closes_completions() {
        let mut table = PendingTable::new();
        let (req, mut rx) = request(1, 0);
        table.insert(5, req);

        table.clear();

        assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
    }

    #[test]
    fn test_gate_is_shared_per_address() {
        let mut table: PendingTable<u32> = PendingTable::new();

        let a = table.gate(1);
        let b = table.gate(1);
        let c = table.gate(2);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
