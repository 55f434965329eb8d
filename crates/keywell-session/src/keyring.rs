//! Per-peer ring of one-time public keys received through key exchange.
//!
//! Each key addresses exactly one message. [`RemoteKeyring::take_next`]
//! consumes in installation order so both sides burn through the batch
//! in the same sequence.

use std::collections::{HashSet, VecDeque};

/// Remaining keys at or below which the session warns that another
/// exchange is due.
pub const KEYRING_LOW_WATER: usize = 4;

/// FIFO ring of a peer's one-time public keys.
///
/// Keys arrive in batches from completed exchanges and leave one at a
/// time as direct messages are sealed. Duplicates across batches are
/// dropped so a replayed offer cannot inflate the ring.
#[derive(Debug, Default, Clone)]
pub struct RemoteKeyring {
    order: VecDeque<[u8; 32]>,
    live: HashSet<[u8; 32]>,
}

impl RemoteKeyring {
    /// Creates an empty keyring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a batch of keys, oldest first.
    ///
    /// Returns how many were actually added after dropping duplicates.
    pub fn install(&mut self, keys: &[[u8; 32]]) -> usize {
        let mut installed = 0;
        for key in keys {
            if self.live.insert(*key) {
                self.order.push_back(*key);
                installed += 1;
            }
        }
        installed
    }

    /// Consumes the oldest key.
    ///
    /// Returns `None` when the ring is drained. A taken key is gone for
    /// good, there is no way to put it back.
    pub fn take_next(&mut self) -> Option<[u8; 32]> {
        let key = self.order.pop_front()?;
        self.live.remove(&key);
        Some(key)
    }

    /// Remaining keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True when no keys remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key(tag: u8) -> [u8; 32] {
        [tag; 32]
    }

    #[test]
    fn install_reports_added_count() {
        let mut ring = RemoteKeyring::new();
        assert_eq!(ring.install(&[key(1), key(2), key(3)]), 3);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn install_drops_duplicates() {
        let mut ring = RemoteKeyring::new();
        ring.install(&[key(1), key(2)]);

        assert_eq!(ring.install(&[key(2), key(3)]), 1);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn take_next_is_fifo() {
        let mut ring = RemoteKeyring::new();
        ring.install(&[key(1), key(2), key(3)]);

        assert_eq!(ring.take_next(), Some(key(1)));
        assert_eq!(ring.take_next(), Some(key(2)));
        assert_eq!(ring.take_next(), Some(key(3)));
        assert_eq!(ring.take_next(), None);
    }

    #[test]
    fn taken_key_can_be_reinstalled() {
        let mut ring = RemoteKeyring::new();
        ring.install(&[key(7)]);
        ring.take_next().unwrap();

        assert_eq!(ring.install(&[key(7)]), 1);
        assert_eq!(ring.take_next(), Some(key(7)));
    }

    #[test]
    fn empty_ring_reports_empty() {
        let mut ring = RemoteKeyring::new();
        assert!(ring.is_empty());
        ring.install(&[key(9)]);
        assert!(!ring.is_empty());
    }
}
