//! In-memory store backend.
//!
//! Keeps snapshots, the recipient directory, and the send audit in process
//! memory. Nothing survives a restart; production deployments implement
//! [`KeyPoolStore`] over real storage instead.

#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use super::{Identity, KeyPoolStore, SentRecord, StoredPool};
use crate::{PeerId, error::StoreError};

#[derive(Debug, Default)]
struct MemoryStoreInner {
    pools: HashMap<PeerId, StoredPool>,
    recipients: HashMap<u64, Identity>,
    sent: Vec<SentRecord>,
}

/// Process-local [`KeyPoolStore`].
///
/// Clones share the same maps, so a session under test and the harness
/// inspecting it observe identical state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a directory entry resolving `public_id` to a peer.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn insert_recipient(&self, public_id: u64, identity: Identity) {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.recipients.insert(public_id, identity);
    }

    /// Number of pool snapshots currently held.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn pool_count(&self) -> usize {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner.pools.len()
    }

    /// Copies out every send audit record, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[allow(clippy::expect_used)]
    pub fn sent_records(&self) -> Vec<SentRecord> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner.sent.clone()
    }
}

#[async_trait]
impl KeyPoolStore for MemoryStore {
    #[allow(clippy::expect_used)]
    async fn load_pool(&self, identity: PeerId) -> Result<Option<StoredPool>, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.pools.get(&identity).cloned())
    }

    #[allow(clippy::expect_used)]
    async fn save_pool(&self, identity: PeerId, pool: StoredPool) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.pools.insert(identity, pool);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn delete_pool(&self, identity: PeerId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.pools.remove(&identity);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn fetch_recipient(&self, public_id: u64) -> Result<Option<Identity>, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.recipients.get(&public_id).cloned())
    }

    #[allow(clippy::expect_used)]
    async fn record_sent(&self, record: SentRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.sent.push(record);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use keywell_proto::Curve;

    use super::*;

    fn sample_pool(marker: u8) -> StoredPool {
        StoredPool {
            bytes: vec![marker; 16],
            curve: Curve::X25519,
            capacity: 8192,
        }
    }

    #[tokio::test]
    async fn save_then_load_returns_latest_snapshot() {
        let store = MemoryStore::new();
        store.save_pool(7, sample_pool(1)).await.unwrap();
        store.save_pool(7, sample_pool(2)).await.unwrap();

        let loaded = store.load_pool(7).await.unwrap().unwrap();
        assert_eq!(loaded.bytes, vec![2; 16]);
        assert_eq!(store.pool_count(), 1);
    }

    #[tokio::test]
    async fn load_missing_pool_is_none() {
        let store = MemoryStore::new();
        assert!(store.load_pool(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_pool_is_idempotent() {
        let store = MemoryStore::new();
        store.save_pool(3, sample_pool(9)).await.unwrap();

        store.delete_pool(3).await.unwrap();
        store.delete_pool(3).await.unwrap();

        assert!(store.load_pool(3).await.unwrap().is_none());
        assert_eq!(store.pool_count(), 0);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryStore::new();
        let clone = store.clone();

        store.save_pool(1, sample_pool(4)).await.unwrap();

        assert_eq!(clone.pool_count(), 1);
    }

    #[tokio::test]
    async fn recipient_directory_round_trips() {
        let store = MemoryStore::new();
        store.insert_recipient(
            42,
            Identity {
                peer: 1001,
                display_name: "mirror-a".to_owned(),
            },
        );

        let found = store.fetch_recipient(42).await.unwrap().unwrap();
        assert_eq!(found.peer, 1001);
        assert!(store.fetch_recipient(43).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sent_records_accumulate_in_order() {
        let store = MemoryStore::new();
        for n in 0..3u64 {
            store
                .record_sent(SentRecord {
                    sender: 1,
                    scope: crate::service::AccessScope::Stream(0xAB),
                    key_hint: [n as u8; 8],
                    bytes: 100 + n,
                    at_unix_secs: 1_700_000_000 + n,
                })
                .await
                .unwrap();
        }

        let records = store.sent_records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].bytes, 100);
        assert_eq!(records[2].at_unix_secs, 1_700_000_002);
    }
}
