//! Persistence boundary for pools, the recipient directory, and send audit.
//!
//! The session snapshots its pool through [`KeyPoolStore`] after every
//! mutation, so a crashed process restores the exact set of surviving pairs
//! and never re-uses one it already consumed. Implementations decide where
//! the bytes live; [`MemoryStore`] keeps them in process for tests and
//! short-lived tools.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{PeerId, error::StoreError, service::AccessScope};

/// A serialized pool together with the shape it must restore into.
///
/// `bytes` is the opaque snapshot produced by
/// [`KeyPool::to_bytes`](crate::KeyPool::to_bytes); `curve` and
/// `capacity` are duplicated outside it so a store can answer shape
/// questions without decoding key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPool {
    /// Versioned snapshot bytes.
    pub bytes: Vec<u8>,
    /// Curve every pair in the snapshot uses.
    pub curve: keywell_proto::Curve,
    /// Capacity the restored pool enforces.
    pub capacity: u64,
}

/// Directory record resolving a public identifier to a reachable peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Peer that owns the identifier.
    pub peer: PeerId,
    /// Human-readable name, for logs and UIs.
    pub display_name: String,
}

/// Audit entry for one outbound encryption.
///
/// Records which pair was consumed (by a truncated public-key hint, never
/// the key itself) so operators can reconcile pool drain against traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentRecord {
    /// Identity that sealed the message.
    pub sender: PeerId,
    /// Stream or direct scope the message targeted.
    pub scope: AccessScope,
    /// First eight bytes of the consumed recipient key.
    pub key_hint: [u8; 8],
    /// Ciphertext length in bytes.
    pub bytes: u64,
    /// Wall-clock send time, seconds since the Unix epoch.
    pub at_unix_secs: u64,
}

/// Storage operations the session needs.
///
/// Methods may suspend; implementations backed by disks or databases await
/// their I/O, and the in-memory one completes immediately. Errors are
/// surfaced to the caller and never retried here.
#[async_trait]
pub trait KeyPoolStore: Send + Sync + 'static {
    /// Loads the pool snapshot saved for `identity`, if one exists.
    async fn load_pool(&self, identity: PeerId) -> Result<Option<StoredPool>, StoreError>;

    /// Saves `pool` as the snapshot for `identity`, replacing any previous one.
    async fn save_pool(&self, identity: PeerId, pool: StoredPool) -> Result<(), StoreError>;

    /// Removes the snapshot for `identity`. Missing snapshots are not an error.
    async fn delete_pool(&self, identity: PeerId) -> Result<(), StoreError>;

    /// Resolves a public identifier to a peer, if the directory knows it.
    async fn fetch_recipient(&self, public_id: u64) -> Result<Option<Identity>, StoreError>;

    /// Appends one send audit record.
    async fn record_sent(&self, record: SentRecord) -> Result<(), StoreError>;
}
