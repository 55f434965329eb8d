//! Capacity-bounded pool of single-use key pairs.
//!
//! Each pair in the pool decrypts exactly one message. Pairs enter through
//! generation, leave through retirement, and survive restarts through CBOR
//! snapshots of their seeds.

use std::collections::{HashMap, VecDeque};

use keywell_crypto::OneTimeKeyPair;
use keywell_proto::Curve;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{
    env::Environment,
    error::{KeyPoolError, PoolCodecError},
};

/// Snapshot format version
const SNAPSHOT_VERSION: u8 = 1;

/// Local identifier of a pooled key pair.
///
/// Random 128-bit, unique for the lifetime of the process. Bookkeeping
/// only: envelopes reference pairs by public key, never by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(pub u128);

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Seed and derived public key of one live pair.
///
/// The secret scalar is re-derived from the seed on demand rather than held
/// resident.
struct PoolEntry {
    seed: [u8; 32],
    public: [u8; 32],
}

impl Drop for PoolEntry {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

/// Bounded set of single-use key pairs for one identity.
///
/// # Invariants
///
/// - `len() <= capacity()` after every operation, including restore
/// - An id present in the pool has never produced a ciphertext
/// - The public-key index and the insertion order always agree with the
///   entry map
/// - A retired id is never handed out again
pub struct KeyPool {
    curve: Curve,
    capacity: usize,
    /// Insertion order, oldest in front. May hold retired ids until the
    /// next mutation compacts them away; `entries` is authoritative.
    order: VecDeque<KeyId>,
    entries: HashMap<KeyId, PoolEntry>,
    by_public: HashMap<[u8; 32], KeyId>,
}

impl KeyPool {
    /// Create an empty pool. Capacity is fixed for the pool's lifetime.
    pub fn new(capacity: usize, curve: Curve) -> Self {
        Self {
            curve,
            capacity,
            order: VecDeque::new(),
            entries: HashMap::new(),
            by_public: HashMap::new(),
        }
    }

    /// Number of live pairs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no pairs are available.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of pairs this pool may hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Algorithm tag all pairs in this pool share.
    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// True if the id refers to a live pair.
    pub fn contains(&self, id: KeyId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Generate up to `count` fresh pairs, never exceeding capacity.
    ///
    /// Ids and seeds are drawn from the environment RNG; an id or public
    /// key colliding with a live entry is re-rolled. Returns the ids that
    /// were actually added, in insertion order.
    pub fn generate<E: Environment>(&mut self, count: usize, env: &E) -> Vec<KeyId> {
        let room = self.capacity.saturating_sub(self.len());
        let goal = count.min(room);

        let mut added = Vec::with_capacity(goal);
        while added.len() < goal {
            let id = KeyId(env.random_u128());
            if self.entries.contains_key(&id) {
                continue;
            }

            let mut seed = [0u8; 32];
            env.random_bytes(&mut seed);
            let public = OneTimeKeyPair::from_seed(seed).public_bytes();
            if self.by_public.contains_key(&public) {
                seed.zeroize();
                continue;
            }

            self.order.push_back(id);
            self.entries.insert(id, PoolEntry { seed, public });
            self.by_public.insert(public, id);
            added.push(id);
        }

        added
    }

    /// Retire a pair. Exactly-once: removing an id a second time fails with
    /// `NotFound` and changes nothing.
    pub fn remove(&mut self, id: KeyId) -> Result<(), KeyPoolError> {
        let entry = self.entries.remove(&id).ok_or(KeyPoolError::NotFound { id })?;
        self.by_public.remove(&entry.public);
        self.compact_front();
        Ok(())
    }

    /// Oldest live id, the one a send consumes next.
    pub fn first_id(&self) -> Option<KeyId> {
        self.order.iter().copied().find(|id| self.entries.contains_key(id))
    }

    /// Rebuild the key pair for a live id.
    pub fn get(&self, id: KeyId) -> Option<OneTimeKeyPair> {
        self.entries.get(&id).map(|entry| OneTimeKeyPair::from_seed(entry.seed))
    }

    /// Public key bytes of a live id.
    pub fn public_key(&self, id: KeyId) -> Option<[u8; 32]> {
        self.entries.get(&id).map(|entry| entry.public)
    }

    /// Locate a live pair by its public key bytes.
    ///
    /// The receive path resolves the envelope's recipient-key field through
    /// this index.
    pub fn find_by_public(&self, public: &[u8; 32]) -> Option<(KeyId, OneTimeKeyPair)> {
        let id = *self.by_public.get(public)?;
        let pair = self.get(id)?;
        Some((id, pair))
    }

    /// Serialize the pool to a CBOR snapshot.
    ///
    /// The snapshot holds the seeds of every live pair, so it is as
    /// sensitive as the pool itself.
    pub fn to_bytes(&self) -> Result<Vec<u8>, PoolCodecError> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            curve: self.curve.to_u8(),
            capacity: self.capacity as u64,
            entries: self
                .order
                .iter()
                .filter_map(|id| {
                    self.entries.get(id).map(|entry| SnapshotEntry { id: id.0, seed: entry.seed })
                })
                .collect(),
        };

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&snapshot, &mut bytes)
            .map_err(|e| PoolCodecError::Encode(e.to_string()))?;
        Ok(bytes)
    }

    /// Restore a pool from a CBOR snapshot.
    ///
    /// The snapshot's recorded capacity and curve become the pool's. A
    /// snapshot holding more entries than its capacity is truncated to the
    /// first `capacity` entries in recorded order; that is a recoverable
    /// data-integrity situation, not a protocol violation.
    ///
    /// # Errors
    ///
    /// - `UnsupportedVersion`: Snapshot written by an unknown format version
    /// - `UnknownCurve`: Curve tag not supported by this build
    /// - `Decode`: Malformed CBOR or duplicate ids
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PoolCodecError> {
        let snapshot: Snapshot = ciborium::de::from_reader(bytes)
            .map_err(|e| PoolCodecError::Decode(e.to_string()))?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PoolCodecError::UnsupportedVersion(snapshot.version));
        }
        let curve =
            Curve::from_u8(snapshot.curve).ok_or(PoolCodecError::UnknownCurve(snapshot.curve))?;

        let capacity = snapshot.capacity as usize;
        let mut pool = Self::new(capacity, curve);

        for entry in snapshot.entries.iter().take(capacity) {
            let id = KeyId(entry.id);
            if pool.entries.contains_key(&id) {
                return Err(PoolCodecError::Decode(format!("duplicate key id {id} in snapshot")));
            }

            let public = OneTimeKeyPair::from_seed(entry.seed).public_bytes();
            pool.order.push_back(id);
            pool.entries.insert(id, PoolEntry { seed: entry.seed, public });
            pool.by_public.insert(public, id);
        }

        Ok(pool)
    }

    /// Drop retired ids from the front of the order queue.
    ///
    /// Sends consume oldest-first, so the dead prefix stays short and
    /// `first_id` remains effectively O(1).
    fn compact_front(&mut self) {
        while let Some(id) = self.order.front() {
            if self.entries.contains_key(id) {
                break;
            }
            self.order.pop_front();
        }
    }
}

impl std::fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Seeds never appear in logs
        f.debug_struct("KeyPool")
            .field("curve", &self.curve)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

impl PartialEq for KeyPool {
    fn eq(&self, other: &Self) -> bool {
        self.curve == other.curve
            && self.capacity == other.capacity
            && self.live_entries().eq(other.live_entries())
    }
}

impl KeyPool {
    /// Live `(id, seed, public)` triples in insertion order.
    fn live_entries(&self) -> impl Iterator<Item = (KeyId, [u8; 32], [u8; 32])> + '_ {
        self.order.iter().filter_map(|id| {
            self.entries.get(id).map(|entry| (*id, entry.seed, entry.public))
        })
    }
}

/// On-disk snapshot layout. Serialized with CBOR.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u8,
    curve: u8,
    capacity: u64,
    entries: Vec<SnapshotEntry>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    id: u128,
    seed: [u8; 32],
}

impl Drop for SnapshotEntry {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::env::test_utils::MockEnv;

    fn pool_with(count: usize, capacity: usize) -> (KeyPool, Vec<KeyId>, MockEnv) {
        let env = MockEnv::with_seed(7);
        let mut pool = KeyPool::new(capacity, Curve::X25519);
        let ids = pool.generate(count, &env);
        (pool, ids, env)
    }

    #[test]
    fn new_pool_is_empty() {
        let pool = KeyPool::new(8192, Curve::X25519);

        assert_eq!(pool.len(), 0);
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(), 8192);
        assert_eq!(pool.curve(), Curve::X25519);
        assert_eq!(pool.first_id(), None);
    }

    #[test]
    fn generate_adds_requested_count() {
        let (pool, ids, _) = pool_with(10, 100);

        assert_eq!(ids.len(), 10);
        assert_eq!(pool.len(), 10);
        for id in &ids {
            assert!(pool.contains(*id));
        }
    }

    #[test]
    fn generate_never_exceeds_capacity() {
        let (mut pool, ids, env) = pool_with(8, 8);

        assert_eq!(ids.len(), 8);

        let extra = pool.generate(5, &env);
        assert!(extra.is_empty(), "full pool must not grow");
        assert_eq!(pool.len(), 8);
    }

    #[test]
    fn generate_clamps_to_remaining_room() {
        let (mut pool, _, env) = pool_with(6, 8);

        let added = pool.generate(5, &env);
        assert_eq!(added.len(), 2);
        assert_eq!(pool.len(), 8);
    }

    #[test]
    fn remove_is_exactly_once() {
        let (mut pool, ids, _) = pool_with(3, 10);

        pool.remove(ids[1]).unwrap();
        assert_eq!(pool.len(), 2);
        assert!(!pool.contains(ids[1]));

        let second = pool.remove(ids[1]);
        assert_eq!(second, Err(KeyPoolError::NotFound { id: ids[1] }));
        assert_eq!(pool.len(), 2, "failed removal must not change size");
    }

    #[test]
    fn first_id_follows_insertion_order() {
        let (mut pool, ids, _) = pool_with(3, 10);

        assert_eq!(pool.first_id(), Some(ids[0]));

        pool.remove(ids[0]).unwrap();
        assert_eq!(pool.first_id(), Some(ids[1]));

        // Removing out of order leaves the oldest survivor in front
        pool.remove(ids[2]).unwrap();
        assert_eq!(pool.first_id(), Some(ids[1]));
    }

    #[test]
    fn public_index_matches_entries() {
        let (mut pool, ids, _) = pool_with(4, 10);

        let public = pool.public_key(ids[2]).unwrap();
        let (found_id, pair) = pool.find_by_public(&public).unwrap();

        assert_eq!(found_id, ids[2]);
        assert_eq!(pair.public_bytes(), public);

        pool.remove(ids[2]).unwrap();
        assert!(pool.find_by_public(&public).is_none());
    }

    #[test]
    fn get_rebuilds_matching_pair() {
        let (pool, ids, _) = pool_with(1, 10);

        let pair = pool.get(ids[0]).unwrap();
        assert_eq!(pair.public_bytes(), pool.public_key(ids[0]).unwrap());
    }

    #[test]
    fn generated_ids_are_unique() {
        let (_, ids, _) = pool_with(100, 200);

        let mut seen = std::collections::HashSet::new();
        for id in ids {
            assert!(seen.insert(id), "duplicate id {id}");
        }
    }

    #[test]
    fn snapshot_roundtrip_preserves_pool() {
        let (mut pool, ids, _) = pool_with(5, 16);
        pool.remove(ids[1]).unwrap();

        let bytes = pool.to_bytes().unwrap();
        let restored = KeyPool::from_bytes(&bytes).unwrap();

        assert_eq!(restored, pool);
        assert_eq!(restored.capacity(), 16);
        assert_eq!(restored.curve(), Curve::X25519);
        assert_eq!(restored.first_id(), Some(ids[0]));
        assert!(restored.contains(ids[4]));
        assert!(!restored.contains(ids[1]));
    }

    #[test]
    fn empty_snapshot_restores_empty_pool() {
        let pool = KeyPool::new(64, Curve::X25519);

        let restored = KeyPool::from_bytes(&pool.to_bytes().unwrap()).unwrap();

        assert!(restored.is_empty());
        assert_eq!(restored.capacity(), 64);
    }

    #[test]
    fn oversize_snapshot_truncates_to_capacity() {
        // Forge a snapshot claiming capacity 3 but holding 5 entries
        let (pool, ids, _) = pool_with(5, 16);
        let mut snapshot: Snapshot =
            ciborium::de::from_reader(pool.to_bytes().unwrap().as_slice()).unwrap();
        snapshot.capacity = 3;

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&snapshot, &mut bytes).unwrap();

        let restored = KeyPool::from_bytes(&bytes).unwrap();
        assert_eq!(restored.capacity(), 3);
        assert_eq!(restored.len(), 3, "must keep exactly the first `capacity` entries");
        assert!(restored.contains(ids[0]));
        assert!(restored.contains(ids[2]));
        assert!(!restored.contains(ids[3]));
    }

    #[test]
    fn unsupported_snapshot_version_rejected() {
        let (pool, _, _) = pool_with(1, 4);
        let mut snapshot: Snapshot =
            ciborium::de::from_reader(pool.to_bytes().unwrap().as_slice()).unwrap();
        snapshot.version = 9;

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&snapshot, &mut bytes).unwrap();

        assert_eq!(KeyPool::from_bytes(&bytes), Err(PoolCodecError::UnsupportedVersion(9)));
    }

    #[test]
    fn unknown_curve_rejected() {
        let (pool, _, _) = pool_with(1, 4);
        let mut snapshot: Snapshot =
            ciborium::de::from_reader(pool.to_bytes().unwrap().as_slice()).unwrap();
        snapshot.curve = 0x7E;

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&snapshot, &mut bytes).unwrap();

        assert_eq!(KeyPool::from_bytes(&bytes), Err(PoolCodecError::UnknownCurve(0x7E)));
    }

    #[test]
    fn garbage_snapshot_rejected() {
        let result = KeyPool::from_bytes(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(matches!(result, Err(PoolCodecError::Decode(_))));
    }

    #[test]
    fn duplicate_id_in_snapshot_rejected() {
        let (pool, _, _) = pool_with(2, 4);
        let mut snapshot: Snapshot =
            ciborium::de::from_reader(pool.to_bytes().unwrap().as_slice()).unwrap();
        let first = SnapshotEntry { id: snapshot.entries[0].id, seed: snapshot.entries[0].seed };
        snapshot.entries.push(first);

        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&snapshot, &mut bytes).unwrap();

        assert!(matches!(KeyPool::from_bytes(&bytes), Err(PoolCodecError::Decode(_))));
    }

    #[test]
    fn debug_output_hides_seeds() {
        let (pool, _, _) = pool_with(2, 4);
        let rendered = format!("{pool:?}");

        assert!(rendered.contains("len"));
        assert!(!rendered.contains("seed"));
    }

    #[test]
    fn key_id_displays_as_lower_hex() {
        let id = KeyId(0xDEAD_BEEF);
        assert_eq!(id.to_string(), "000000000000000000000000deadbeef");
    }
}
