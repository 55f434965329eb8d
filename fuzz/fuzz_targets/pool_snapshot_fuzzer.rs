//! Fuzz target for key pool snapshot restore
//!
//! Snapshots hold key seeds and cross a storage boundary, so restore must
//! withstand corruption (MEDIUM priority)
//!
//! # Strategy
//!
//! - Raw bytes: Completely arbitrary snapshot data
//! - Truncation: Valid snapshots cut short at arbitrary points
//! - Bit flips: Valid snapshots with single corrupted bytes
//! - Double restore: The same snapshot restored twice, then re-encoded
//!
//! # Invariants
//!
//! - `from_bytes` NEVER panics, regardless of input
//! - A successfully restored pool satisfies `len() <= capacity()`
//! - Restoring the same snapshot twice yields equal pools
//! - Re-encoding a restored pool round-trips

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use keywell_core::{KeyPool, env::test_utils::MockEnv};
use keywell_proto::Curve;

#[derive(Debug, Clone, Arbitrary)]
enum SnapshotChaos {
    RawBytes { bytes: Vec<u8> },
    Truncated { seed: u64, keys: u8, cut: u16 },
    BitFlipped { seed: u64, keys: u8, index: u16, mask: u8 },
    DoubleRestore { seed: u64, keys: u8 },
}

fuzz_target!(|chaos: SnapshotChaos| {
    match chaos {
        SnapshotChaos::RawBytes { bytes } => {
            if let Ok(pool) = KeyPool::from_bytes(&bytes) {
                assert!(pool.len() <= pool.capacity());
            }
        }

        SnapshotChaos::Truncated { seed, keys, cut } => {
            let bytes = valid_snapshot(seed, keys);
            let cut = (cut as usize).min(bytes.len());
            let truncated = &bytes[..bytes.len() - cut];

            if let Ok(pool) = KeyPool::from_bytes(truncated) {
                assert!(pool.len() <= pool.capacity());
            }
        }

        SnapshotChaos::BitFlipped { seed, keys, index, mask } => {
            let mut bytes = valid_snapshot(seed, keys);
            if bytes.is_empty() {
                return;
            }
            let index = (index as usize) % bytes.len();
            bytes[index] ^= mask;

            if let Ok(pool) = KeyPool::from_bytes(&bytes) {
                assert!(pool.len() <= pool.capacity());
            }
        }

        SnapshotChaos::DoubleRestore { seed, keys } => {
            let bytes = valid_snapshot(seed, keys);

            let Ok(first) = KeyPool::from_bytes(&bytes) else { return };
            let Ok(second) = KeyPool::from_bytes(&bytes) else { return };
            assert_eq!(first, second);

            let Ok(reencoded) = first.to_bytes() else { return };
            let Ok(third) = KeyPool::from_bytes(&reencoded) else { return };
            assert_eq!(first, third);
        }
    }
});

fn valid_snapshot(seed: u64, keys: u8) -> Vec<u8> {
    let env = MockEnv::with_seed(seed);
    let mut pool = KeyPool::new(64, Curve::X25519);
    pool.generate((keys % 32) as usize, &env);
    pool.to_bytes().unwrap_or_default()
}
