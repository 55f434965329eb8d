//! Keywell key management core.
//!
//! Pure state and logic for one-time-key encryption between peers: the
//! capacity-bounded [`KeyPool`], the watermark [`ReplenishPolicy`] that
//! schedules regeneration, and the stateless [`service`] functions that
//! seal, open, and rewrap envelopes against a pool.
//!
//! # Architecture
//!
//! Everything here is Sans-IO. Functions take an [`Environment`] when they
//! need randomness or time, mutate nothing but the pool handed to them, and
//! report which pair they consumed instead of retiring it themselves. The
//! session crate owns the pool, executes persistence through
//! [`store::KeyPoolStore`], and is the only writer.
//!
//! # Components
//!
//! - [`KeyPool`]: ordered, capacity-bounded set of single-use key pairs
//! - [`ReplenishPolicy`]: watermark plan for regenerating consumed pairs
//! - [`service`]: encrypt/decrypt/rewrap against a pool, without mutating it
//! - [`store`]: persistence boundary and the in-memory backend
//! - [`env`]: time and randomness abstraction with a deterministic mock

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
mod error;
mod policy;
mod pool;
pub mod service;
pub mod store;

/// Stable identifier of a local identity or a remote peer.
pub type PeerId = u64;

/// Identifier of a shared stream whose ends mirror one pool.
pub type StreamId = u128;

pub use env::Environment;
pub use error::{KeyPoolError, PolicyError, PoolCodecError, ServiceError, StoreError};
pub use policy::{RegenerationPlan, ReplenishPolicy};
pub use pool::{KeyId, KeyPool};
pub use service::{AccessScope, RewrapRequest, RewrappedKey};
pub use store::{Identity, KeyPoolStore, MemoryStore, SentRecord, StoredPool};
