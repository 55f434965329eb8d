//! Keywell Cryptographic Primitives
//!
//! Cryptographic building blocks for Keywell. Pure functions with
//! deterministic outputs. Callers provide random bytes for deterministic
//! testing.
//!
//! # Key Lifecycle
//!
//! Every message is sealed to a single-use X25519 key pair drawn from the
//! recipient's pool. The sender generates an ephemeral pair per message,
//! runs Diffie-Hellman against the one-time public key, and derives the
//! AEAD key through HKDF. Opening the message consumes the pair.
//!
//! ```text
//! One-Time Pair (pool)      Ephemeral Pair (per message)
//!         │                          │
//!         └───────── X25519 ─────────┘
//!                       │
//!                       ▼
//!               HKDF → Sealing Key
//!                       │
//!                       ▼
//!          AEAD Encryption → Ciphertext
//! ```
//!
//! The ephemeral public key and nonce travel with the ciphertext; the
//! ephemeral secret is discarded immediately after sealing, and the
//! one-time secret is destroyed after a single open.
//!
//! # Security
//!
//! Forward Secrecy:
//! - One pair per message: a compromised secret exposes one message
//! - Ephemeral sender keys: sealing leaves nothing to steal sender-side
//! - Consumed pairs are zeroized when dropped from the pool
//!
//! Authenticity:
//! - XChaCha20-Poly1305 AEAD provides tamper-proof encryption
//! - HKDF binds the sealing key to both public keys of the exchange
//! - Failed authentication tag -> reject message
//!
//! Key Hygiene:
//! - Contributory behavior is checked on every Diffie-Hellman result
//! - Secret material is zeroized on drop throughout

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod one_time;

pub use one_time::{
    OneTimeError, OneTimeKeyPair, Sealed, SealingKey, derive_sealing_key, open, rewrap, seal,
};
