//! Keywell Wire Protocol
//!
//! Binary envelope format for the Keywell one-time-key messaging protocol.
//! An envelope is a fixed 128-byte header (raw binary, Big Endian) followed
//! by a variable payload:
//!
//! ```text
//! ┌─────────────────────────┬──────────────────────────────┐
//! │ EnvelopeHeader (128 B)  │ payload (variable)           │
//! │ magic/version/curve     │ Data    → AEAD ciphertext    │
//! │ opcode/flags/sizes      │ control → CBOR message       │
//! │ sender/stream           │                              │
//! │ recipient + ephemeral   │                              │
//! │ keys, AEAD nonce        │                              │
//! └─────────────────────────┴──────────────────────────────┘
//! ```
//!
//! # Design
//!
//! - Headers parse zero-copy ([`zerocopy`]) and are validated cheapest-first,
//!   so relays route envelopes without touching payloads.
//! - `Data` payloads are opaque ciphertext; only the two ends of a one-time
//!   pair can interpret them.
//! - Control payloads (key exchange, errors) are CBOR with no variant tag;
//!   the header opcode selects the schema.
//! - Key pairs are referenced on the wire exclusively by public key. Pool
//!   identifiers are process-local and never serialized into envelopes.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod envelope;
pub mod errors;
mod header;
mod opcode;
pub mod payloads;

pub use envelope::Envelope;
pub use errors::ProtocolError;
pub use header::EnvelopeHeader;
pub use opcode::{Curve, EnvelopeFlags, Opcode};
pub use payloads::{ErrorInfo, Payload};
