//! Protocol error types.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding wire envelopes.
///
/// Every variant describes a structural problem with untrusted input. None of
/// these are fatal to a session: the caller drops the offending envelope and
/// keeps reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Buffer is smaller than a complete envelope header.
    #[error("envelope too short: expected {expected} bytes, got {actual}")]
    EnvelopeTooShort {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes actually available.
        actual: usize,
    },

    /// Header magic does not identify a Keywell envelope.
    #[error("invalid magic number")]
    InvalidMagic,

    /// Header carries a protocol version this build does not speak.
    #[error("unsupported protocol version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// Header carries an unknown curve tag.
    #[error("unknown curve tag: {0:#04x}")]
    UnknownCurve(u8),

    /// Header carries an opcode this build does not recognize.
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Payload size claimed by the header exceeds the protocol limit.
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Claimed or actual payload size.
        size: usize,
        /// Maximum permitted payload size.
        max: usize,
    },

    /// Buffer ends before the payload the header claims.
    #[error("envelope truncated: header claims {expected} payload bytes, got {actual}")]
    EnvelopeTruncated {
        /// Payload bytes the header claims.
        expected: usize,
        /// Payload bytes actually present.
        actual: usize,
    },

    /// CBOR serialization failed.
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed or the payload does not match the opcode.
    #[error("CBOR decode error: {0}")]
    CborDecode(String),

    /// A payload field violates its documented bounds.
    #[error("payload bound violated: {0}")]
    BoundViolated(String),
}
