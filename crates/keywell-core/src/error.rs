//! Error types for the Keywell core.
//!
//! Strongly-typed errors for different layers: pool mutation, snapshot
//! encoding, policy configuration, the crypto façade, and the persistence
//! contract.
//!
//! We avoid using `std::io::Error` for pool and crypto logic to maintain type
//! safety and enable proper error handling and recovery.

use thiserror::Error;

use crate::pool::KeyId;

/// Errors from key pool mutation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyPoolError {
    /// The id is not (or no longer) in the pool
    ///
    /// Removal is exactly-once: the second removal of an id reports this
    /// without touching pool state.
    #[error("key {id} not found in pool")]
    NotFound {
        /// Id that was requested
        id: KeyId,
    },
}

/// Errors from pool snapshot encoding/decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolCodecError {
    /// Snapshot format version is not supported
    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u8),

    /// Curve tag in the snapshot is unknown
    #[error("unknown curve tag: {0:#04x}")]
    UnknownCurve(u8),

    /// CBOR encoding failed
    #[error("snapshot encoding failed: {0}")]
    Encode(String),

    /// CBOR decoding failed
    #[error("snapshot decoding failed: {0}")]
    Decode(String),
}

/// Errors from replenishment policy configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    /// Watermarks must satisfy `0 < low < high <= 1`
    #[error("invalid watermarks: low {low}, high {high}")]
    InvalidWatermarks {
        /// Configured low watermark
        low: f64,
        /// Configured high watermark
        high: f64,
    },

    /// A zero batch size would make every regeneration a no-op
    #[error("max_batch must be positive")]
    ZeroBatch,
}

/// Errors from the stateless crypto façade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The local pool has no live pairs to consume
    #[error("no one-time keys available")]
    NoKeysAvailable,

    /// The envelope references key material this pool does not hold
    ///
    /// Expected on broadcast-style channels: the message was sealed for a
    /// different identity. Callers treat this as traffic noise, not a fault.
    #[error("no matching key for envelope")]
    NoMatchingKey,

    /// Underlying sealing/opening failure
    #[error("crypto error: {0}")]
    Crypto(#[from] keywell_crypto::OneTimeError),

    /// Envelope assembly or parsing failure
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ServiceError {
    /// Returns true if this error only means the message targets someone
    /// else.
    ///
    /// Sessions swallow these on the receive path instead of reporting them:
    /// on a shared channel, most envelopes are for other receivers.
    pub fn is_not_for_this_receiver(&self) -> bool {
        matches!(self, Self::NoMatchingKey)
    }
}

/// Convert keywell-proto errors to `ServiceError`
impl From<keywell_proto::ProtocolError> for ServiceError {
    fn from(err: keywell_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

/// Errors from the persistence collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store failed (I/O, connectivity, quota)
    #[error("store backend error: {0}")]
    Backend(String),

    /// Stored data exists but cannot be interpreted
    #[error("stored data corrupt: {0}")]
    Corrupt(String),
}

impl From<PoolCodecError> for StoreError {
    fn from(err: PoolCodecError) -> Self {
        Self::Corrupt(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn no_matching_key_is_not_for_this_receiver() {
        assert!(ServiceError::NoMatchingKey.is_not_for_this_receiver());
        assert!(!ServiceError::NoKeysAvailable.is_not_for_this_receiver());
        assert!(!ServiceError::Protocol("bad envelope".to_string()).is_not_for_this_receiver());
    }

    #[test]
    fn protocol_errors_convert() {
        let err: ServiceError = keywell_proto::ProtocolError::InvalidMagic.into();
        assert!(matches!(err, ServiceError::Protocol(_)));
    }

    #[test]
    fn codec_errors_surface_as_corrupt_store_data() {
        let err: StoreError = PoolCodecError::UnsupportedVersion(9).into();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }
}
