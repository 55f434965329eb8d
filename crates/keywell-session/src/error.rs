//! Session error types.

use keywell_core::{PeerId, StoreError, StreamId};
use thiserror::Error;

use crate::exchange::ExchangeError;
use crate::transport::TransportError;

/// Errors surfaced by session operations.
///
/// `MessageNotForThisReceiver` is flow control, not a failure: envelopes
/// sealed for another identity are expected traffic on a broadcast link, and
/// the receive path swallows them after a debug log. Command errors come
/// back on the caller's `Result`; receive-path and action-executor failures
/// surface as `ErrorOccurred` notices instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// An operation addressed the local identity or an unusable identity.
    #[error("invalid identity: {reason}")]
    InvalidIdentity {
        /// What made the identity unusable.
        reason: String,
    },

    /// Stream id is reserved or out of range.
    #[error("invalid stream id {stream:#x}")]
    InvalidStream {
        /// The rejected stream id.
        stream: StreamId,
    },

    /// No one-time key material is available for the operation.
    #[error("no one-time keys available")]
    KeyPoolUnavailable,

    /// Sealing a message failed.
    #[error("encryption failed: {reason}")]
    EncryptionFailed {
        /// Underlying crypto failure.
        reason: String,
    },

    /// Opening a message failed after the key was located.
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Underlying crypto failure.
        reason: String,
    },

    /// The transport link is not in a usable state.
    #[error("peer connection failed: {reason}")]
    PeerConnectionFailed {
        /// What went wrong with the link.
        reason: String,
    },

    /// Saving or loading durable state failed.
    #[error("persistence failed: {reason}")]
    PersistenceFailed {
        /// Backend failure description.
        reason: String,
    },

    /// A key pool or key exchange operation failed.
    #[error("key management failed: {reason}")]
    KeyManagementFailed {
        /// What the operation could not do.
        reason: String,
    },

    /// The addressed peer is not connected or not known.
    #[error("peer {peer} not found")]
    PeerNotFound {
        /// The missing peer.
        peer: PeerId,
    },

    /// Plaintext exceeds the configured per-message limit.
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge {
        /// Offered plaintext size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// The envelope references key material this identity never held.
    #[error("message is not addressed to this receiver")]
    MessageNotForThisReceiver,

    /// Bytes from the transport did not decode into an envelope.
    #[error("malformed envelope: {reason}")]
    MalformedEnvelope {
        /// Decode failure description.
        reason: String,
    },
}

impl From<ExchangeError> for SessionError {
    fn from(e: ExchangeError) -> Self {
        Self::KeyManagementFailed { reason: e.to_string() }
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        Self::PersistenceFailed { reason: e.to_string() }
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        Self::PeerConnectionFailed { reason: e.to_string() }
    }
}
