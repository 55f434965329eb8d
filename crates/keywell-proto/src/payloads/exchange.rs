//! Key exchange handshake payload types.
//!
//! Five messages carry a complete exchange. Each leg references the same
//! random `exchange` id so stray or replayed messages from an earlier attempt
//! are detectable. Key material in these payloads is PUBLIC keys only;
//! secrets never leave the pool that generated them.

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Largest number of one-time keys a single exchange may carry.
///
/// Bounds both the requested count and the offered/acked key lists. A peer
/// wanting more material runs additional exchanges.
pub const MAX_EXCHANGE_KEYS: usize = 256;

/// Open a key exchange.
///
/// # Protocol Flow
///
/// Sent by the initiator. Asks the responder to offer `count` of its one-time
/// public keys; the initiator will answer the offer with a reciprocal batch
/// of the same size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequest {
    /// Random id correlating all legs of this exchange attempt.
    pub exchange: u64,
    /// Number of one-time keys requested from the responder.
    pub count: u16,
}

impl KeyRequest {
    /// Validate documented bounds.
    pub fn validate(&self) -> Result<()> {
        if self.count == 0 || self.count as usize > MAX_EXCHANGE_KEYS {
            return Err(ProtocolError::BoundViolated(format!(
                "requested key count {} outside 1..={MAX_EXCHANGE_KEYS}",
                self.count
            )));
        }
        Ok(())
    }
}

/// Responder's offered batch of one-time public keys.
///
/// # Protocol Flow
///
/// Answers a `KeyRequest`. The initiator holds these keys pending and
/// installs them only when the exchange completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOffer {
    /// Exchange id from the originating request.
    pub exchange: u64,
    /// Offered one-time public keys (X25519, 32 bytes each).
    pub keys: Vec<[u8; 32]>,
}

impl KeyOffer {
    /// Validate documented bounds.
    pub fn validate(&self) -> Result<()> {
        validate_key_list("offer", &self.keys)
    }
}

/// Initiator acknowledges the offer and sends its reciprocal batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAck {
    /// Exchange id from the originating request.
    pub exchange: u64,
    /// Initiator's reciprocal one-time public keys.
    pub keys: Vec<[u8; 32]>,
}

impl KeyAck {
    /// Validate documented bounds.
    pub fn validate(&self) -> Result<()> {
        validate_key_list("ack", &self.keys)
    }
}

/// Responder confirms receipt of the reciprocal batch.
///
/// # Protocol Flow
///
/// Tells the initiator both batches have landed; the initiator answers with
/// `KeyCommit` to finalize. Neither side installs anything yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfirm {
    /// Exchange id from the originating request.
    pub exchange: u64,
    /// Number of keys the responder accepted from the ack.
    pub accepted: u16,
}

/// Initiator finalizes the exchange.
///
/// # Protocol Flow
///
/// On sending this, the initiator installs the offered keys; on receiving it,
/// the responder installs the acked keys. Installation happens at no other
/// point, so an interrupted exchange leaves both sides unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCommit {
    /// Exchange id from the originating request.
    pub exchange: u64,
}

fn validate_key_list(leg: &str, keys: &[[u8; 32]]) -> Result<()> {
    if keys.is_empty() || keys.len() > MAX_EXCHANGE_KEYS {
        return Err(ProtocolError::BoundViolated(format!(
            "{leg} carries {} keys, expected 1..={MAX_EXCHANGE_KEYS}",
            keys.len()
        )));
    }
    Ok(())
}
