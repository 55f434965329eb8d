//! CBOR-encoded control messages.
//!
//! Envelope headers are raw binary for cheap routing, but control payloads
//! use CBOR for type safety and forward compatibility. The `Payload` enum
//! covers the key exchange handshake and error reports. `Data` envelopes are
//! NOT represented here: their payload is raw AEAD ciphertext whose meaning
//! only exists after decryption.
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness). Round-trip encoding must produce identical values.

pub mod exchange;

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::{
    Envelope, EnvelopeHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All control payloads.
///
/// The payload type is determined by the `Opcode` in the envelope header, so
/// we serialize only the inner struct content (no variant tag in CBOR).
///
/// # Security
///
/// No Variant Tag: unlike typical Rust enum serialization, the variant
/// discriminator is not serialized. The header's opcode already identifies
/// the payload type, so an attacker cannot send mismatched opcode/payload
/// pairs without hitting a schema error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Open a key exchange.
    KeyRequest(exchange::KeyRequest),
    /// Responder's offered key batch.
    KeyOffer(exchange::KeyOffer),
    /// Initiator's acknowledgment with reciprocal batch.
    KeyAck(exchange::KeyAck),
    /// Responder's confirmation.
    KeyConfirm(exchange::KeyConfirm),
    /// Initiator's finalization.
    KeyCommit(exchange::KeyCommit),
    /// Structured error report.
    Error(ErrorInfo),
}

/// Error payload for error envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorInfo {
    /// Envelope was structurally invalid.
    pub const MALFORMED: u16 = 0x0001;
    /// Key exchange was rejected or failed.
    pub const EXCHANGE_FAILED: u16 = 0x0002;
    /// Peer has no key material for this relationship.
    pub const NO_KEYS: u16 = 0x0003;

    /// Create a malformed-envelope error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self { code: Self::MALFORMED, message: reason.into() }
    }

    /// Create an exchange-failed error.
    pub fn exchange_failed(reason: impl Into<String>) -> Self {
        Self { code: Self::EXCHANGE_FAILED, message: reason.into() }
    }

    /// Create a no-keys error.
    pub fn no_keys(reason: impl Into<String>) -> Self {
        Self { code: Self::NO_KEYS, message: reason.into() }
    }
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::KeyRequest(_) => Opcode::KeyRequest,
            Self::KeyOffer(_) => Opcode::KeyOffer,
            Self::KeyAck(_) => Opcode::KeyAck,
            Self::KeyConfirm(_) => Opcode::KeyConfirm,
            Self::KeyCommit(_) => Opcode::KeyCommit,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode payload content to a buffer.
    ///
    /// Serializes only the inner struct, NOT the variant tag; the envelope
    /// header's opcode identifies the payload type. CBOR encoding is
    /// deterministic, so the same payload always produces the same bytes.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::CborEncode`] if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::KeyRequest(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::KeyOffer(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::KeyAck(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::KeyConfirm(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::KeyCommit(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Error(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode payload content from bytes based on opcode.
    ///
    /// The size check happens BEFORE CBOR parsing begins, so the parser never
    /// sees inputs past the protocol limit. `Data` is rejected here: its
    /// payload is ciphertext, not CBOR, and decoding it as a control message
    /// would be a type confusion bug.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::PayloadTooLarge`] if bytes exceed the limit
    /// - [`ProtocolError::CborDecode`] if deserialization fails or the opcode
    ///   has no CBOR schema
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > EnvelopeHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: EnvelopeHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::KeyRequest => Self::KeyRequest(
                ciborium::de::from_reader(bytes)
                    .map_err(|e| ProtocolError::CborDecode(e.to_string()))?,
            ),
            Opcode::KeyOffer => Self::KeyOffer(
                ciborium::de::from_reader(bytes)
                    .map_err(|e| ProtocolError::CborDecode(e.to_string()))?,
            ),
            Opcode::KeyAck => Self::KeyAck(
                ciborium::de::from_reader(bytes)
                    .map_err(|e| ProtocolError::CborDecode(e.to_string()))?,
            ),
            Opcode::KeyConfirm => Self::KeyConfirm(
                ciborium::de::from_reader(bytes)
                    .map_err(|e| ProtocolError::CborDecode(e.to_string()))?,
            ),
            Opcode::KeyCommit => Self::KeyCommit(
                ciborium::de::from_reader(bytes)
                    .map_err(|e| ProtocolError::CborDecode(e.to_string()))?,
            ),
            Opcode::Error => Self::Error(
                ciborium::de::from_reader(bytes)
                    .map_err(|e| ProtocolError::CborDecode(e.to_string()))?,
            ),
            Opcode::Data => {
                return Err(ProtocolError::CborDecode(
                    "Data envelopes carry ciphertext, not a control payload".to_string(),
                ));
            },
        };

        Ok(payload)
    }

    /// Convert payload into a wire envelope.
    ///
    /// Encodes the payload to CBOR, forces the header's opcode to match the
    /// variant, and builds the envelope with automatic size calculation.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::CborEncode`] if serialization fails
    pub fn into_envelope(self, mut header: EnvelopeHeader) -> Result<Envelope> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;
        header.opcode = self.opcode().to_u8();
        Ok(Envelope::new(header, buf))
    }

    /// Parse payload from a raw wire envelope.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::UnknownOpcode`] if the header's opcode is
    ///   unrecognized
    /// - [`ProtocolError::CborDecode`] if deserialization fails
    /// - [`ProtocolError::PayloadTooLarge`] if the payload exceeds the limit
    pub fn from_envelope(envelope: &Envelope) -> Result<Self> {
        let opcode = envelope
            .header
            .opcode_enum()
            .ok_or(ProtocolError::UnknownOpcode(envelope.header.opcode()))?;
        Self::decode(opcode, &envelope.payload)
    }
}
