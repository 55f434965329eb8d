//! Envelope type combining header and payload.
//!
//! An `Envelope` is the transport-layer packet consisting of:
//! - 128-byte raw binary header (Big Endian)
//! - Variable-length raw bytes (AEAD ciphertext for `Data`, CBOR for control
//!   opcodes)
//!
//! This is a pure data holder (header + bytes). For the typed control
//! messages, see `Payload::into_envelope()` and `Payload::from_envelope()`.

use bytes::{BufMut, Bytes};

use crate::{
    EnvelopeHeader,
    errors::{ProtocolError, Result},
};

/// Complete wire envelope (transport layer).
///
/// Layout on the wire:
/// `[EnvelopeHeader: 128 bytes, raw binary] + [payload: variable bytes]`
///
/// Holds raw bytes, NOT decoded payloads. A relay can route envelopes by
/// header alone without touching the payload.
///
/// # Invariants
///
/// - Size Consistency: `payload.len()` MUST match `header.payload_size()`.
///   Enforced by [`Envelope::new`] and verified by [`Envelope::decode`].
///
/// - Size Limit: `payload.len()` MUST NOT exceed
///   [`EnvelopeHeader::MAX_PAYLOAD_SIZE`] (16 MB). Violations are rejected
///   during encoding and decoding.
///
/// # Security
///
/// Provides structural validity only. A decoded envelope has a well-formed
/// header and a payload of the claimed size; whether the payload
/// authenticates is decided later by the AEAD open (for `Data`) or CBOR
/// schema validation (for control opcodes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope header (128 bytes).
    pub header: EnvelopeHeader,

    /// Raw payload bytes.
    pub payload: Bytes,
}

impl Envelope {
    /// Create a new envelope with automatic `payload_size` calculation.
    ///
    /// The header's `payload_size` field is set to match the actual payload
    /// length, so a constructed envelope can never desynchronize header and
    /// body.
    ///
    /// Oversized payloads are NOT rejected here; [`Envelope::encode`] is the
    /// enforcement point, which keeps construction usable for negative tests.
    #[must_use]
    pub fn new(mut header: EnvelopeHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();

        // INVARIANT: Payload length always fits in u32 because Bytes is
        // bounded by isize::MAX and the protocol limit (16MB) is far below
        // u32::MAX.
        #[allow(clippy::expect_used)]
        let payload_len = u32::try_from(payload.len()).expect(
            "invariant: payload length fits in u32 (bounded by isize::MAX and protocol limit)",
        );

        header.payload_size = payload_len.to_be_bytes();

        debug_assert_eq!(header.payload_size(), payload_len);

        Self { header, payload }
    }

    /// Encode the envelope into a buffer.
    ///
    /// Writes: `[header (128 bytes)] + [payload (variable)]`
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::PayloadTooLarge`] if the payload exceeds
    ///   `MAX_PAYLOAD_SIZE` (16 MB). This is the enforcement point for the
    ///   limit; rejecting here prevents memory exhaustion on the peer.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        debug_assert_eq!(self.payload.len(), self.header.payload_size() as usize);

        if self.payload.len() > EnvelopeHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: self.payload.len(),
                max: EnvelopeHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);

        Ok(())
    }

    /// Encode the envelope into a fresh byte vector.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(EnvelopeHeader::SIZE + self.payload.len());
        self.encode(&mut buf)?;
        Ok(buf)
    }

    /// Decode an envelope from wire format.
    ///
    /// Returns an `Envelope` with raw bytes (does NOT deserialize the
    /// payload). Use `Payload::from_envelope()` for typed control messages.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` if header parsing fails (invalid magic, version,
    ///   curve, or size limits)
    /// - [`ProtocolError::EnvelopeTruncated`] if the buffer ends before the
    ///   payload the header claims
    ///
    /// # Security
    ///
    /// All validation happens before the payload is copied, so malformed
    /// headers are rejected without allocation. Exactly `payload_size` bytes
    /// are read; trailing bytes are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let header = EnvelopeHeader::from_bytes(bytes)?;

        let payload_size = header.payload_size() as usize;
        let total_size = EnvelopeHeader::SIZE.checked_add(payload_size).ok_or({
            ProtocolError::PayloadTooLarge {
                size: payload_size,
                max: EnvelopeHeader::MAX_PAYLOAD_SIZE as usize,
            }
        })?;

        debug_assert!(total_size >= EnvelopeHeader::SIZE);

        if bytes.len() < total_size {
            return Err(ProtocolError::EnvelopeTruncated {
                expected: payload_size,
                actual: bytes.len().saturating_sub(EnvelopeHeader::SIZE),
            });
        }

        // INVARIANT: The truncation check above proved
        // bytes.len() >= total_size, so this slice cannot be out of bounds.
        #[allow(clippy::expect_used)]
        let payload = Bytes::copy_from_slice(
            bytes.get(EnvelopeHeader::SIZE..total_size).expect("invariant: bounds checked above"),
        );

        debug_assert_eq!(payload.len(), payload_size);

        Ok(Self { header: *header, payload })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{Curve, Opcode};

    impl Arbitrary for Envelope {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with((): Self::Parameters) -> Self::Strategy {
            (any::<EnvelopeHeader>(), any::<Vec<u8>>())
                .prop_map(|(header, payload_bytes)| Self::new(header, payload_bytes))
                .boxed()
        }
    }

    proptest! {
        #[test]
        fn envelope_round_trip(envelope in any::<Envelope>()) {
            let mut wire = Vec::new();
            envelope.encode(&mut wire).expect("should encode");

            let parsed = Envelope::decode(&wire).expect("should decode");
            prop_assert_eq!(envelope.header, parsed.header);
            prop_assert_eq!(envelope.payload, parsed.payload);
        }
    }

    #[test]
    fn envelope_with_payload() {
        let mut header = EnvelopeHeader::new(Opcode::Data, Curve::X25519);
        header.set_sender(7);

        // payload_size set automatically
        let payload_bytes = vec![1, 2, 3, 4];
        let envelope = Envelope::new(header, payload_bytes.clone());
        assert_eq!(envelope.header.payload_size() as usize, payload_bytes.len());

        let wire = envelope.encode_to_vec().expect("should encode");
        let parsed = Envelope::decode(&wire).expect("should decode");
        assert_eq!(envelope.payload, parsed.payload);
        assert_eq!(parsed.header.sender(), 7);
    }

    #[test]
    fn trailing_bytes_ignored() {
        let header = EnvelopeHeader::new(Opcode::Data, Curve::X25519);
        let envelope = Envelope::new(header, vec![9u8; 16]);

        let mut wire = envelope.encode_to_vec().unwrap();
        wire.extend_from_slice(&[0xAA; 32]);

        let parsed = Envelope::decode(&wire).expect("should decode despite trailing bytes");
        assert_eq!(parsed.payload.len(), 16);
    }

    #[test]
    fn reject_truncated_envelope() {
        // Header claiming 100 bytes of payload, but no payload present
        let mut header = EnvelopeHeader::new(Opcode::Data, Curve::X25519);
        header.set_payload_size(100);

        let header_bytes = header.to_bytes();
        let result = Envelope::decode(&header_bytes);
        assert!(matches!(result, Err(ProtocolError::EnvelopeTruncated { .. })));
    }
}
