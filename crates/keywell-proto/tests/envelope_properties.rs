//! Property-based tests for envelope encoding/decoding
//!
//! These tests verify that envelope serialization is correct for ALL valid
//! inputs, not just specific examples, and that malformed wire data is
//! rejected rather than misinterpreted.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use bytes::Bytes;
use keywell_proto::{Curve, Envelope, EnvelopeFlags, EnvelopeHeader, Opcode, Payload, payloads};
use proptest::prelude::*;

/// Strategy for generating arbitrary opcodes
fn arbitrary_opcode() -> impl Strategy<Value = Opcode> {
    prop_oneof![
        Just(Opcode::Data),
        Just(Opcode::KeyRequest),
        Just(Opcode::KeyOffer),
        Just(Opcode::KeyAck),
        Just(Opcode::KeyConfirm),
        Just(Opcode::KeyCommit),
        Just(Opcode::Error),
    ]
}

/// Strategy for generating arbitrary envelope headers
fn arbitrary_header() -> impl Strategy<Value = EnvelopeHeader> {
    (
        arbitrary_opcode(),
        any::<u64>(),       // sender
        any::<u128>(),      // stream
        any::<[u8; 32]>(),  // recipient key
        any::<[u8; 32]>(),  // ephemeral key
        any::<[u8; 24]>(),  // nonce
        any::<bool>(),      // direct flag
    )
        .prop_map(|(opcode, sender, stream, recipient, ephemeral, nonce, direct)| {
            let mut header = EnvelopeHeader::new(opcode, Curve::X25519);
            header.set_sender(sender);
            header.set_stream(stream);
            header.set_recipient_key(recipient);
            header.set_ephemeral_key(ephemeral);
            header.set_nonce(nonce);
            header.set_flags(EnvelopeFlags::default().with_direct(direct));
            header
        })
}

/// Strategy for generating arbitrary envelopes with payloads
fn arbitrary_envelope() -> impl Strategy<Value = Envelope> {
    (
        arbitrary_header(),
        prop::collection::vec(any::<u8>(), 0..1024), // payload up to 1KB
    )
        .prop_map(|(header, payload)| Envelope::new(header, Bytes::from(payload)))
}

#[test]
fn prop_envelope_encode_decode_roundtrip() {
    proptest!(|(envelope in arbitrary_envelope())| {
        let mut buf = Vec::new();
        envelope.encode(&mut buf).expect("encode should succeed");

        let decoded = Envelope::decode(&buf).expect("decode should succeed");

        // PROPERTY: Round-trip must be identity
        prop_assert_eq!(decoded.header, envelope.header, "Header mismatch after round-trip");
        prop_assert_eq!(decoded.payload, envelope.payload, "Payload mismatch after round-trip");
    });
}

#[test]
fn prop_header_fields_preserved() {
    proptest!(|(header in arbitrary_header())| {
        let bytes = header.to_bytes();
        let decoded = EnvelopeHeader::from_bytes(&bytes).expect("from_bytes should succeed");

        // PROPERTY: Every routing and crypto field survives serialization
        prop_assert_eq!(decoded.opcode(), header.opcode());
        prop_assert_eq!(decoded.sender(), header.sender());
        prop_assert_eq!(decoded.stream(), header.stream());
        prop_assert_eq!(decoded.recipient_key(), header.recipient_key());
        prop_assert_eq!(decoded.ephemeral_key(), header.ephemeral_key());
        prop_assert_eq!(decoded.nonce(), header.nonce());
        prop_assert_eq!(decoded.flags().is_direct(), header.flags().is_direct());
    });
}

#[test]
fn prop_encoded_size_correct() {
    proptest!(|(envelope in arbitrary_envelope())| {
        let mut buf = Vec::new();
        envelope.encode(&mut buf).expect("encode should succeed");

        // PROPERTY: Encoded size is exactly header + payload
        prop_assert_eq!(buf.len(), EnvelopeHeader::SIZE + envelope.payload.len());
    });
}

#[test]
fn prop_garbage_never_panics() {
    proptest!(|(bytes in prop::collection::vec(any::<u8>(), 0..512))| {
        // PROPERTY: Arbitrary bytes either decode cleanly or return an error;
        // they never panic. (The decode result itself is unconstrained: 512
        // random bytes can in principle form a valid envelope.)
        let _ = Envelope::decode(&bytes);
    });
}

#[test]
fn prop_truncation_rejected() {
    proptest!(|(
        envelope in arbitrary_envelope(),
        cut in 1usize..=64,
    )| {
        let mut wire = Vec::new();
        envelope.encode(&mut wire).expect("encode should succeed");

        prop_assume!(!envelope.payload.is_empty());
        let keep = wire.len() - cut.min(envelope.payload.len());

        // PROPERTY: Removing payload bytes makes decoding fail
        prop_assert!(Envelope::decode(&wire[..keep]).is_err());
    });
}

#[test]
fn prop_corrupted_magic_rejected() {
    proptest!(|(envelope in arbitrary_envelope(), corrupt_byte in 0usize..4)| {
        let mut wire = Vec::new();
        envelope.encode(&mut wire).expect("encode should succeed");

        wire[corrupt_byte] ^= 0xFF;

        // PROPERTY: A corrupted magic number never decodes
        prop_assert!(Envelope::decode(&wire).is_err());
    });
}

#[test]
fn prop_exchange_payload_roundtrip() {
    proptest!(|(
        exchange in any::<u64>(),
        count in 1u16..=256,
        key_count in 1usize..=8,
    )| {
        let request = Payload::KeyRequest(payloads::exchange::KeyRequest { exchange, count });
        let offer = Payload::KeyOffer(payloads::exchange::KeyOffer {
            exchange,
            keys: vec![[0xAB; 32]; key_count],
        });

        for payload in [request, offer] {
            let header = EnvelopeHeader::new(payload.opcode(), Curve::X25519);
            let envelope = payload.clone().into_envelope(header).expect("into_envelope");

            let mut wire = Vec::new();
            envelope.encode(&mut wire).expect("encode should succeed");
            let decoded = Envelope::decode(&wire).expect("decode should succeed");

            // PROPERTY: Typed payloads survive the full wire round trip
            prop_assert_eq!(Payload::from_envelope(&decoded).expect("payload"), payload);
        }
    });
}
