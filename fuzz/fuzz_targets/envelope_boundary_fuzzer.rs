//! Fuzz target for envelope header boundary conditions
//!
//! Prevent DoS attacks via malformed envelope headers (HIGH priority)
//!
//! # Strategy
//!
//! - Magic bytes: Valid, off-by-one, all-zeros, all-ones, random
//! - Payload size: Zero, small, at-max, just-over-max, way-over-max, u32::MAX
//! - Version: Valid (0x01), zero, max, random
//! - Curve: Valid (0x01), zero, max, random
//! - Sender/stream: Boundary values (0, 1, MAX)
//!
//! # Invariants
//!
//! - `payload_size > MAX_PAYLOAD_SIZE` (16MB) MUST return
//!   `ProtocolError::PayloadTooLarge`
//! - Invalid magic bytes MUST return `ProtocolError::InvalidMagic`
//! - Unknown curve tags MUST return `ProtocolError::UnknownCurve`
//! - Unknown opcodes decode (parser valid) but `opcode_enum()` is `None`
//! - All decode errors MUST be structured (never panic)
//! - Encoded size MUST equal 128 + payload length

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use keywell_proto::{Curve, Envelope, EnvelopeFlags, EnvelopeHeader, Opcode};

const KEYWELL_MAGIC: [u8; 4] = [0x4B, 0x57, 0x45, 0x4C];
const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryEnvelope {
    magic: MagicBytes,
    version: VersionByte,
    curve: CurveByte,
    flags: u8,
    opcode: u8,
    payload_size: PayloadSize,
    sender: SenderId,
    stream: StreamValue,
    recipient_key: [u8; 32],
    nonce_fill: u8,
}

#[derive(Debug, Clone, Arbitrary)]
enum MagicBytes {
    Valid,
    OffByOne(u8),
    AllZeros,
    AllOnes,
    Random([u8; 4]),
}

#[derive(Debug, Clone, Arbitrary)]
enum VersionByte {
    Valid,
    Zero,
    Max,
    Random(u8),
}

#[derive(Debug, Clone, Arbitrary)]
enum CurveByte {
    Valid,
    Zero,
    Max,
    Random(u8),
}

#[derive(Debug, Clone, Arbitrary)]
enum PayloadSize {
    Zero,
    Small(u8),
    AtMaxBoundary,
    JustOverMax,
    WayOverMax,
    MaxU32,
    Random(u32),
}

#[derive(Debug, Clone, Arbitrary)]
enum SenderId {
    Zero,
    One,
    MaxU64,
    Random(u64),
}

#[derive(Debug, Clone, Arbitrary)]
enum StreamValue {
    Zero,
    One,
    MaxU128,
    Random(u128),
}

fuzz_target!(|boundary: BoundaryEnvelope| {
    let payload_size_value = match boundary.payload_size {
        PayloadSize::Zero => 0,
        PayloadSize::Small(s) => s as u32,
        PayloadSize::AtMaxBoundary => MAX_PAYLOAD_SIZE,
        PayloadSize::JustOverMax => MAX_PAYLOAD_SIZE.saturating_add(1),
        PayloadSize::WayOverMax => MAX_PAYLOAD_SIZE.saturating_add(1_000_000),
        PayloadSize::MaxU32 => u32::MAX,
        PayloadSize::Random(r) => r,
    };

    let actual_payload_size = payload_size_value.min(100_000) as usize;
    let mut buffer = vec![0u8; 128 + actual_payload_size];

    match boundary.magic {
        MagicBytes::Valid => buffer[0..4].copy_from_slice(&KEYWELL_MAGIC),
        MagicBytes::OffByOne(offset) => {
            buffer[0..4].copy_from_slice(&KEYWELL_MAGIC);
            let idx = (offset % 4) as usize;
            buffer[idx] = buffer[idx].wrapping_add(1);
        },
        MagicBytes::AllZeros => buffer[0..4].fill(0),
        MagicBytes::AllOnes => buffer[0..4].fill(0xFF),
        MagicBytes::Random(bytes) => buffer[0..4].copy_from_slice(&bytes),
    }

    let version_value: u8 = match boundary.version {
        VersionByte::Valid => 0x01,
        VersionByte::Zero => 0,
        VersionByte::Max => u8::MAX,
        VersionByte::Random(v) => v,
    };
    buffer[4] = version_value;

    let curve_value: u8 = match boundary.curve {
        CurveByte::Valid => 0x01,
        CurveByte::Zero => 0,
        CurveByte::Max => u8::MAX,
        CurveByte::Random(c) => c,
    };
    buffer[5] = curve_value;
    buffer[6] = boundary.flags;
    buffer[7] = boundary.opcode;
    buffer[8..12].copy_from_slice(&payload_size_value.to_be_bytes());

    let sender_value = match boundary.sender {
        SenderId::Zero => 0,
        SenderId::One => 1,
        SenderId::MaxU64 => u64::MAX,
        SenderId::Random(r) => r,
    };
    buffer[16..24].copy_from_slice(&sender_value.to_be_bytes());

    let stream_value = match boundary.stream {
        StreamValue::Zero => 0,
        StreamValue::One => 1,
        StreamValue::MaxU128 => u128::MAX,
        StreamValue::Random(r) => r,
    };
    buffer[24..40].copy_from_slice(&stream_value.to_be_bytes());
    buffer[40..72].copy_from_slice(&boundary.recipient_key);
    buffer[104..128].fill(boundary.nonce_fill);

    match Envelope::decode(&buffer) {
        Ok(envelope) => {
            assert_eq!(buffer[0..4], KEYWELL_MAGIC);
            assert_eq!(version_value, 0x01);
            assert!(Curve::from_u8(curve_value).is_some());
            assert!(payload_size_value <= MAX_PAYLOAD_SIZE);

            let _ = envelope.header.opcode_enum();
            let _ = envelope.header.flags();
            let _ = envelope.header.sender();
            let _ = envelope.header.stream();
            let _ = envelope.header.recipient_key();
            let _ = envelope.header.ephemeral_key();
            let _ = envelope.header.nonce();
            assert_eq!(envelope.payload.len(), envelope.header.payload_size() as usize);
        },
        Err(_) => {},
    }

    if let Some(opcode_enum) = Opcode::from_u8(boundary.opcode) {
        let mut header = EnvelopeHeader::new(opcode_enum, Curve::X25519);
        header.set_sender(sender_value);
        header.set_stream(stream_value);
        header.set_flags(EnvelopeFlags::from_byte(boundary.flags));
        header.set_recipient_key(boundary.recipient_key);
        header.set_nonce([boundary.nonce_fill; 24]);

        let small_payload = vec![0xAA; actual_payload_size.min(1000)];
        let envelope = Envelope::new(header, small_payload);

        let mut encoded = Vec::new();
        if envelope.encode(&mut encoded).is_err() {
            return;
        }

        let expected_size = 128 + envelope.payload.len();
        assert_eq!(encoded.len(), expected_size);

        if let Ok(decoded) = Envelope::decode(&encoded) {
            assert_eq!(decoded.header.sender(), envelope.header.sender());
            assert_eq!(decoded.header.stream(), envelope.header.stream());
            assert_eq!(decoded.header.opcode_enum(), Some(opcode_enum));
            assert_eq!(decoded.header.recipient_key(), envelope.header.recipient_key());
            assert_eq!(decoded.payload, envelope.payload);
        }
    }
});
