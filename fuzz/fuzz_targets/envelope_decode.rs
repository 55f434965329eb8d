//! Fuzz target for Envelope::decode
//!
//! This fuzzer tests envelope decoding with arbitrary byte sequences to find:
//! - Parser crashes or panics
//! - Integer overflows in size calculations
//! - Buffer over-reads
//! - Malformed headers that bypass validation
//!
//! The fuzzer should NEVER panic. All invalid inputs should return an error.

#![no_main]

use keywell_proto::Envelope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Attempt to decode arbitrary bytes as an envelope
    // This should never panic, only return Err for invalid data
    let _ = Envelope::decode(data);
});
