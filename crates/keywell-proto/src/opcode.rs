//! Opcode, curve, and flag definitions for envelope headers.

use serde::{Deserialize, Serialize};

/// Operation codes carried in the envelope header.
///
/// `Data` envelopes carry one-time-sealed ciphertext; the `Key*` family
/// carries the key exchange handshake; `Error` carries a structured error
/// report. The opcode determines how the payload bytes are interpreted, so
/// an unknown opcode makes the whole envelope undecodable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// One-time-sealed application data.
    Data = 0x10,

    /// Open a key exchange: ask a peer for a batch of one-time public keys.
    KeyRequest = 0x20,
    /// Responder's offered batch of one-time public keys.
    KeyOffer = 0x21,
    /// Initiator acknowledges the offer and sends its reciprocal batch.
    KeyAck = 0x22,
    /// Responder confirms receipt of the reciprocal batch.
    KeyConfirm = 0x23,
    /// Initiator finalizes the exchange.
    KeyCommit = 0x24,

    /// Structured error report.
    Error = 0x7F,
}

impl Opcode {
    /// Raw wire value.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value. `None` for codes this build does not speak.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x10 => Some(Self::Data),
            0x20 => Some(Self::KeyRequest),
            0x21 => Some(Self::KeyOffer),
            0x22 => Some(Self::KeyAck),
            0x23 => Some(Self::KeyConfirm),
            0x24 => Some(Self::KeyCommit),
            0x7F => Some(Self::Error),
            _ => None,
        }
    }

    /// True for the key exchange handshake family.
    #[must_use]
    pub const fn is_exchange(self) -> bool {
        matches!(
            self,
            Self::KeyRequest | Self::KeyOffer | Self::KeyAck | Self::KeyConfirm | Self::KeyCommit
        )
    }
}

/// Curve/algorithm tag for one-time key material.
///
/// Stored both in envelope headers and in serialized pool snapshots so the
/// tag survives every round trip. Only X25519 is implemented; the tag exists
/// so snapshots and envelopes from a future curve are rejected cleanly
/// instead of misinterpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Curve {
    /// X25519 Diffie-Hellman (RFC 7748).
    X25519 = 0x01,
}

impl Curve {
    /// Raw wire value.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire value. `None` for unknown tags.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::X25519),
            _ => None,
        }
    }
}

impl Default for Curve {
    fn default() -> Self {
        Self::X25519
    }
}

impl std::fmt::Display for Curve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::X25519 => write!(f, "x25519"),
        }
    }
}

/// Envelope processing flags (one byte in the header).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnvelopeFlags(u8);

impl EnvelopeFlags {
    /// Message is scoped to a single recipient rather than a stream.
    pub const DIRECT: u8 = 0b0000_0001;

    /// Construct from a raw header byte. Unknown bits are preserved.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Raw header byte.
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        self.0
    }

    /// True when the direct-scope bit is set.
    #[must_use]
    pub const fn is_direct(self) -> bool {
        self.0 & Self::DIRECT != 0
    }

    /// Set or clear the direct-scope bit.
    #[must_use]
    pub const fn with_direct(self, direct: bool) -> Self {
        if direct { Self(self.0 | Self::DIRECT) } else { Self(self.0 & !Self::DIRECT) }
    }
}
