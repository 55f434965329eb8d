//! Envelope header implementation with zero-copy parsing.
//!
//! The `EnvelopeHeader` is a fixed 128-byte structure serialized as raw
//! binary (Big Endian). A receiver can route an envelope (opcode, sender,
//! stream, scope) from the first cache line alone; the one-time key material
//! that drives decryption fills the second.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    Curve, EnvelopeFlags, Opcode,
    errors::{ProtocolError, Result},
};

/// Fixed 128-byte envelope header (Big Endian network byte order).
///
/// All multi-byte integers are stored in Big Endian format to match network
/// byte order. Fields are stored as raw byte arrays to avoid alignment
/// issues.
///
/// Routing fields (magic, version, curve, flags, opcode, payload size,
/// sender, stream) occupy bytes 0-39. The remaining 88 bytes carry the
/// one-time cryptographic context for `Data` envelopes: the public key of the
/// consumed recipient pair (the cross-peer addressing token), the sender's
/// ephemeral public key, and the AEAD nonce. Control envelopes leave those
/// fields zeroed.
///
/// # Security
///
/// The `#[repr(C, packed)]` layout with zerocopy traits ensures this struct
/// can be safely cast from untrusted network bytes: all 128-byte patterns are
/// valid, so parsing cannot hit undefined behavior. Header fields are NOT
/// authenticated by themselves; a `Data` payload only opens if the recipient
/// key and ephemeral key in the header produce the right AEAD key, so
/// tampering with the cryptographic fields makes decryption fail rather than
/// succeed differently.
///
/// The recipient-key field deliberately carries a public key, never a pool
/// identifier: pool ids are process-local bookkeeping and two peers holding
/// replicas of the same pair may know it under different ids.
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct EnvelopeHeader {
    // Protocol identification (8 bytes: 0-7)
    magic: [u8; 4],        // 0x4B57454C ("KWEL" in ASCII)
    version: u8,           // 0x01
    curve: u8,             // Curve tag (0x01 = X25519)
    flags: u8,             // EnvelopeFlags bitfield
    pub(crate) opcode: u8, // operation code

    // Payload metadata (8 bytes: 8-15)
    pub(crate) payload_size: [u8; 4], // u32 payload length
    _reserved: [u8; 4],               // zero

    // Routing context (24 bytes: 16-39)
    sender: [u8; 8],  // u64 sender identity
    stream: [u8; 16], // u128 stream id (0 for direct/control traffic)

    // One-time cryptographic context (88 bytes: 40-127, Data only)
    recipient_key: [u8; 32], // consumed pair's public key
    ephemeral_key: [u8; 32], // sender's ephemeral public key
    nonce: [u8; 24],         // XChaCha20-Poly1305 nonce
}

impl EnvelopeHeader {
    /// Size of the serialized header (128 bytes).
    pub const SIZE: usize = 128;

    /// Magic number: "KWEL" in ASCII (0x4B57454C).
    pub const MAGIC: u32 = 0x4B57_454C;

    /// Current protocol version.
    pub const VERSION: u8 = 0x01;

    /// Maximum payload size (16 MB).
    pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

    /// Create a new header with the specified opcode and curve.
    ///
    /// All other fields start zeroed; callers fill them through the setters.
    #[must_use]
    pub fn new(opcode: Opcode, curve: Curve) -> Self {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..4].copy_from_slice(&Self::MAGIC.to_be_bytes());
        bytes[4] = Self::VERSION;
        bytes[5] = curve.to_u8();
        bytes[7] = opcode.to_u8();

        // INVARIANT: We just constructed bytes with valid magic, version, and
        // curve, so parsing them back cannot fail.
        Self::from_bytes(&bytes)
            .ok()
            .unwrap_or_else(|| unreachable!("constructed valid header with correct magic/version"))
            .to_owned()
    }

    /// Parse a header from network bytes (zero-copy, safe).
    ///
    /// Casts the prefix of `bytes` directly to an `EnvelopeHeader` reference
    /// using compile-time layout verification from `zerocopy`. No data is
    /// copied.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::EnvelopeTooShort`] if the buffer holds fewer than
    ///   128 bytes
    /// - [`ProtocolError::InvalidMagic`] if the magic number is wrong
    /// - [`ProtocolError::UnsupportedVersion`] for versions we do not speak
    /// - [`ProtocolError::UnknownCurve`] for curve tags we do not implement
    /// - [`ProtocolError::PayloadTooLarge`] if the claimed payload size
    ///   exceeds the protocol maximum
    ///
    /// # Security
    ///
    /// Validation runs cheapest-first (size, magic, version, curve, payload
    /// bound) so garbage input fails fast. The opcode is NOT validated here;
    /// [`Self::opcode_enum`] returns `None` for unknown codes and payload
    /// parsing rejects them.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::EnvelopeTooShort {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if u32::from_be_bytes(header.magic) != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        if Curve::from_u8(header.curve).is_none() {
            return Err(ProtocolError::UnknownCurve(header.curve));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_PAYLOAD_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize the header to bytes (zero-copy).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Protocol magic number (0x4B57454C = "KWEL").
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// Protocol version byte (currently 0x01).
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Curve tag for the key material referenced by this envelope.
    ///
    /// # Panics
    ///
    /// Never panics on headers produced by [`Self::from_bytes`] or
    /// [`Self::new`]; both reject unknown tags.
    #[must_use]
    pub fn curve(&self) -> Curve {
        Curve::from_u8(self.curve)
            .unwrap_or_else(|| unreachable!("curve tag validated during construction"))
    }

    /// Envelope processing flags.
    #[must_use]
    pub fn flags(&self) -> EnvelopeFlags {
        EnvelopeFlags::from_byte(self.flags)
    }

    /// Operation code as a raw byte.
    #[must_use]
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Operation code as enum. `None` if unrecognized.
    #[must_use]
    pub fn opcode_enum(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }

    /// Payload size in bytes (max 16 MB).
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }

    /// Sender identity id.
    #[must_use]
    pub fn sender(&self) -> u64 {
        u64::from_be_bytes(self.sender)
    }

    /// 128-bit stream id. Zero for direct and control traffic.
    #[must_use]
    pub fn stream(&self) -> u128 {
        u128::from_be_bytes(self.stream)
    }

    /// Public key of the consumed recipient pair (Data envelopes only).
    ///
    /// This is the cross-peer addressing token: the receiver looks this key
    /// up in its own pool to find the matching secret.
    #[must_use]
    pub fn recipient_key(&self) -> &[u8; 32] {
        &self.recipient_key
    }

    /// Sender's ephemeral public key (Data envelopes only).
    #[must_use]
    pub fn ephemeral_key(&self) -> &[u8; 32] {
        &self.ephemeral_key
    }

    /// AEAD nonce (Data envelopes only).
    #[must_use]
    pub fn nonce(&self) -> &[u8; 24] {
        &self.nonce
    }

    /// Update the sender identity.
    pub fn set_sender(&mut self, sender: u64) {
        self.sender = sender.to_be_bytes();
    }

    /// Update the stream id.
    pub fn set_stream(&mut self, stream: u128) {
        self.stream = stream.to_be_bytes();
    }

    /// Update the envelope flags.
    pub fn set_flags(&mut self, flags: EnvelopeFlags) {
        self.flags = flags.to_byte();
    }

    /// Set the consumed pair's public key.
    pub fn set_recipient_key(&mut self, key: [u8; 32]) {
        self.recipient_key = key;
    }

    /// Set the sender's ephemeral public key.
    pub fn set_ephemeral_key(&mut self, key: [u8; 32]) {
        self.ephemeral_key = key;
    }

    /// Set the AEAD nonce.
    pub fn set_nonce(&mut self, nonce: [u8; 24]) {
        self.nonce = nonce;
    }

    /// Set the payload size.
    pub fn set_payload_size(&mut self, size: u32) {
        self.payload_size = size.to_be_bytes();
    }
}

// Manual Debug implementation (can't derive due to packed repr). Key material
// is printed as hex prefixes only; it is public-key data but full dumps drown
// logs.
impl std::fmt::Debug for EnvelopeHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeHeader")
            .field("magic", &format!("{:#010x}", self.magic()))
            .field("version", &self.version())
            .field("curve", &self.curve())
            .field("flags", &self.flags())
            .field("opcode", &format!("{:#04x}", self.opcode()))
            .field("payload_size", &self.payload_size())
            .field("sender", &self.sender())
            .field("stream", &format!("{:#034x}", self.stream()))
            .field("recipient_key", &format!("{}..", hex_prefix(&self.recipient_key)))
            .field("ephemeral_key", &format!("{}..", hex_prefix(&self.ephemeral_key)))
            .finish_non_exhaustive()
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for EnvelopeHeader {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for EnvelopeHeader {}
