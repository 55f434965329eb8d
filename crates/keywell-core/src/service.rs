//! Stateless crypto façade over the key pool.
//!
//! These functions read the pool but never mutate it. Every successful
//! encryption or decryption reports which pair it consumed; retiring that
//! pair is the caller's responsibility, keeping consumption bookkeeping in
//! one place (the session).

use bytes::Bytes;
use keywell_crypto::{Sealed, rewrap, seal};
use keywell_proto::{Curve, Envelope, EnvelopeFlags, EnvelopeHeader, Opcode};
use serde::{Deserialize, Serialize};

use crate::{
    env::Environment,
    error::ServiceError,
    pool::{KeyId, KeyPool},
};

/// Who may open an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessScope {
    /// Everyone holding a replica of the stream's mirrored pool
    Stream(u128),
    /// One peer, addressed through key material it exchanged earlier
    Direct(u64),
}

/// A key sealed to a pool pair, awaiting transfer to another authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrapRequest {
    /// Public half of the pool pair the key was sealed to
    pub recipient_key: [u8; 32],
    /// Ephemeral public key used for the original sealing
    pub ephemeral_key: [u8; 32],
    /// Nonce used for the original sealing
    pub nonce: [u8; 24],
    /// Sealed 32-byte content key, tag included
    pub sealed_key: Vec<u8>,
    /// Authority public key to re-seal to
    pub authority_key: [u8; 32],
}

/// Result of a rewrap: the same content key sealed to the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrappedKey {
    /// Fresh ephemeral public key for the new sealing
    pub ephemeral_public: [u8; 32],
    /// Fresh nonce for the new sealing
    pub nonce: [u8; 24],
    /// Content key sealed to the authority, tag included
    pub sealed_key: Vec<u8>,
}

/// Encrypt a message by consuming the pool's oldest pair.
///
/// Seals to the pair's own public key: every holder of a pool replica can
/// locate the matching secret half. The header carries the consumed pair's
/// public key as the addressing token, plus the ephemeral key and nonce the
/// receiver needs to open it.
///
/// Does not mutate the pool; the caller retires the returned [`KeyId`]
/// exactly once per successful call.
///
/// # Errors
///
/// - `NoKeysAvailable`: The pool is empty
/// - `Crypto`: Sealing failed (degenerate key material)
pub fn encrypt_one_time<E: Environment>(
    pool: &KeyPool,
    scope: AccessScope,
    sender: u64,
    plaintext: &[u8],
    env: &E,
) -> Result<(Envelope, KeyId), ServiceError> {
    let id = pool.first_id().ok_or(ServiceError::NoKeysAvailable)?;
    let Some(recipient) = pool.public_key(id) else {
        unreachable!("first_id only returns live ids");
    };

    let mut ephemeral_seed = [0u8; 32];
    env.random_bytes(&mut ephemeral_seed);
    let mut nonce = [0u8; 24];
    env.random_bytes(&mut nonce);

    let sealed = seal(plaintext, &recipient, ephemeral_seed, nonce)?;
    let envelope = assemble(Opcode::Data, pool.curve(), scope, sender, &sealed);

    Ok((envelope, id))
}

/// Encrypt a message to a single remote one-time public key.
///
/// The direct-send path: the recipient key comes from the peer's exchanged
/// batch rather than the local pool, so there is no local pair to retire.
/// The caller consumes the remote keyring entry instead.
///
/// # Errors
///
/// - `Crypto`: The remote key is a small-order point
pub fn encrypt_direct<E: Environment>(
    recipient_public: &[u8; 32],
    curve: Curve,
    peer: u64,
    sender: u64,
    plaintext: &[u8],
    env: &E,
) -> Result<Envelope, ServiceError> {
    let mut ephemeral_seed = [0u8; 32];
    env.random_bytes(&mut ephemeral_seed);
    let mut nonce = [0u8; 24];
    env.random_bytes(&mut nonce);

    let sealed = seal(plaintext, recipient_public, ephemeral_seed, nonce)?;
    Ok(assemble(Opcode::Data, curve, AccessScope::Direct(peer), sender, &sealed))
}

/// Decrypt a data envelope with the pool pair its header references.
///
/// Does not mutate the pool; the caller retires the returned [`KeyId`].
///
/// # Errors
///
/// - `NoMatchingKey`: The referenced pair is not held locally. Benign on
///   shared channels; the envelope was sealed for someone else.
/// - `Crypto`: Authentication failed (tampering or corrupted material).
///   Always distinct from `NoMatchingKey`.
/// - `Protocol`: The envelope is not a data envelope
pub fn decrypt_one_time(
    pool: &KeyPool,
    envelope: &Envelope,
) -> Result<(Vec<u8>, KeyId), ServiceError> {
    if envelope.header.opcode_enum() != Some(Opcode::Data) {
        return Err(ServiceError::Protocol("expected a data envelope".to_string()));
    }

    let (id, pair) =
        pool.find_by_public(envelope.header.recipient_key()).ok_or(ServiceError::NoMatchingKey)?;

    let sealed = Sealed {
        ephemeral_public: *envelope.header.ephemeral_key(),
        recipient_public: *envelope.header.recipient_key(),
        nonce: *envelope.header.nonce(),
        ciphertext: envelope.payload.to_vec(),
    };

    let plaintext = keywell_crypto::open(&sealed, &pair)?;
    Ok((plaintext, id))
}

/// Rewrap a sealed content key from a pool pair onto an authority key.
///
/// Supports the key-access handshake for material produced against a policy
/// authority rather than a direct peer. Purely a key operation; message
/// ciphertext is never touched. Does not mutate the pool.
///
/// # Errors
///
/// - `NoMatchingKey`: The referenced pair is not held locally
/// - `Crypto`: Unwrap failed, or the authority key is degenerate
pub fn process_rewrap<E: Environment>(
    pool: &KeyPool,
    request: &RewrapRequest,
    env: &E,
) -> Result<(RewrappedKey, KeyId), ServiceError> {
    let (id, pair) =
        pool.find_by_public(&request.recipient_key).ok_or(ServiceError::NoMatchingKey)?;

    let sealed = Sealed {
        ephemeral_public: request.ephemeral_key,
        recipient_public: request.recipient_key,
        nonce: request.nonce,
        ciphertext: request.sealed_key.clone(),
    };

    let mut ephemeral_seed = [0u8; 32];
    env.random_bytes(&mut ephemeral_seed);
    let mut nonce = [0u8; 24];
    env.random_bytes(&mut nonce);

    let resealed = rewrap(&sealed, &pair, &request.authority_key, ephemeral_seed, nonce)?;
    Ok((
        RewrappedKey {
            ephemeral_public: resealed.ephemeral_public,
            nonce: resealed.nonce,
            sealed_key: resealed.ciphertext,
        },
        id,
    ))
}

/// Build a data envelope around a sealed message.
fn assemble(
    opcode: Opcode,
    curve: Curve,
    scope: AccessScope,
    sender: u64,
    sealed: &Sealed,
) -> Envelope {
    let mut header = EnvelopeHeader::new(opcode, curve);
    header.set_sender(sender);
    match scope {
        AccessScope::Stream(stream) => header.set_stream(stream),
        AccessScope::Direct(_) => {
            header.set_flags(EnvelopeFlags::default().with_direct(true));
        },
    }
    header.set_recipient_key(sealed.recipient_public);
    header.set_ephemeral_key(sealed.ephemeral_public);
    header.set_nonce(sealed.nonce);

    Envelope::new(header, Bytes::from(sealed.ciphertext.clone()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use keywell_crypto::OneTimeKeyPair;

    use super::*;
    use crate::env::test_utils::MockEnv;

    const STREAM: u128 = 0x5EED;
    const SENDER: u64 = 41;

    /// Two replicas of one pool, as both ends of a stream hold them.
    fn mirrored_pools(count: usize) -> (KeyPool, KeyPool, MockEnv) {
        let env = MockEnv::with_seed(11);
        let mut pool = KeyPool::new(64, Curve::X25519);
        pool.generate(count, &env);

        let replica = KeyPool::from_bytes(&pool.to_bytes().unwrap()).unwrap();
        (pool, replica, env)
    }

    #[test]
    fn encrypt_consumes_oldest_pair() {
        let (pool, _, env) = mirrored_pools(4);

        let (_, id) = encrypt_one_time(&pool, AccessScope::Stream(STREAM), SENDER, b"m", &env)
            .unwrap();

        assert_eq!(id, pool.first_id().unwrap());
    }

    #[test]
    fn roundtrip_across_mirrored_pools() {
        let (pool_a, pool_b, env) = mirrored_pools(4);

        let (envelope, used_a) =
            encrypt_one_time(&pool_a, AccessScope::Stream(STREAM), SENDER, b"hello", &env)
                .unwrap();

        assert_eq!(envelope.header.sender(), SENDER);
        assert_eq!(envelope.header.stream(), STREAM);
        assert!(!envelope.header.flags().is_direct());

        let (plaintext, used_b) = decrypt_one_time(&pool_b, &envelope).unwrap();
        assert_eq!(plaintext, b"hello");

        // Replicas resolve the same pair by public key
        assert_eq!(pool_b.public_key(used_b), pool_a.public_key(used_a));
    }

    #[test]
    fn empty_pool_has_no_keys() {
        let env = MockEnv::new();
        let pool = KeyPool::new(8, Curve::X25519);

        let result = encrypt_one_time(&pool, AccessScope::Stream(STREAM), SENDER, b"m", &env);
        assert_eq!(result.unwrap_err(), ServiceError::NoKeysAvailable);
    }

    #[test]
    fn unrelated_pool_reports_no_matching_key() {
        let (pool_a, _, env) = mirrored_pools(4);

        let stranger_env = MockEnv::with_seed(99);
        let mut stranger = KeyPool::new(8, Curve::X25519);
        stranger.generate(4, &stranger_env);

        let (envelope, _) =
            encrypt_one_time(&pool_a, AccessScope::Stream(STREAM), SENDER, b"m", &env).unwrap();

        let result = decrypt_one_time(&stranger, &envelope);
        assert_eq!(result.unwrap_err(), ServiceError::NoMatchingKey);
    }

    #[test]
    fn tampering_is_distinct_from_wrong_receiver() {
        let (pool_a, pool_b, env) = mirrored_pools(4);

        let (mut envelope, _) =
            encrypt_one_time(&pool_a, AccessScope::Stream(STREAM), SENDER, b"m", &env).unwrap();

        let mut corrupted = envelope.payload.to_vec();
        corrupted[0] ^= 0xFF;
        envelope.payload = Bytes::from(corrupted);

        let result = decrypt_one_time(&pool_b, &envelope);
        assert!(matches!(result, Err(ServiceError::Crypto(_))));
    }

    #[test]
    fn control_envelopes_are_not_decryptable() {
        let (pool, _, env) = mirrored_pools(2);

        let (mut envelope, _) =
            encrypt_one_time(&pool, AccessScope::Stream(STREAM), SENDER, b"m", &env).unwrap();
        envelope.header = EnvelopeHeader::new(Opcode::KeyRequest, Curve::X25519);

        let result = decrypt_one_time(&pool, &envelope);
        assert!(matches!(result, Err(ServiceError::Protocol(_))));
    }

    #[test]
    fn repeated_encryption_differs() {
        let (pool, _, env) = mirrored_pools(4);

        let (first, _) =
            encrypt_one_time(&pool, AccessScope::Stream(STREAM), SENDER, b"same", &env).unwrap();
        let (second, _) =
            encrypt_one_time(&pool, AccessScope::Stream(STREAM), SENDER, b"same", &env).unwrap();

        // Fresh ephemeral and nonce per call, even to the same pair
        assert_ne!(first.payload, second.payload);
        assert_ne!(first.header.ephemeral_key(), second.header.ephemeral_key());
    }

    #[test]
    fn identical_seed_produces_identical_envelope() {
        let make = || {
            let env = MockEnv::with_seed(5);
            let mut pool = KeyPool::new(16, Curve::X25519);
            pool.generate(3, &env);
            let (envelope, _) =
                encrypt_one_time(&pool, AccessScope::Stream(STREAM), SENDER, b"det", &env)
                    .unwrap();
            envelope.encode_to_vec().unwrap()
        };

        assert_eq!(make(), make());
    }

    #[test]
    fn direct_envelope_roundtrip() {
        let env = MockEnv::with_seed(3);
        let recipient = OneTimeKeyPair::from_seed([0x44; 32]);

        let envelope = encrypt_direct(
            &recipient.public_bytes(),
            Curve::X25519,
            7,
            SENDER,
            b"for your eyes",
            &env,
        )
        .unwrap();

        assert!(envelope.header.flags().is_direct());
        assert_eq!(envelope.header.recipient_key(), &recipient.public_bytes());

        // The receiving side holds the pair outside any pool
        let sealed = Sealed {
            ephemeral_public: *envelope.header.ephemeral_key(),
            recipient_public: *envelope.header.recipient_key(),
            nonce: *envelope.header.nonce(),
            ciphertext: envelope.payload.to_vec(),
        };
        assert_eq!(keywell_crypto::open(&sealed, &recipient).unwrap(), b"for your eyes");
    }

    #[test]
    fn rewrap_moves_key_to_authority() {
        let (pool, _, env) = mirrored_pools(2);
        let authority = OneTimeKeyPair::from_seed([0x77; 32]);
        let content_key = [0xC0; 32];

        // A sender sealed a content key to our pool pair earlier
        let id = pool.first_id().unwrap();
        let sealed =
            seal(&content_key, &pool.public_key(id).unwrap(), [0xE9; 32], [0x31; 24]).unwrap();

        let request = RewrapRequest {
            recipient_key: sealed.recipient_public,
            ephemeral_key: sealed.ephemeral_public,
            nonce: sealed.nonce,
            sealed_key: sealed.ciphertext,
            authority_key: authority.public_bytes(),
        };

        let (rewrapped, used) = process_rewrap(&pool, &request, &env).unwrap();
        assert_eq!(used, id);

        let for_authority = Sealed {
            ephemeral_public: rewrapped.ephemeral_public,
            recipient_public: authority.public_bytes(),
            nonce: rewrapped.nonce,
            ciphertext: rewrapped.sealed_key,
        };
        assert_eq!(keywell_crypto::open(&for_authority, &authority).unwrap(), content_key);
    }

    #[test]
    fn rewrap_for_unknown_pair_reports_no_matching_key() {
        let (pool, _, env) = mirrored_pools(2);

        let request = RewrapRequest {
            recipient_key: [0xAA; 32],
            ephemeral_key: [0xBB; 32],
            nonce: [0x00; 24],
            sealed_key: vec![0; 48],
            authority_key: [0xCC; 32],
        };

        let result = process_rewrap(&pool, &request, &env);
        assert_eq!(result.unwrap_err(), ServiceError::NoMatchingKey);
    }
}
