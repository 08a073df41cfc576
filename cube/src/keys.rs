//! Key derivation, the proof-of-work challenge and signatures
//!
//! Every cube is addressed by a 32-byte [CubeKey]. Unsigned families
//! derive it by hashing designated cube bytes with BLAKE2b; signed
//! families use the Ed25519 public key verbatim. Independently of the
//! key, every cube must satisfy a difficulty target on its challenge
//! hash, which always covers the nonce so that the search can converge.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use log::debug;
use zerocopy::network_endian::U32 as WireU32;
use zerocopy::AsBytes;

use crate::definitions::layout::FieldDefinition;
use crate::definitions::params::{CubeFamily, CubeType, FieldType};
use crate::definitions::{CUBE_SIZE, KEY_SIZE, NONCE_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use crate::errors::CubeError;

type Blake2b32 = Blake2b<U32>;

/// Attempts between cancellation checks of the nonce search
pub const CANCEL_CHECK_INTERVAL: u64 = 1 << 14;

/// A 32-byte cube key
///
/// Presented as lowercase hex in text form.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CubeKey([u8; KEY_SIZE]);

impl CubeKey {
    /// An all-zero key, used as a placeholder in unfinished chains
    pub const ZERO: CubeKey = CubeKey([0u8; KEY_SIZE]);

    /// Wrap raw key bytes
    pub const fn from_bytes(raw: [u8; KEY_SIZE]) -> Self {
        Self(raw)
    }

    /// Wrap a byte slice, failing on any length but 32
    pub fn from_slice(raw: &[u8]) -> Result<Self, CubeError> {
        let raw: [u8; KEY_SIZE] = raw.try_into().map_err(|_| CubeError::BinaryLength {
            expected: KEY_SIZE,
            got: raw.len(),
        })?;
        Ok(Self(raw))
    }

    /// Parse a key from its hex text form
    pub fn from_hex(text: &str) -> Result<Self, CubeError> {
        let raw = hex::decode(text).map_err(|_| CubeError::InvalidKey)?;
        Self::from_slice(&raw)
    }

    /// The raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// The hex text form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Number of leading zero bits when read as a big-endian integer
    pub fn leading_zero_bits(&self) -> u16 {
        let mut bits = 0u16;
        for byte in self.0 {
            if byte == 0 {
                bits += 8;
            } else {
                bits += byte.leading_zeros() as u16;
                break;
            }
        }
        bits
    }

    /// Whether the key satisfies the given difficulty target
    pub fn meets_difficulty(&self, difficulty: u16) -> bool {
        difficulty == 0 || self.leading_zero_bits() >= difficulty
    }

    /// Whether the key is the all-zero placeholder
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; KEY_SIZE]
    }
}

impl fmt::Debug for CubeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CubeKey({})", self.to_hex())
    }
}

impl fmt::Display for CubeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// The Ed25519 key material used to sculpt a signed cube
pub struct SigningKeys {
    signing: SigningKey,
}

impl SigningKeys {
    /// Generate a fresh random signing key
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut rand::rngs::OsRng),
        }
    }

    /// Restore a signing key from its 32 secret bytes
    pub fn from_secret_bytes(raw: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(raw),
        }
    }

    /// The 32 secret bytes
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }

    /// The public key bytes
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.signing.verifying_key().to_bytes()
    }

    /// The cube key of every cube sculpted with this key
    pub fn key(&self) -> CubeKey {
        CubeKey::from_bytes(self.public_bytes())
    }
}

/// BLAKE2b-32 of the full cube: the proof-of-work challenge value
///
/// This value covers the nonce for every cube type; for the FROZEN family
/// it doubles as the cube key.
pub fn challenge_hash(buf: &[u8; CUBE_SIZE]) -> CubeKey {
    let mut hasher = Blake2b32::new();
    hasher.update(buf);
    CubeKey(hasher.finalize().into())
}

/// BLAKE2b-32 of the cube with date and nonce zeroed: the key of the PIC
/// family, stable under re-sculpting with a fresh date
pub fn pic_key(buf: &[u8; CUBE_SIZE], def: &FieldDefinition) -> Result<CubeKey, CubeError> {
    let mut copy = *buf;
    for field_type in [FieldType::Date, FieldType::Nonce] {
        let offset = def
            .offset_of(field_type)
            .ok_or(CubeError::Field(crate::errors::FieldError::MissingPositional(field_type)))?;
        let len = match def.positional(field_type) {
            Some(p) => p.len,
            None => 0,
        };
        copy[offset..offset + len].fill(0);
    }
    Ok(challenge_hash(&copy))
}

/// Derive the cube key of a compiled buffer according to its type
pub fn derive_key(cube_type: CubeType, buf: &[u8; CUBE_SIZE]) -> Result<CubeKey, CubeError> {
    let def = FieldDefinition::for_type(cube_type);
    match cube_type.family() {
        CubeFamily::Frozen => Ok(challenge_hash(buf)),
        CubeFamily::Pic => pic_key(buf, def),
        CubeFamily::Muc | CubeFamily::Pmuc => {
            let offset = def
                .offset_of(FieldType::PublicKey)
                .ok_or(CubeError::InvalidKey)?;
            CubeKey::from_slice(&buf[offset..offset + PUBLIC_KEY_SIZE])
        }
    }
}

/// Options bounding a nonce search
#[derive(Default)]
pub struct SearchOptions<'a> {
    /// Required number of leading zero bits on the challenge hash
    pub difficulty: u16,
    /// First nonce value to try
    pub start_nonce: u32,
    /// Upper bound on attempts; unbounded searches stop after the nonce
    /// space is exhausted
    pub max_attempts: Option<u64>,
    /// Cooperative cancellation flag, polled between attempt batches
    pub cancel: Option<&'a AtomicBool>,
}

/// Iterate nonce values until the challenge hash meets the difficulty
///
/// The winning nonce is left in the buffer; the returned pair is the
/// nonce and the challenge hash. The search is deterministic for a given
/// buffer and starting nonce. It polls the cancellation flag once per
/// [CANCEL_CHECK_INTERVAL] attempts and never blocks past that window.
pub fn solve_challenge(
    buf: &mut [u8; CUBE_SIZE],
    nonce_offset: usize,
    opts: &SearchOptions<'_>,
) -> Result<(u32, CubeKey), CubeError> {
    let mut nonce = opts.start_nonce;
    let mut attempts: u64 = 0;
    loop {
        buf[nonce_offset..nonce_offset + NONCE_SIZE]
            .copy_from_slice(WireU32::new(nonce).as_bytes());
        let challenge = challenge_hash(buf);
        if challenge.meets_difficulty(opts.difficulty) {
            debug!("Nonce search satisfied difficulty {} after {attempts} attempts", opts.difficulty);
            return Ok((nonce, challenge));
        }

        attempts += 1;
        if attempts % CANCEL_CHECK_INTERVAL == 0 {
            if let Some(cancel) = opts.cancel {
                if cancel.load(Ordering::Relaxed) {
                    return Err(CubeError::Cancelled);
                }
            }
        }
        if let Some(max) = opts.max_attempts {
            if attempts >= max {
                return Err(CubeError::InsufficientDifficulty {
                    difficulty: opts.difficulty,
                    attempts,
                });
            }
        }
        nonce = nonce.wrapping_add(1);
        if nonce == opts.start_nonce {
            return Err(CubeError::InsufficientDifficulty {
                difficulty: opts.difficulty,
                attempts,
            });
        }
    }
}

/// The cube bytes a signature covers: everything except the signature and
/// nonce regions, which are zeroed in place
pub fn signable_bytes(buf: &[u8; CUBE_SIZE], def: &FieldDefinition) -> Vec<u8> {
    let mut copy = buf.to_vec();
    for field_type in [FieldType::Signature, FieldType::Nonce] {
        if let (Some(offset), Some(p)) = (def.offset_of(field_type), def.positional(field_type)) {
            copy[offset..offset + p.len].fill(0);
        }
    }
    copy
}

/// Sign the cube in place with the given keys
///
/// The signature covers all bytes except the signature and nonce regions,
/// so the nonce search may continue after signing without invalidating
/// it.
pub fn sign_cube(
    buf: &mut [u8; CUBE_SIZE],
    def: &FieldDefinition,
    keys: &SigningKeys,
) -> Result<(), CubeError> {
    let offset = def
        .offset_of(FieldType::Signature)
        .ok_or(CubeError::MissingSigningKey)?;
    let message = signable_bytes(buf, def);
    let signature = keys.signing.sign(&message);
    buf[offset..offset + SIGNATURE_SIZE].copy_from_slice(&signature.to_bytes());
    Ok(())
}

/// Verify the embedded signature of a signed cube
pub fn verify_cube(buf: &[u8; CUBE_SIZE], def: &FieldDefinition) -> Result<(), CubeError> {
    let sig_offset = def
        .offset_of(FieldType::Signature)
        .ok_or(CubeError::Signature)?;
    let key_offset = def
        .offset_of(FieldType::PublicKey)
        .ok_or(CubeError::Signature)?;

    let raw_key: [u8; PUBLIC_KEY_SIZE] = buf[key_offset..key_offset + PUBLIC_KEY_SIZE]
        .try_into()
        .map_err(|_| CubeError::Signature)?;
    let verifying = VerifyingKey::from_bytes(&raw_key).map_err(|_| CubeError::Signature)?;

    let raw_sig: [u8; SIGNATURE_SIZE] = buf[sig_offset..sig_offset + SIGNATURE_SIZE]
        .try_into()
        .map_err(|_| CubeError::Signature)?;
    let signature = Signature::from_bytes(&raw_sig);

    let message = signable_bytes(buf, def);
    verifying
        .verify(&message, &signature)
        .map_err(|_| CubeError::Signature)
}
