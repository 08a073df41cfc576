//! The stateful cube entity
//!
//! A [Cube] owns a field set and, once compiled, its 1024-byte wire form
//! plus the derived key. Mutating a field drops the compiled state;
//! compiling is transactional and leaves the cube untouched on failure.

use std::sync::atomic::AtomicBool;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use crate::definitions::fields::{Field, FieldSet};
use crate::definitions::params::{CubeFamily, CubeType, FieldType};
use crate::definitions::{CUBE_SIZE, NONCE_SIZE, SIGNATURE_SIZE};
use crate::errors::{CubeError, FieldError};
use crate::keys::{self, CubeKey, SearchOptions, SigningKeys};
use crate::parser::{self, TlvMode};
use crate::relationship::{self, Relationship};
use crate::{generator, RelationshipType};

/// Options of a single cube compile
#[derive(Default)]
pub struct CompileOptions<'a> {
    /// Required number of leading zero bits on the challenge hash;
    /// zero disables the proof of work
    pub difficulty: u16,
    /// Key material, mandatory for the signed families
    pub keys: Option<&'a SigningKeys>,
    /// UNIX seconds for the date positional; defaults to the current time
    pub timestamp: Option<u64>,
    /// First nonce value the search tries
    pub start_nonce: u32,
    /// Upper bound on search attempts
    pub max_attempts: Option<u64>,
    /// Cooperative cancellation flag
    pub cancel: Option<&'a AtomicBool>,
}

#[derive(Debug, Clone)]
enum State {
    Draft,
    Compiled {
        bytes: Box<[u8; CUBE_SIZE]>,
        key: CubeKey,
        challenge: CubeKey,
    },
}

/// A single 1024-byte cube
#[derive(Debug, Clone)]
pub struct Cube {
    cube_type: CubeType,
    fields: FieldSet,
    state: State,
}

impl Cube {
    /// Create an empty draft cube of the given type
    pub fn new(cube_type: CubeType) -> Self {
        Self {
            cube_type,
            fields: FieldSet::new(cube_type),
            state: State::Draft,
        }
    }

    /// Create a draft cube from prepared fields
    ///
    /// The field set is re-targeted at the given cube type.
    pub fn with_fields(cube_type: CubeType, mut fields: FieldSet) -> Self {
        fields.retype(cube_type);
        Self {
            cube_type,
            fields,
            state: State::Draft,
        }
    }

    /// Parse a received 1024-byte buffer into a compiled cube
    pub fn from_binary(buf: &[u8]) -> Result<Self, CubeError> {
        Self::from_binary_with_mode(buf, TlvMode::Cci)
    }

    /// Parse a received buffer without TLV interpretation; the payload
    /// region surfaces as one opaque raw-content field
    pub fn from_binary_raw(buf: &[u8]) -> Result<Self, CubeError> {
        Self::from_binary_with_mode(buf, TlvMode::RawContent)
    }

    fn from_binary_with_mode(buf: &[u8], mode: TlvMode) -> Result<Self, CubeError> {
        let fields = parser::decompile(buf, mode)?;
        let cube_type = fields.cube_type();
        let mut bytes = Box::new([0u8; CUBE_SIZE]);
        bytes.copy_from_slice(buf);
        let key = keys::derive_key(cube_type, &bytes)?;
        let challenge = keys::challenge_hash(&bytes);
        Ok(Self {
            cube_type,
            fields,
            state: State::Compiled {
                bytes,
                key,
                challenge,
            },
        })
    }

    /// The type of this cube
    pub fn cube_type(&self) -> CubeType {
        self.cube_type
    }

    /// The family of this cube's type
    pub fn family(&self) -> CubeFamily {
        self.cube_type.family()
    }

    /// Read access to the field set
    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Mutable access to the field set; drops any compiled state
    pub fn fields_mut(&mut self) -> &mut FieldSet {
        self.state = State::Draft;
        &mut self.fields
    }

    /// Append a field; drops any compiled state
    pub fn append_field(&mut self, field: Field) {
        self.fields_mut().append_field(field);
    }

    /// The cube key, if the cube has been compiled
    pub fn key(&self) -> Option<CubeKey> {
        match &self.state {
            State::Draft => None,
            State::Compiled { key, .. } => Some(*key),
        }
    }

    /// The cube key in hex text form, if the cube has been compiled
    pub fn key_hex(&self) -> Option<String> {
        self.key().map(|k| k.to_hex())
    }

    /// The proof-of-work challenge hash, if the cube has been compiled
    pub fn challenge(&self) -> Option<CubeKey> {
        match &self.state {
            State::Draft => None,
            State::Compiled { challenge, .. } => Some(*challenge),
        }
    }

    /// The compiled 1024-byte wire form
    pub fn binary_data(&self) -> Option<&[u8; CUBE_SIZE]> {
        match &self.state {
            State::Draft => None,
            State::Compiled { bytes, .. } => Some(bytes),
        }
    }

    /// Whether the cube currently holds a compiled wire form
    pub fn is_compiled(&self) -> bool {
        matches!(self.state, State::Compiled { .. })
    }

    /// The date positional as UNIX seconds
    pub fn date(&self) -> Option<u64> {
        self.fields
            .get_first(FieldType::Date)
            .and_then(Field::as_timestamp)
    }

    /// The update counter of the PMUC family
    pub fn update_count(&self) -> Option<u32> {
        self.fields
            .get_first(FieldType::PmucUpdateCount)
            .and_then(Field::as_u32)
    }

    /// The public key positional of the signed families
    pub fn public_key(&self) -> Option<CubeKey> {
        self.fields
            .get_first(FieldType::PublicKey)
            .and_then(|f| CubeKey::from_slice(&f.value).ok())
    }

    /// The notification recipient, if this cube carries one
    pub fn notify(&self) -> Option<CubeKey> {
        self.fields
            .get_first(FieldType::Notify)
            .and_then(|f| CubeKey::from_slice(&f.value).ok())
    }

    /// The relationships of this cube, optionally restricted to one type
    pub fn relationships(&self, filter: Option<RelationshipType>) -> Vec<Relationship> {
        relationship::relationships_in(&self.fields, filter)
    }

    /// The continuation link to the next chunk, if present
    pub fn continuation(&self) -> Option<CubeKey> {
        self.relationships(Some(RelationshipType::ContinuedIn))
            .first()
            .map(|r| r.remote_key)
    }

    /// Compile the cube into its wire form
    ///
    /// Missing mandatory positionals are inserted from defaults, the
    /// field parser writes the buffer, signed types are signed, and the
    /// nonce search runs until the challenge hash meets the difficulty.
    /// On any failure, including cancellation, the cube keeps its prior
    /// state.
    pub fn compile(&mut self, opts: &CompileOptions<'_>) -> Result<(), CubeError> {
        let def = self.fields.definition();
        let timestamp = opts.timestamp.unwrap_or_else(now);

        let mut fields = self.fields.clone();
        if self.cube_type.has_notify() && fields.get_first(FieldType::Notify).is_none() {
            return Err(FieldError::MissingPositional(FieldType::Notify).into());
        }
        let signed = self.cube_type.is_signed();
        let mut public_key = None;
        if signed {
            let keys = opts.keys.ok_or(CubeError::MissingSigningKey)?;
            if let Some(f) = fields.get_first(FieldType::PublicKey) {
                if f.value != keys.public_bytes() {
                    return Err(CubeError::InvalidKey);
                }
            }
            public_key = Some(keys.public_bytes());
        }
        fields.ensure_defaults(timestamp, public_key);

        let mut buf = generator::compile(&mut fields)?;
        if signed {
            // the signature excludes the nonce, so signing once before the
            // search keeps it valid for every attempt
            if let Some(keys) = opts.keys {
                keys::sign_cube(&mut buf, def, keys)?;
            }
        }

        let nonce_offset = def
            .offset_of(FieldType::Nonce)
            .ok_or(FieldError::MissingPositional(FieldType::Nonce))?;
        let (nonce, challenge) = keys::solve_challenge(
            &mut buf,
            nonce_offset,
            &SearchOptions {
                difficulty: opts.difficulty,
                start_nonce: opts.start_nonce,
                max_attempts: opts.max_attempts,
                cancel: opts.cancel,
            },
        )?;
        debug!("Sculpted {:?} cube with nonce {nonce}", self.cube_type);

        // mirror the searched nonce and the signature back into the fields
        if let Some(field) = fields.get_first_mut(FieldType::Nonce) {
            field.value = buf[nonce_offset..nonce_offset + NONCE_SIZE].to_vec();
        }
        if signed {
            if let (Some(offset), Some(field)) = (
                def.offset_of(FieldType::Signature),
                fields.get_first_mut(FieldType::Signature),
            ) {
                field.value = buf[offset..offset + SIGNATURE_SIZE].to_vec();
            }
        }

        let key = keys::derive_key(self.cube_type, &buf)?;
        self.fields = fields;
        self.state = State::Compiled {
            bytes: buf,
            key,
            challenge,
        };
        Ok(())
    }

    /// Re-check every invariant of the compiled wire form
    ///
    /// Reparses the buffer, verifies the positional layout, the
    /// difficulty target, the key binding and, for signed types, the
    /// signature.
    pub fn validate(&self, difficulty: u16) -> Result<(), CubeError> {
        let State::Compiled {
            bytes,
            key,
            challenge,
        } = &self.state
        else {
            return Err(CubeError::NotCompiled);
        };

        let reparsed = parser::decompile(bytes.as_slice(), TlvMode::Cci)?;
        if reparsed.cube_type() != self.cube_type {
            return Err(CubeError::TypeNotImplemented(bytes[0]));
        }

        let fresh_challenge = keys::challenge_hash(bytes);
        if fresh_challenge != *challenge || !fresh_challenge.meets_difficulty(difficulty) {
            return Err(CubeError::InvalidKey);
        }
        if keys::derive_key(self.cube_type, bytes)? != *key {
            return Err(CubeError::InvalidKey);
        }
        if self.cube_type.is_signed() {
            keys::verify_cube(bytes, self.fields.definition())?;
        }
        Ok(())
    }

    /// Check that this cube is a valid successor of `predecessor` under
    /// the same key
    ///
    /// The date must not decrease, and for the PMUC family the update
    /// counter must strictly increase. Store-level policy decides whether
    /// a failing update is replaced or refused; this only makes the rules
    /// observable.
    pub fn supersedes(&self, predecessor: &Cube) -> Result<(), CubeError> {
        let (mine, theirs) = match (self.key(), predecessor.key()) {
            (Some(a), Some(b)) => (a, b),
            _ => return Err(CubeError::NotCompiled),
        };
        if mine != theirs {
            return Err(CubeError::InvalidKey);
        }
        if self.date() < predecessor.date() {
            return Err(CubeError::UpdateNotMonotonic);
        }
        if self.family() == CubeFamily::Pmuc {
            let (new, old) = match (self.update_count(), predecessor.update_count()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(CubeError::UpdateNotMonotonic),
            };
            if new <= old {
                return Err(CubeError::UpdateNotMonotonic);
            }
        }
        Ok(())
    }
}

impl PartialEq for Cube {
    fn eq(&self, other: &Self) -> bool {
        if self.cube_type != other.cube_type {
            return false;
        }
        match (self.binary_data(), other.binary_data()) {
            (Some(a), Some(b)) => a == b,
            _ => self.fields == other.fields,
        }
    }
}

impl Eq for Cube {}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
