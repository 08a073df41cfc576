//! The veritum entity: a logical field stream spanning one or more cubes

use std::sync::atomic::AtomicBool;

use cube::definitions::fields::{Field, FieldSet};
use cube::definitions::params::{CubeType, FieldLength, FieldType};
use cube::entity::{CompileOptions, Cube};
use cube::errors::CubeError;
use cube::keys::{CubeKey, SigningKeys};
use cube::parser::{self, TlvMode};
use cube::relationship::Relationship;
use cube::RelationshipType;
use log::debug;

use crate::encrypt::{self, EncryptOptions};
use crate::errors::{ChainError, VeritumError};
use crate::split;

/// Options of a veritum compile
///
/// The per-cube knobs are forwarded to every chunk compile; the date is
/// resolved once so that all chunks carry the same timestamp.
#[derive(Default)]
pub struct VeritumCompileOptions<'a> {
    /// Required number of leading zero bits on each chunk's challenge
    pub difficulty: u16,
    /// Key material, mandatory for the signed families
    pub keys: Option<&'a SigningKeys>,
    /// UNIX seconds for the date positionals; defaults to the veritum's
    /// date field and then to the current time
    pub timestamp: Option<u64>,
    /// First nonce value each chunk search tries
    pub start_nonce: u32,
    /// Upper bound on search attempts per chunk
    pub max_attempts: Option<u64>,
    /// Cooperative cancellation flag shared by all chunk compiles
    pub cancel: Option<&'a AtomicBool>,
    /// Lowered chunk size for tests; defaults to the full cube size
    pub max_chunk_size: Option<usize>,
    /// End-to-end encryption of the field stream before splitting
    pub encryption: Option<EncryptOptions<'a>>,
    /// Runs once per chunk immediately before its compile, allowing
    /// uniform field injection
    pub chunk_transform: Option<&'a dyn Fn(usize, &mut FieldSet)>,
}

/// A logical entity spanning one or more cubes
///
/// The veritum owns a field list in the same vocabulary as a single cube,
/// a cube type applied to all chunks, and, once compiled, the ordered
/// chunk list. Its key is the first chunk's key.
#[derive(Debug, Clone)]
pub struct Veritum {
    cube_type: CubeType,
    fields: FieldSet,
    chunks: Vec<Cube>,
}

impl Veritum {
    /// Create an empty veritum of the given cube type
    pub fn new(cube_type: CubeType) -> Self {
        Self {
            cube_type,
            fields: FieldSet::new(cube_type),
            chunks: Vec::new(),
        }
    }

    /// Create a veritum from prepared fields
    pub fn with_fields(cube_type: CubeType, fields: impl IntoIterator<Item = Field>) -> Self {
        Self {
            cube_type,
            fields: FieldSet::with_fields(cube_type, fields),
            chunks: Vec::new(),
        }
    }

    /// The cube type applied to the chunks
    pub fn cube_type(&self) -> CubeType {
        self.cube_type
    }

    /// Read access to the logical field list
    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    /// Mutable access to the logical field list; drops compiled chunks
    pub fn fields_mut(&mut self) -> &mut FieldSet {
        self.chunks.clear();
        &mut self.fields
    }

    /// Append a field; drops compiled chunks
    pub fn append_field(&mut self, field: Field) {
        self.fields_mut().append_field(field);
    }

    /// The compiled chunks in chain order
    pub fn chunks(&self) -> &[Cube] {
        &self.chunks
    }

    /// The veritum's key: its first chunk's key
    pub fn key(&self) -> Option<CubeKey> {
        self.chunks.first().and_then(Cube::key)
    }

    /// The key in hex text form
    pub fn key_hex(&self) -> Option<String> {
        self.key().map(|k| k.to_hex())
    }

    /// The date all chunks carry, once compiled
    pub fn date(&self) -> Option<u64> {
        self.chunks.first().and_then(Cube::date)
    }

    /// The update counter, for PMUC veritums
    pub fn update_count(&self) -> Option<u32> {
        self.chunks.first().and_then(Cube::update_count)
    }

    /// The notification recipient of the veritum, if any
    pub fn notify(&self) -> Option<CubeKey> {
        self.fields
            .get_first(FieldType::Notify)
            .and_then(|f| CubeKey::from_slice(&f.value).ok())
    }

    /// The relationships of the logical field list
    pub fn relationships(&self, filter: Option<RelationshipType>) -> Vec<Relationship> {
        cube::relationship::relationships_in(&self.fields, filter)
    }

    /// Compile the veritum into its chunk cubes
    ///
    /// Optionally encrypts the field stream, splits it, then compiles the
    /// chunks from last to first so that every continuation can be filled
    /// with its successor's key.
    pub fn compile(&mut self, opts: &VeritumCompileOptions<'_>) -> Result<&[Cube], VeritumError> {
        // resolve the date once so every chunk carries the same one
        let timestamp = Some(
            opts.timestamp
                .or_else(|| {
                    self.fields
                        .get_first(FieldType::Date)
                        .and_then(Field::as_timestamp)
                })
                .unwrap_or_else(now),
        );

        let fields = match &opts.encryption {
            Some(enc) => encrypt::encrypt_fields(&self.fields, enc)?,
            None => self.fields.clone(),
        };

        let plans = split::split(&fields, self.cube_type, opts.max_chunk_size)?;
        let count = plans.len();
        debug!("Compiling veritum as {count} chunk(s)");

        let mut compiled: Vec<Cube> = Vec::with_capacity(count);
        let mut next_key: Option<CubeKey> = None;
        for (index, plan) in plans.into_iter().enumerate().rev() {
            let mut chunk_fields = plan.fields;
            if plan.continues {
                let key = next_key.ok_or(ChainError::MissingContinuation { chunk: index })?;
                fill_continuation(&mut chunk_fields, key)?;
            }
            if let Some(transform) = opts.chunk_transform {
                transform(index, &mut chunk_fields);
            }
            let mut chunk = Cube::with_fields(plan.cube_type, chunk_fields);
            chunk.compile(&CompileOptions {
                difficulty: opts.difficulty,
                keys: opts.keys,
                timestamp,
                start_nonce: opts.start_nonce,
                max_attempts: opts.max_attempts,
                cancel: opts.cancel,
            })?;
            next_key = chunk.key();
            compiled.push(chunk);
        }
        compiled.reverse();
        self.chunks = compiled;
        Ok(&self.chunks)
    }

    /// Recombine received chunks into the veritum they were split from
    ///
    /// The chunks must arrive in chain order (callers follow the
    /// continuation relationships to establish it). Continuations
    /// inserted by the composer are validated against the successor keys
    /// and consumed; split variable-length fields are concatenated back
    /// together. Type, date, key material and counter are adopted from
    /// the first chunk, with the notify variant converted to plain.
    pub fn from_chunks(chunks: impl IntoIterator<Item = Cube>) -> Result<Self, VeritumError> {
        let chunks: Vec<Cube> = chunks.into_iter().collect();
        let first = chunks.first().ok_or(ChainError::Empty)?;
        let cube_type = first.cube_type().plain_variant();

        let mut logical: Vec<Field> = Vec::new();
        if let Some(recipient) = first.notify() {
            logical.push(Field::notify(recipient));
        }

        let mut merge_armed = false;
        for (index, chunk) in chunks.iter().enumerate() {
            let bytes = chunk.binary_data().ok_or(CubeError::NotCompiled)?;
            let parsed = parser::decompile(bytes.as_slice(), TlvMode::Cci)?;

            let continuations: Vec<Relationship> =
                cube::relationship::relationships_in(&parsed, Some(RelationshipType::ContinuedIn));
            let terminal = index + 1 == chunks.len();
            if terminal {
                if !continuations.is_empty() {
                    return Err(ChainError::DanglingContinuation { chunk: index }.into());
                }
            } else {
                match continuations.len() {
                    0 => return Err(ChainError::MissingContinuation { chunk: index }.into()),
                    1 => {}
                    _ => return Err(ChainError::AmbiguousContinuation { chunk: index }.into()),
                }
                let successor = chunks[index + 1].key().ok_or(CubeError::NotCompiled)?;
                if continuations[0].remote_key != successor {
                    return Err(ChainError::KeyMismatch { chunk: index }.into());
                }
            }

            if index == 0 && first.family() == cube::CubeFamily::Pmuc {
                if let Some(count) = parsed.get_first(FieldType::PmucUpdateCount) {
                    let mut adopted = count.clone();
                    adopted.start = None;
                    logical.push(adopted);
                }
            }

            let mut first_content = true;
            for field in parsed.content_fields() {
                if field.field_type == FieldType::RelatesTo {
                    if let Ok(rel) = Relationship::from_field(field) {
                        if rel.rel_type == RelationshipType::ContinuedIn {
                            continue;
                        }
                    }
                }
                let mut merged = false;
                if first_content && merge_armed {
                    if let Some(last) = logical.last_mut() {
                        if last.field_type == field.field_type {
                            last.value.extend_from_slice(&field.value);
                            merged = true;
                        }
                    }
                }
                if !merged {
                    let mut field = field.clone();
                    field.start = None;
                    logical.push(field);
                }
                first_content = false;
            }

            // a chunk whose TLV stream left no room for the stop marker
            // ends in a split variable-length field
            merge_armed = !terminal
                && parsed.get_first(FieldType::CciEnd).is_none()
                && logical
                    .last()
                    .map(|f| f.field_type.length() == FieldLength::Variable)
                    .unwrap_or(false);
        }

        Ok(Self {
            cube_type,
            fields: FieldSet::with_fields(cube_type, logical),
            chunks,
        })
    }

    /// Decrypt an encrypted field stream in place
    ///
    /// Returns whether decryption was applied. Missing or tampered crypto
    /// fields never raise; the fields simply stay encrypted and callers
    /// inspect what is present.
    pub fn decrypt(
        &mut self,
        recipient_secret: &x25519_dalek::StaticSecret,
        sender_pubkey: Option<&x25519_dalek::PublicKey>,
    ) -> bool {
        encrypt::decrypt_fields(&mut self.fields, recipient_secret, sender_pubkey)
    }
}

impl PartialEq for Veritum {
    fn eq(&self, other: &Self) -> bool {
        self.cube_type.family() == other.cube_type.family() && self.fields == other.fields
    }
}

impl Eq for Veritum {}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Backfill the zero-key continuation placeholder with the successor key
fn fill_continuation(fields: &mut FieldSet, key: CubeKey) -> Result<(), VeritumError> {
    let placeholder = Relationship::continued_in(CubeKey::ZERO).to_field();
    let mut filled = false;
    // the placeholder is the last relationship field of the chunk
    for index in (0..fields.count()).rev() {
        let matches = fields
            .field_at_mut(index)
            .map(|f| f.equals(&placeholder, false))
            .unwrap_or(false);
        if matches {
            if let Some(field) = fields.field_at_mut(index) {
                field.value = Relationship::continued_in(key).to_field().value;
                filled = true;
            }
            break;
        }
    }
    if filled {
        Ok(())
    } else {
        Err(ChainError::MissingContinuation { chunk: 0 }.into())
    }
}
