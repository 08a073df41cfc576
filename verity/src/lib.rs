//! # verity
//!
//! A small utility to sculpt, inspect and key Verity cubes

#![warn(missing_docs, clippy::unwrap_used, clippy::expect_used)]

use cube::definitions::fields::Field;
use cube::definitions::params::{CubeFamily, CubeType};
use cube::definitions::CUBE_SIZE;
use cube::entity::Cube;
use cube::errors::CubeError;
use cube::keys::{CubeKey, SigningKeys};
use cube::relationship::Relationship;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};
use veritum::{EncryptOptions, ExchangePublicKey, ExchangeSecret, Veritum, VeritumCompileOptions};
use veritum::VeritumError;

pub mod utils;

/// Options to configure a sculpt run
#[derive(Debug, Clone)]
pub struct SculptOptions {
    /// Family of the cubes to sculpt
    pub family: CubeFamily,
    /// Proof-of-work difficulty in leading zero bits
    pub difficulty: u16,
    /// The payload bytes to carry
    pub payload: Vec<u8>,
    /// Optional content name field
    pub content_name: Option<String>,
    /// Optional media type tag
    pub media_type: Option<u8>,
    /// Notification recipient; selects the notify type variant
    pub notify: Option<CubeKey>,
    /// Ed25519 secret for the signed families
    pub signing_key: Option<[u8; 32]>,
    /// Update counter for the PMUC family
    pub update_count: Option<u32>,
    /// X25519 recipient keys; non-empty enables payload encryption
    pub recipients: Vec<ExchangePublicKey>,
    /// Date override in UNIX seconds
    pub timestamp: Option<u64>,
}

impl SculptOptions {
    /// Minimal options carrying a payload in frozen cubes
    pub fn frozen(payload: Vec<u8>) -> Self {
        Self {
            family: CubeFamily::Frozen,
            difficulty: 0,
            payload,
            content_name: None,
            media_type: None,
            notify: None,
            signing_key: None,
            update_count: None,
            recipients: Vec::new(),
            timestamp: None,
        }
    }
}

/// The product of a sculpt run
#[derive(Debug)]
pub struct SculptOutcome {
    /// The veritum key (its first chunk's key) in hex
    pub key: String,
    /// The wire form of every chunk in chain order
    pub chunks: Vec<Vec<u8>>,
}

/// Errors that may occur while sculpting or inspecting
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum VerityError {
    #[error("Could not sculpt: {0}")]
    Sculpt(#[from] VeritumError),
    #[error("Could not parse cube: {0}")]
    Parse(#[from] CubeError),
    #[error("A signing key is required for the {0:?} family")]
    SigningKeyRequired(CubeFamily),
    #[error("Sculpting produced no chunk")]
    NoChunks,
}

/// Sculpt a veritum out of the given options
#[instrument(skip_all, fields(family = ?opts.family, difficulty = opts.difficulty))]
pub fn sculpt(opts: &SculptOptions) -> Result<SculptOutcome, VerityError> {
    let cube_type = cube_type_for(opts.family, opts.notify.is_some());
    let signed = cube_type.is_signed();
    if signed && opts.signing_key.is_none() {
        return Err(VerityError::SigningKeyRequired(opts.family));
    }
    let keys = opts.signing_key.map(|raw| SigningKeys::from_secret_bytes(&raw));

    let mut fields: Vec<Field> = Vec::new();
    if let Some(recipient) = opts.notify {
        fields.push(Field::notify(recipient));
    }
    if let Some(count) = opts.update_count {
        fields.push(Field::update_count(count));
    }
    if let Some(name) = &opts.content_name {
        fields.push(Field::content_name(name.as_bytes().to_vec()));
    }
    if let Some(tag) = opts.media_type {
        fields.push(Field::media_type(tag));
    }
    fields.push(Field::payload(opts.payload.clone()));

    let mut veritum = Veritum::with_fields(cube_type, fields);
    let encryption = (!opts.recipients.is_empty())
        .then(|| EncryptOptions::for_recipients(&opts.recipients));
    veritum.compile(&VeritumCompileOptions {
        difficulty: opts.difficulty,
        keys: keys.as_ref(),
        timestamp: opts.timestamp,
        encryption,
        ..Default::default()
    })?;

    let key = veritum.key_hex().ok_or(VerityError::NoChunks)?;
    let chunks: Vec<Vec<u8>> = veritum
        .chunks()
        .iter()
        .filter_map(|c| c.binary_data().map(|b| b.to_vec()))
        .collect();
    info!("Sculpted {} chunk(s) under key {key}", chunks.len());
    Ok(SculptOutcome { key, chunks })
}

/// One field of an inspected cube
#[derive(Debug, Serialize)]
pub struct FieldReport {
    /// Field type name
    pub field_type: String,
    /// Body length in bytes
    pub length: usize,
    /// Offset of the body in the buffer
    pub start: Option<u16>,
    /// Hex preview of the first bytes of the body
    pub preview: String,
}

/// The inspection report of a single cube
#[derive(Debug, Serialize)]
pub struct CubeReport {
    /// The cube type tag
    pub cube_type: CubeType,
    /// The cube key in hex
    pub key: String,
    /// The challenge hash in hex
    pub challenge: String,
    /// Leading zero bits of the challenge
    pub difficulty: u16,
    /// The date positional as UNIX seconds
    pub date: Option<u64>,
    /// The update counter, for PMUC cubes
    pub update_count: Option<u32>,
    /// The notification recipient in hex, if present
    pub notify: Option<String>,
    /// Whether the embedded signature verifies, for signed cubes
    pub signature_valid: Option<bool>,
    /// Relationships carried in the payload
    pub relationships: Vec<String>,
    /// Every parsed field in order
    pub fields: Vec<FieldReport>,
}

/// Parse and report a received 1024-byte cube
#[instrument(skip_all)]
pub fn inspect(buf: &[u8]) -> Result<CubeReport, VerityError> {
    let cube = Cube::from_binary(buf)?;
    debug!("Parsed {:?} cube of {} bytes", cube.cube_type(), CUBE_SIZE);

    let signature_valid = cube
        .cube_type()
        .is_signed()
        .then(|| cube.validate(0).is_ok());

    let relationships = cube
        .relationships(None)
        .iter()
        .map(|r| format_relationship(r))
        .collect();

    let fields = cube
        .fields()
        .iter()
        .map(|f| FieldReport {
            field_type: format!("{:?}", f.field_type),
            length: f.value.len(),
            start: f.start,
            preview: utils::formatting::hex_preview(&f.value, 16),
        })
        .collect();

    Ok(CubeReport {
        cube_type: cube.cube_type(),
        key: cube.key_hex().unwrap_or_default(),
        challenge: cube.challenge().map(|c| c.to_hex()).unwrap_or_default(),
        difficulty: cube.challenge().map(|c| c.leading_zero_bits()).unwrap_or(0),
        date: cube.date(),
        update_count: cube.update_count(),
        notify: cube.notify().map(|k| k.to_hex()),
        signature_valid,
        relationships,
        fields,
    })
}

/// Generated key material for sculpting and encryption
#[derive(Debug, Serialize)]
pub struct KeyMaterial {
    /// Ed25519 secret key in hex
    pub signing_secret: String,
    /// Ed25519 public key in hex; the key of every cube signed with it
    pub signing_public: String,
    /// X25519 secret key in hex
    pub exchange_secret: String,
    /// X25519 public key in hex
    pub exchange_public: String,
}

/// Generate fresh Ed25519 and X25519 key pairs
pub fn keygen() -> KeyMaterial {
    let signing = SigningKeys::generate();
    let exchange = ExchangeSecret::random_from_rng(rand::rngs::OsRng);
    let exchange_public = ExchangePublicKey::from(&exchange);
    KeyMaterial {
        signing_secret: hex::encode(signing.secret_bytes()),
        signing_public: hex::encode(signing.public_bytes()),
        exchange_secret: hex::encode(exchange.to_bytes()),
        exchange_public: hex::encode(exchange_public.as_bytes()),
    }
}

fn cube_type_for(family: CubeFamily, notify: bool) -> CubeType {
    let plain = match family {
        CubeFamily::Frozen => CubeType::Frozen,
        CubeFamily::Pic => CubeType::Pic,
        CubeFamily::Muc => CubeType::Muc,
        CubeFamily::Pmuc => CubeType::Pmuc,
    };
    if notify {
        plain.notify_variant()
    } else {
        plain
    }
}

fn format_relationship(rel: &Relationship) -> String {
    format!("{:?} -> {}", rel.rel_type, rel.remote_key)
}
