use strum::IntoEnumIterator;

use crate::definitions::fields::{Field, FieldSet};
use crate::definitions::params::{CubeType, FieldType};
use crate::definitions::CUBE_SIZE;
use crate::entity::{CompileOptions, Cube};
use crate::errors::CubeError;
use crate::keys::{self, SigningKeys};
use crate::parser::{self, TlvMode};
use crate::{generator, RelationshipType};

fn compiled(cube_type: CubeType, fields: Vec<Field>, opts: &CompileOptions<'_>) -> Cube {
    let mut cube = Cube::with_fields(cube_type, FieldSet::with_fields(cube_type, fields));
    #[allow(clippy::unwrap_used)]
    cube.compile(opts).unwrap();
    cube
}

#[test]
#[allow(clippy::unwrap_used)]
fn frozen_single_cube_round_trip() {
    let cube = compiled(
        CubeType::Frozen,
        vec![Field::payload(b"Hoc est probatio".to_vec())],
        &CompileOptions {
            timestamp: Some(1_700_000_000),
            ..Default::default()
        },
    );

    let bytes = cube.binary_data().unwrap();
    assert_eq!(bytes.len(), CUBE_SIZE);
    // a frozen cube's key is the BLAKE2b-32 of its full wire form
    assert_eq!(cube.key().unwrap(), keys::challenge_hash(bytes));

    let reparsed = parser::decompile(bytes.as_slice(), TlvMode::Cci).unwrap();
    let types: Vec<FieldType> = reparsed.iter().map(|f| f.field_type).collect();
    assert_eq!(
        types,
        vec![
            FieldType::Type,
            FieldType::Payload,
            FieldType::CciEnd,
            FieldType::Remainder,
            FieldType::Nonce,
            FieldType::Date,
        ]
    );
    assert_eq!(
        reparsed.get_first(FieldType::Payload).unwrap().value,
        b"Hoc est probatio"
    );
    assert_eq!(
        reparsed
            .get_first(FieldType::Date)
            .and_then(Field::as_timestamp),
        Some(1_700_000_000)
    );
}

#[test]
fn binary_round_trip_identity() {
    for cube_type in [CubeType::Frozen, CubeType::Pic] {
        let cube = compiled(
            cube_type,
            vec![
                Field::payload(b"per aspera".to_vec()),
                Field::media_type(2),
            ],
            &CompileOptions::default(),
        );
        let restored = match cube.binary_data().map(|b| Cube::from_binary(b.as_slice())) {
            Some(Ok(c)) => c,
            _ => panic!("round trip failed for {cube_type:?}"),
        };
        assert_eq!(cube, restored);
        assert_eq!(cube.key(), restored.key());
    }
}

#[test]
#[allow(clippy::unwrap_used)]
fn decompile_compile_law() {
    let mut fields = FieldSet::with_fields(
        CubeType::Frozen,
        [
            Field::payload(b"lex prima".to_vec()),
            Field::content_name(b"probatio".to_vec()),
            Field::media_type(1),
        ],
    );
    fields.ensure_defaults(123_456, None);
    let buf = generator::compile(&mut fields).unwrap();
    let reparsed = parser::decompile(buf.as_slice(), TlvMode::Cci).unwrap();
    // equality skips the stop marker, padding and remainder
    assert_eq!(fields, reparsed);
}

#[test]
#[allow(clippy::unwrap_used)]
fn compile_is_pure_at_difficulty_zero() {
    let build = || {
        compiled(
            CubeType::Frozen,
            vec![Field::payload(b"bis idem".to_vec())],
            &CompileOptions {
                timestamp: Some(1000),
                start_nonce: 7,
                ..Default::default()
            },
        )
    };
    let a = build();
    let b = build();
    assert_eq!(a.binary_data().unwrap(), b.binary_data().unwrap());
    assert_eq!(a.key(), b.key());
}

#[test]
#[allow(clippy::unwrap_used)]
fn nonce_search_satisfies_small_difficulty() {
    let cube = compiled(
        CubeType::Frozen,
        vec![Field::payload(b"fodere".to_vec())],
        &CompileOptions {
            difficulty: 8,
            timestamp: Some(0),
            ..Default::default()
        },
    );
    assert!(cube.challenge().unwrap().leading_zero_bits() >= 8);
    assert!(cube.validate(8).is_ok());
    // a frozen cube's key is the challenge, so the key meets it too
    assert!(cube.key().unwrap().meets_difficulty(8));
}

#[test]
#[allow(clippy::unwrap_used)]
fn pic_key_survives_redating() {
    let fields = vec![Field::payload(b"stabilitas".to_vec())];
    let first = compiled(
        CubeType::Pic,
        fields.clone(),
        &CompileOptions {
            timestamp: Some(1_000_000),
            ..Default::default()
        },
    );
    let second = compiled(
        CubeType::Pic,
        fields,
        &CompileOptions {
            timestamp: Some(2_000_000),
            ..Default::default()
        },
    );
    // the key excludes date and nonce, the challenge does not
    assert_eq!(first.key(), second.key());
    assert_ne!(first.binary_data().unwrap(), second.binary_data().unwrap());
    assert_ne!(first.challenge(), second.challenge());
}

#[test]
#[allow(clippy::unwrap_used)]
fn muc_signature_validates_and_breaks() {
    let keys = SigningKeys::generate();
    let cube = compiled(
        CubeType::Muc,
        vec![Field::payload(b"mutabilis".to_vec())],
        &CompileOptions {
            keys: Some(&keys),
            timestamp: Some(500),
            ..Default::default()
        },
    );
    // signed cubes are addressed by their public key
    assert_eq!(cube.key().unwrap(), keys.key());
    assert!(cube.validate(0).is_ok());

    let def = cube.fields().definition();
    let nonce_offset = def.offset_of(FieldType::Nonce).unwrap();
    let bytes = cube.binary_data().unwrap();

    // flipping a nonce byte leaves the signature intact
    let mut tampered = *bytes;
    tampered[nonce_offset] ^= 0x01;
    let reparsed = Cube::from_binary(&tampered).unwrap();
    assert!(reparsed.validate(0).is_ok());

    // flipping any signed byte breaks it
    let mut tampered = *bytes;
    tampered[2] ^= 0x01;
    let reparsed = Cube::from_binary(&tampered).unwrap();
    assert!(matches!(reparsed.validate(0), Err(CubeError::Signature)));
}

#[test]
#[allow(clippy::unwrap_used)]
fn pmuc_resculpt_keeps_key_and_advances_counter() {
    let keys = SigningKeys::generate();
    let first = compiled(
        CubeType::Pmuc,
        vec![
            Field::update_count(0),
            Field::payload(b"editio prima".to_vec()),
        ],
        &CompileOptions {
            keys: Some(&keys),
            timestamp: Some(1_000),
            ..Default::default()
        },
    );
    let second = compiled(
        CubeType::Pmuc,
        vec![
            Field::update_count(1),
            Field::payload(b"editio secunda".to_vec()),
        ],
        &CompileOptions {
            keys: Some(&keys),
            timestamp: Some(2_000),
            ..Default::default()
        },
    );

    assert_eq!(first.key(), second.key());
    assert_eq!(first.update_count(), Some(0));
    assert_eq!(second.update_count(), Some(1));
    assert!(second.validate(0).is_ok());
    assert!(second.supersedes(&first).is_ok());
    assert!(matches!(
        first.supersedes(&second),
        Err(CubeError::UpdateNotMonotonic)
    ));

    // an equal counter is not a valid successor either
    let stale = compiled(
        CubeType::Pmuc,
        vec![
            Field::update_count(1),
            Field::payload(b"editio furtiva".to_vec()),
        ],
        &CompileOptions {
            keys: Some(&keys),
            timestamp: Some(3_000),
            ..Default::default()
        },
    );
    assert!(matches!(
        stale.supersedes(&second),
        Err(CubeError::UpdateNotMonotonic)
    ));
}

#[test]
fn signed_compile_requires_keys() {
    let mut cube = Cube::with_fields(
        CubeType::Muc,
        FieldSet::with_fields(CubeType::Muc, [Field::payload(b"x".to_vec())]),
    );
    assert!(matches!(
        cube.compile(&CompileOptions::default()),
        Err(CubeError::MissingSigningKey)
    ));
    // the failed compile left the cube in draft state
    assert!(!cube.is_compiled());
}

#[test]
fn notify_type_requires_recipient() {
    let mut cube = Cube::with_fields(
        CubeType::FrozenNotify,
        FieldSet::with_fields(CubeType::FrozenNotify, [Field::payload(b"x".to_vec())]),
    );
    assert!(cube.compile(&CompileOptions::default()).is_err());

    let recipient = crate::keys::CubeKey::from_bytes([0x42; 32]);
    let cube = compiled(
        CubeType::FrozenNotify,
        vec![Field::notify(recipient), Field::payload(b"x".to_vec())],
        &CompileOptions::default(),
    );
    assert_eq!(cube.notify(), Some(recipient));
}

#[test]
fn every_type_compiles_to_cube_size() {
    let keys = SigningKeys::generate();
    let recipient = crate::keys::CubeKey::from_bytes([0x24; 32]);
    for cube_type in CubeType::iter() {
        let mut fields = vec![Field::payload(b"omnia".to_vec())];
        if cube_type.has_notify() {
            fields.insert(0, Field::notify(recipient));
        }
        let cube = compiled(
            cube_type,
            fields,
            &CompileOptions {
                keys: cube_type.is_signed().then_some(&keys),
                timestamp: Some(77),
                ..Default::default()
            },
        );
        assert_eq!(
            cube.binary_data().map(|b| b.len()),
            Some(CUBE_SIZE),
            "{cube_type:?}"
        );
        assert!(cube.validate(0).is_ok(), "{cube_type:?}");
    }
}

#[test]
#[allow(clippy::unwrap_used)]
fn relationships_are_readable_from_reparsed_cubes() {
    let target = crate::keys::CubeKey::from_bytes([9; 32]);
    let rel = crate::relationship::Relationship::new(RelationshipType::ReplyTo, target);
    let cube = compiled(
        CubeType::Frozen,
        vec![Field::relates_to(&rel), Field::payload(b"responsum".to_vec())],
        &CompileOptions::default(),
    );
    let reparsed = Cube::from_binary(cube.binary_data().unwrap()).unwrap();
    let rels = reparsed.relationships(Some(RelationshipType::ReplyTo));
    assert_eq!(rels, vec![rel]);
    assert!(reparsed
        .relationships(Some(RelationshipType::ContinuedIn))
        .is_empty());
}

#[test]
fn core_only_parser_yields_raw_content() {
    let cube = compiled(
        CubeType::Frozen,
        vec![Field::payload(b"opaca".to_vec())],
        &CompileOptions::default(),
    );
    let raw = match cube.binary_data().map(|b| Cube::from_binary_raw(b.as_slice())) {
        Some(Ok(c)) => c,
        _ => panic!("raw parse failed"),
    };
    let field = raw.fields().get_first(FieldType::RawContent);
    assert!(matches!(field, Some(f) if f.value.len() == 1014));
    // the raw field reproduces the payload region bytes verbatim
    assert!(matches!(
        (field, cube.binary_data()),
        (Some(f), Some(b)) if f.value.as_slice() == &b[1..1015]
    ));
}
