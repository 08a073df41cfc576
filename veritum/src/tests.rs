use std::collections::HashMap;

use cube::definitions::fields::Field;
use cube::definitions::params::{CubeType, FieldType};
use cube::definitions::CUBE_SIZE;
use cube::entity::Cube;
use cube::keys::{CubeKey, SigningKeys};
use cube::relationship::Relationship;
use cube::RelationshipType;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::encrypt::EncryptOptions;
use crate::resolve::{self, CubeRetriever, ResolveOptions};
use crate::veritum::{Veritum, VeritumCompileOptions};

fn compile_opts<'a>() -> VeritumCompileOptions<'a> {
    VeritumCompileOptions {
        timestamp: Some(1_700_000_000),
        ..Default::default()
    }
}

#[allow(clippy::unwrap_used)]
fn compiled(veritum: &mut Veritum, opts: &VeritumCompileOptions<'_>) -> Vec<Cube> {
    veritum.compile(opts).unwrap();
    veritum.chunks().to_vec()
}

#[test]
#[allow(clippy::unwrap_used)]
fn single_chunk_veritum_has_no_continuation() {
    let mut veritum = Veritum::with_fields(
        CubeType::Frozen,
        [Field::payload(b"Hoc est probatio".to_vec())],
    );
    let chunks = compiled(&mut veritum, &compile_opts());
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].binary_data().unwrap().len(), CUBE_SIZE);
    assert!(chunks[0].continuation().is_none());
    assert_eq!(veritum.key(), chunks[0].key());

    let restored = Veritum::from_chunks(chunks).unwrap();
    assert_eq!(restored.fields(), veritum.fields());
}

#[test]
#[allow(clippy::unwrap_used)]
fn two_chunk_split_links_and_recombines() {
    let payload = vec![b'A'; 1200];
    let mut veritum =
        Veritum::with_fields(CubeType::Frozen, [Field::payload(payload.clone())]);
    let chunks = compiled(&mut veritum, &compile_opts());
    assert_eq!(chunks.len(), 2);

    // chunk 0 points at chunk 1's key
    assert_eq!(chunks[0].continuation(), chunks[1].key());
    assert!(chunks[1].continuation().is_none());

    let restored = Veritum::from_chunks(chunks).unwrap();
    let payloads: Vec<&Field> = restored
        .fields()
        .get(FieldType::Payload)
        .collect();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].value, payload);
}

#[test]
#[allow(clippy::unwrap_used)]
fn notification_veritum_spans_three_chunks() {
    let recipient = CubeKey::from_bytes([0x42; 32]);
    let mut veritum = Veritum::with_fields(
        CubeType::PicNotify,
        [
            Field::notify(recipient),
            Field::payload(vec![b'B'; CUBE_SIZE * 2]),
        ],
    );
    let chunks = compiled(&mut veritum, &compile_opts());
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].cube_type(), CubeType::PicNotify);
    assert_eq!(chunks[0].notify(), Some(recipient));
    assert_eq!(chunks[1].cube_type(), CubeType::Pic);
    assert_eq!(chunks[2].cube_type(), CubeType::Pic);

    let restored = Veritum::from_chunks(chunks).unwrap();
    let types: Vec<FieldType> = restored.fields().iter().map(|f| f.field_type).collect();
    assert_eq!(types, vec![FieldType::Notify, FieldType::Payload]);
    assert_eq!(restored.notify(), Some(recipient));
}

#[test]
#[allow(clippy::unwrap_used)]
fn repeated_values_keep_their_multiplicity() {
    let fields = [
        Field::payload(b"idem".to_vec()),
        Field::payload(b"idem".to_vec()),
        Field::payload(b"idem".to_vec()),
    ];
    let mut veritum = Veritum::with_fields(CubeType::Frozen, fields);
    let chunks = compiled(&mut veritum, &compile_opts());
    let restored = Veritum::from_chunks(chunks).unwrap();
    let payloads: Vec<&Field> = restored.fields().get(FieldType::Payload).collect();
    assert_eq!(payloads.len(), 3);
    assert!(payloads.iter().all(|f| f.value == b"idem"));
}

#[test]
#[allow(clippy::unwrap_used)]
fn foreign_relationships_survive_the_split() {
    let reply = Relationship::new(RelationshipType::ReplyTo, CubeKey::from_bytes([9; 32]));
    let mut veritum = Veritum::with_fields(
        CubeType::Frozen,
        [
            Field::relates_to(&reply),
            Field::payload(vec![b'C'; 1500]),
        ],
    );
    let chunks = compiled(&mut veritum, &compile_opts());
    assert!(chunks.len() > 1);
    let restored = Veritum::from_chunks(chunks).unwrap();
    // the composer's continuations are consumed, the user's link survives
    assert_eq!(
        restored.relationships(None),
        vec![reply],
    );
}

#[test]
#[allow(clippy::unwrap_used)]
fn recombine_rejects_wrong_order() {
    let mut veritum = Veritum::with_fields(
        CubeType::Frozen,
        [Field::payload(vec![b'D'; 2500])],
    );
    let mut chunks = compiled(&mut veritum, &compile_opts());
    assert!(chunks.len() >= 3);
    chunks.swap(1, 2);
    assert!(Veritum::from_chunks(chunks).is_err());
}

#[test]
#[allow(clippy::unwrap_used)]
fn recombine_rejects_missing_tail() {
    let mut veritum = Veritum::with_fields(
        CubeType::Frozen,
        [Field::payload(vec![b'E'; 1500])],
    );
    let mut chunks = compiled(&mut veritum, &compile_opts());
    chunks.truncate(1);
    assert!(Veritum::from_chunks(chunks).is_err());
}

#[test]
#[allow(clippy::unwrap_used)]
fn recompile_after_recombine_keeps_chunk_count() {
    let mut veritum = Veritum::with_fields(
        CubeType::Frozen,
        [Field::payload(vec![b'F'; 1800])],
    );
    let chunks = compiled(&mut veritum, &compile_opts());
    let count = chunks.len();
    let mut restored = Veritum::from_chunks(chunks).unwrap();
    let again = compiled(&mut restored, &compile_opts());
    assert_eq!(again.len(), count);
}

#[test]
#[allow(clippy::unwrap_used)]
fn pmuc_veritum_adopts_counter_and_key() {
    let keys = SigningKeys::generate();
    let opts = VeritumCompileOptions {
        keys: Some(&keys),
        ..compile_opts()
    };
    let mut veritum = Veritum::with_fields(
        CubeType::Pmuc,
        [
            Field::update_count(5),
            Field::payload(vec![b'G'; 1400]),
        ],
    );
    let chunks = compiled(&mut veritum, &opts);
    assert!(chunks.len() > 1);
    // every chunk is sculpted under the same public key
    for chunk in &chunks {
        assert_eq!(chunk.key(), Some(keys.key()));
        assert_eq!(chunk.update_count(), Some(5));
        assert!(chunk.validate(0).is_ok());
    }
    let restored = Veritum::from_chunks(chunks).unwrap();
    assert_eq!(restored.update_count(), Some(5));
    assert_eq!(restored.fields(), veritum.fields());
}

#[test]
#[allow(clippy::unwrap_used)]
fn chunk_transform_injects_uniform_fields() {
    let transform = |_: usize, fields: &mut cube::FieldSet| {
        fields.append_field(Field::description(b"uniformis".to_vec()));
    };
    // fixed-length fields close chunks at field boundaries, leaving the
    // padding slack the injected field consumes
    let mentions: Vec<Field> = (0u8..10)
        .map(|i| {
            Field::relates_to(&Relationship::new(
                RelationshipType::Mention,
                CubeKey::from_bytes([i; 32]),
            ))
        })
        .collect();
    let mut veritum = Veritum::with_fields(CubeType::Frozen, mentions);
    let opts = VeritumCompileOptions {
        chunk_transform: Some(&transform),
        max_chunk_size: Some(200),
        ..compile_opts()
    };
    let chunks = compiled(&mut veritum, &opts);
    assert!(chunks.len() > 1);
    for chunk in &chunks {
        let descriptions: Vec<&Field> = chunk.fields().get(FieldType::Description).collect();
        assert_eq!(descriptions.len(), 1);
    }
    let restored = Veritum::from_chunks(chunks).unwrap();
    // ten mentions survive alongside the injected descriptions
    assert_eq!(
        restored
            .relationships(Some(RelationshipType::Mention))
            .len(),
        10
    );
}

#[test]
#[allow(clippy::unwrap_used)]
fn encrypted_single_chunk_hides_the_payload() {
    let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let recipient = PublicKey::from(&secret);
    let recipients = [recipient];

    let mut veritum = Veritum::with_fields(
        CubeType::Frozen,
        [Field::payload(b"secretum".to_vec())],
    );
    let opts = VeritumCompileOptions {
        encryption: Some(EncryptOptions::for_recipients(&recipients)),
        ..compile_opts()
    };
    let chunks = compiled(&mut veritum, &opts);
    assert_eq!(chunks.len(), 1);

    // the chunk carries sealed fields and no plaintext payload
    let chunk_fields = chunks[0].fields();
    assert!(chunk_fields.get_first(FieldType::Encrypted).is_some());
    assert!(chunk_fields.get_first(FieldType::CryptoNonce).is_some());
    assert!(chunk_fields.get_first(FieldType::Payload).is_none());
    let bytes = chunks[0].binary_data().unwrap();
    assert!(!bytes
        .windows(b"secretum".len())
        .any(|w| w == b"secretum"));

    // decryption restores the original fields
    let mut restored = Veritum::from_chunks(chunks).unwrap();
    assert!(restored.decrypt(&secret, None));
    assert_eq!(
        restored
            .fields()
            .get_first(FieldType::Payload)
            .map(|f| f.value.clone()),
        Some(b"secretum".to_vec())
    );
}

#[test]
#[allow(clippy::unwrap_used)]
fn encrypted_multi_chunk_round_trip() {
    let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let recipient = PublicKey::from(&secret);
    let recipients = [recipient];
    let payload = vec![b'I'; 2000];

    let mut veritum =
        Veritum::with_fields(CubeType::Frozen, [Field::payload(payload.clone())]);
    let opts = VeritumCompileOptions {
        encryption: Some(EncryptOptions::for_recipients(&recipients)),
        ..compile_opts()
    };
    // encrypt-then-split: the ciphertext spans multiple chunks
    let chunks = compiled(&mut veritum, &opts);
    assert!(chunks.len() > 1);

    let mut restored = Veritum::from_chunks(chunks).unwrap();
    assert!(restored.decrypt(&secret, None));
    assert_eq!(
        restored
            .fields()
            .get_first(FieldType::Payload)
            .map(|f| f.value.clone()),
        Some(payload)
    );
}

#[test]
#[allow(clippy::unwrap_used)]
fn encrypted_chunk_keys_change_across_recompiles() {
    let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let recipients = [PublicKey::from(&secret)];
    let build = || {
        let mut veritum = Veritum::with_fields(
            CubeType::Frozen,
            [Field::payload(b"volatilis".to_vec())],
        );
        let opts = VeritumCompileOptions {
            encryption: Some(EncryptOptions::for_recipients(&recipients)),
            ..compile_opts()
        };
        compiled(&mut veritum, &opts)[0].key()
    };
    assert_ne!(build(), build());
}

struct MapRetriever {
    cubes: HashMap<CubeKey, Cube>,
}

impl MapRetriever {
    fn from_chunks(chunks: &[Cube]) -> Self {
        let mut cubes = HashMap::new();
        for chunk in chunks {
            if let Some(key) = chunk.key() {
                cubes.insert(key, chunk.clone());
            }
        }
        Self { cubes }
    }
}

impl CubeRetriever for MapRetriever {
    async fn retrieve(&self, key: &CubeKey) -> Option<Cube> {
        self.cubes.get(key).cloned()
    }
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn fetch_veritum_follows_the_chain() {
    let payload = vec![b'J'; 2000];
    let mut veritum =
        Veritum::with_fields(CubeType::Frozen, [Field::payload(payload.clone())]);
    let chunks = compiled(&mut veritum, &compile_opts());
    let first_key = chunks[0].key().unwrap();
    let retriever = MapRetriever::from_chunks(&chunks);

    let fetched = resolve::fetch_veritum(&first_key, &retriever).await.unwrap();
    assert_eq!(fetched.key(), Some(first_key));
    assert_eq!(
        fetched
            .fields()
            .get_first(FieldType::Payload)
            .map(|f| f.value.clone()),
        Some(payload)
    );
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn fetch_veritum_reports_missing_chunks() {
    let mut veritum = Veritum::with_fields(
        CubeType::Frozen,
        [Field::payload(vec![b'K'; 1500])],
    );
    let chunks = compiled(&mut veritum, &compile_opts());
    let first_key = chunks[0].key().unwrap();
    // only the first chunk is available
    let retriever = MapRetriever::from_chunks(&chunks[..1]);
    assert!(resolve::fetch_veritum(&first_key, &retriever).await.is_err());
}

#[allow(clippy::unwrap_used)]
fn single_cube(fields: Vec<Field>) -> Cube {
    let mut cube = Cube::with_fields(
        CubeType::Frozen,
        cube::FieldSet::with_fields(CubeType::Frozen, fields),
    );
    cube.compile(&cube::CompileOptions {
        timestamp: Some(1),
        ..Default::default()
    })
    .unwrap();
    cube
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn resolver_walks_the_graph_recursively() {
    let leaf = single_cube(vec![Field::payload(b"folium".to_vec())]);
    let middle = single_cube(vec![
        Field::relates_to(&Relationship::new(
            RelationshipType::Quotation,
            leaf.key().unwrap(),
        )),
        Field::payload(b"medius".to_vec()),
    ]);
    let root = single_cube(vec![
        Field::relates_to(&Relationship::new(
            RelationshipType::ReplyTo,
            middle.key().unwrap(),
        )),
        Field::payload(b"radix".to_vec()),
    ]);

    let mut cubes = HashMap::new();
    for cube in [&leaf, &middle, &root] {
        cubes.insert(cube.key().unwrap(), (*cube).clone());
    }
    let retriever = MapRetriever { cubes };

    let resolution =
        resolve::resolve_relationships(&root, &retriever, &ResolveOptions::default()).await;
    assert!(resolution.is_done());
    assert!(resolution.all_resolved());
    assert_eq!(resolution.related.len(), 2);
    let by_type = resolution.by_type();
    assert_eq!(by_type[&RelationshipType::ReplyTo].len(), 1);
    assert_eq!(by_type[&RelationshipType::Quotation].len(), 1);
    assert_eq!(by_type[&RelationshipType::Quotation][0].depth, 2);
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn resolver_reports_failures_and_limits() {
    let ghost_key = CubeKey::from_bytes([0xEE; 32]);
    let root = single_cube(vec![Field::relates_to(&Relationship::new(
        RelationshipType::Mention,
        ghost_key,
    ))]);
    let retriever = MapRetriever {
        cubes: HashMap::new(),
    };

    let resolution =
        resolve::resolve_relationships(&root, &retriever, &ResolveOptions::default()).await;
    assert!(resolution.resolution_failure());
    assert!(!resolution.all_resolved());
    assert_eq!(resolution.related.len(), 1);
    assert!(resolution.related[0].cube.is_none());

    // the same reference behind an exclusion is cut off instead
    let resolution = resolve::resolve_relationships(
        &root,
        &retriever,
        &ResolveOptions {
            exclude: [ghost_key].into_iter().collect(),
            ..Default::default()
        },
    )
    .await;
    assert!(resolution.exclusion_applied);
    assert!(resolution.related.is_empty());
}

#[tokio::test]
#[allow(clippy::unwrap_used)]
async fn resolver_breaks_cycles_and_honors_depth() {
    // a -> b -> a cycle
    let b_placeholder = single_cube(vec![Field::payload(b"b".to_vec())]);
    let a = single_cube(vec![Field::relates_to(&Relationship::new(
        RelationshipType::Quotation,
        b_placeholder.key().unwrap(),
    ))]);
    let b = single_cube(vec![
        Field::payload(b"b".to_vec()),
        Field::relates_to(&Relationship::new(
            RelationshipType::Quotation,
            a.key().unwrap(),
        )),
    ]);

    let mut cubes = HashMap::new();
    cubes.insert(b_placeholder.key().unwrap(), b.clone());
    cubes.insert(a.key().unwrap(), a.clone());
    let retriever = MapRetriever { cubes };

    let resolution =
        resolve::resolve_relationships(&a, &retriever, &ResolveOptions::default()).await;
    // the cycle back to a is cut by the visited set
    assert!(resolution.is_done());

    let resolution = resolve::resolve_relationships(
        &a,
        &retriever,
        &ResolveOptions {
            depth: 0,
            ..Default::default()
        },
    )
    .await;
    assert!(resolution.depth_limit_reached);
    assert!(resolution.related.is_empty());
}
