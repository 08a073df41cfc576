//! The chunk splitter
//!
//! Walks a logical field stream left to right, greedily packing fields
//! into chunks. Every chunk reserves room for one continuation
//! relationship; the reservation of the final chunk simply becomes
//! padding. Variable-length fields are split within the field so that the
//! leading part fills its chunk completely; a chunk whose TLV stream is
//! saturated therefore always ends in a split, which is what recombining
//! keys on. Fixed-length fields move to the next chunk whole.

use std::collections::VecDeque;

use cube::definitions::fields::{Field, FieldSet};
use cube::definitions::layout::FieldDefinition;
use cube::definitions::params::{CubeType, FieldLength, FieldType};
use cube::definitions::{CUBE_SIZE, RELATIONSHIP_SIZE};
use cube::errors::FieldError;
use cube::keys::CubeKey;
use cube::relationship::Relationship;
use cube::RelationshipType;
use log::debug;

use crate::errors::{ChainError, VeritumError};

/// Smallest remaining space worth splitting a variable field into: a
/// header plus one body byte
const MIN_SPLIT: usize = 3;

/// One planned chunk, ready to compile
pub(crate) struct ChunkPlan {
    pub cube_type: CubeType,
    pub fields: FieldSet,
    /// Whether the plan ends in a continuation placeholder to backfill
    pub continues: bool,
}

/// Encoded size of a continuation relationship, derived from the length
/// table
pub(crate) fn continuation_size() -> usize {
    FieldType::RelatesTo.header_len(RELATIONSHIP_SIZE) + RELATIONSHIP_SIZE
}

/// Split a logical field stream into chunk plans
///
/// `fields` is the veritum's field list; positional fields are not packed
/// into the TLV stream but copied into every chunk (update counter,
/// public key) or the first chunk only (notification recipient).
pub(crate) fn split(
    fields: &FieldSet,
    cube_type: CubeType,
    max_chunk_size: Option<usize>,
) -> Result<Vec<ChunkPlan>, VeritumError> {
    let chunk_size = max_chunk_size.unwrap_or(CUBE_SIZE).min(CUBE_SIZE);
    let notify = fields.get_first(FieldType::Notify).cloned();
    if cube_type.has_notify() && notify.is_none() {
        return Err(FieldError::MissingPositional(FieldType::Notify).into());
    }
    let first_type = if notify.is_some() {
        cube_type.notify_variant()
    } else {
        cube_type.plain_variant()
    };
    let rest_type = cube_type.plain_variant();

    // positionals replicated into every chunk
    let replicated: Vec<Field> = [FieldType::PmucUpdateCount, FieldType::PublicKey]
        .iter()
        .filter_map(|ft| fields.get_first(*ft).cloned())
        .collect();

    let mut pending: VecDeque<Field> = VecDeque::new();
    for field in fields.content_fields() {
        if field.field_type == FieldType::RelatesTo {
            if let Ok(rel) = Relationship::from_field(field) {
                if rel.rel_type == RelationshipType::ContinuedIn {
                    return Err(ChainError::ReservedRelationship.into());
                }
            }
        }
        pending.push_back(field.clone());
    }

    let content_cap = |t: CubeType| -> Result<usize, VeritumError> {
        let cap = FieldDefinition::for_type(t).payload_capacity_at(chunk_size);
        cap.checked_sub(continuation_size() + MIN_SPLIT)
            .map(|_| cap - continuation_size())
            .ok_or(VeritumError::ChunkSizeTooSmall { size: chunk_size })
    };

    let mut plans: Vec<ChunkPlan> = Vec::new();
    let mut current: Vec<Field> = Vec::new();
    let mut used = 0usize;
    let mut cap = content_cap(first_type)?;

    macro_rules! close_chunk {
        () => {{
            let chunk_type = if plans.is_empty() { first_type } else { rest_type };
            let mut chunk_fields = Vec::new();
            if plans.is_empty() {
                if let Some(n) = &notify {
                    chunk_fields.push(n.clone());
                }
            }
            chunk_fields.extend(replicated.iter().cloned());
            chunk_fields.append(&mut current);
            chunk_fields.push(Relationship::continued_in(CubeKey::ZERO).to_field());
            plans.push(ChunkPlan {
                cube_type: chunk_type,
                fields: FieldSet::with_fields(chunk_type, chunk_fields),
                continues: true,
            });
            used = 0;
            cap = content_cap(rest_type)?;
        }};
    }

    while let Some(field) = pending.pop_front() {
        let need = field.encoded_len();
        match field.field_type.length() {
            FieldLength::Variable => {
                let exact = used + need == cap;
                if used + need < cap || (exact && pending.is_empty()) {
                    // fits; an exact fit is only allowed on the final
                    // chunk, whose freed continuation reservation leaves
                    // slack for the stop marker
                    used += need;
                    current.push(field);
                } else if exact && used > 0 {
                    // an exact fit of a complete field mid-stream would
                    // fake the saturation marker; carry it over whole
                    pending.push_front(field);
                    close_chunk!();
                } else {
                    let mut rem = cap - used;
                    if rem < MIN_SPLIT {
                        pending.push_front(field);
                        close_chunk!();
                        continue;
                    }
                    // the 1-byte and u16 length forms cannot fill gaps of
                    // 256 or 257 bytes exactly; shim them down to 254
                    if rem == 256 || rem == 257 {
                        let shim = Field::new(FieldType::Padding, vec![0u8; rem - 256]);
                        used += shim.encoded_len();
                        rem = 254;
                        current.push(shim);
                    }
                    let body = if rem - 2 <= 253 { rem - 2 } else { rem - 4 };
                    let mut head = field.clone();
                    head.value.truncate(body);
                    let mut tail = field;
                    tail.value.drain(..body);
                    tail.start = None;
                    used += head.encoded_len();
                    debug_assert_eq!(used, cap);
                    current.push(head);
                    pending.push_front(tail);
                    close_chunk!();
                }
            }
            FieldLength::Fixed(_) | FieldLength::Marker => {
                if used + need <= cap {
                    used += need;
                    current.push(field);
                } else {
                    if need > content_cap(rest_type)? {
                        return Err(FieldError::Oversized {
                            capacity: content_cap(rest_type)?,
                        }
                        .into());
                    }
                    pending.push_front(field);
                    close_chunk!();
                }
            }
        }
    }

    // the final chunk keeps its reservation as padding slack
    let chunk_type = if plans.is_empty() { first_type } else { rest_type };
    let mut chunk_fields = Vec::new();
    if plans.is_empty() {
        if let Some(n) = &notify {
            chunk_fields.push(n.clone());
        }
    }
    chunk_fields.extend(replicated.iter().cloned());
    chunk_fields.append(&mut current);
    plans.push(ChunkPlan {
        cube_type: chunk_type,
        fields: FieldSet::with_fields(chunk_type, chunk_fields),
        continues: false,
    });

    debug!(
        "Split into {} chunk(s), last fill {used} of {cap} bytes",
        plans.len()
    );
    Ok(plans)
}
