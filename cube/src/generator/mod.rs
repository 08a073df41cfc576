//! Compilation of field lists into network-encoded cube buffers
//!
//! The compiler lays out the front positionals, encodes the TLV stream
//! into the payload region, terminates it with the stop marker, fills the
//! slack with padding and places the back positionals at their fixed
//! offsets. Every header length and offset is derived from the layout and
//! length tables.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

use crate::definitions::fields::{Field, FieldSet};
use crate::definitions::params::{
    FieldLength, FieldType, TLV_LENGTH_EMPTY, TLV_LENGTH_MAX_SHORT, TLV_LENGTH_U16,
};
use crate::definitions::CUBE_SIZE;
use crate::errors::FieldError;

type Blake2b32 = Blake2b<U32>;

/// Compile a field set into its 1024-byte wire form
///
/// On success the fields' `start` offsets are populated. The set must
/// already contain every positional its layout prescribes (see
/// [FieldSet::ensure_defaults] usage in the entity); the front run must
/// lead the list in layout order.
pub fn compile(fields: &mut FieldSet) -> Result<Box<[u8; CUBE_SIZE]>, FieldError> {
    let def = fields.definition();
    let front_len = def.front_len();
    let capacity = def.payload_capacity();
    let mut buf = vec![0u8; CUBE_SIZE].into_boxed_slice();

    // front positionals must lead the list in layout order
    for (i, positional) in def.front.iter().enumerate() {
        let Some(field) = fields.iter().nth(i) else {
            return Err(FieldError::MissingPositional(positional.field_type));
        };
        if field.field_type != positional.field_type {
            return Err(FieldError::MisplacedPositional(positional.field_type));
        }
        if field.value.len() != positional.len {
            return Err(FieldError::WrongLength {
                field_type: field.field_type,
                expected: positional.len,
                got: field.value.len(),
            });
        }
    }

    // payload region
    let mut payload: Vec<u8> = Vec::with_capacity(capacity);
    let mut starts: Vec<(usize, u16)> = Vec::new();
    let mut explicit_stop = false;
    for (idx, field) in fields.iter().enumerate().skip(def.front.len()) {
        let ft = field.field_type;
        if ft.is_positional() {
            if !def.has_positional(ft) {
                return Err(FieldError::UnexpectedField(ft));
            }
            continue;
        }
        match ft {
            FieldType::CciEnd => {
                explicit_stop = true;
                starts.push((idx, (front_len + payload.len()) as u16));
                payload.push(0x00);
            }
            FieldType::Remainder | FieldType::RawContent => {
                starts.push((idx, (front_len + payload.len()) as u16));
                payload.extend_from_slice(&field.value);
            }
            _ => {
                field.check_length()?;
                starts.push((idx, (front_len + payload.len() + ft.header_len(field.value.len()))
                    as u16));
                encode_field(&mut payload, field)?;
            }
        }
        if payload.len() > capacity {
            return Err(FieldError::Oversized { capacity });
        }
    }

    // stop marker and padding fill the slack up to the back positionals
    if !explicit_stop && payload.len() < capacity {
        payload.push(0x00);
        let slack = capacity - payload.len();
        write_padding(&mut payload, slack);
    } else if payload.len() < capacity {
        // an explicit stop marker was compiled in; everything behind it is
        // free-form remainder space
        let slack = capacity - payload.len();
        let filler = padding_body(&payload, slack);
        payload.extend(filler);
    }
    debug_assert_eq!(payload.len(), capacity);

    buf[0] = fields
        .get_first(FieldType::Type)
        .map(|f| f.value[0])
        .unwrap_or(fields.cube_type() as u8);
    buf[front_len..front_len + capacity].copy_from_slice(&payload);

    // back positionals at their fixed offsets
    for positional in def.back {
        let ft = positional.field_type;
        let offset = def
            .offset_of(ft)
            .ok_or(FieldError::MissingPositional(ft))?;
        let Some(field) = fields.get_first(ft) else {
            return Err(FieldError::MissingPositional(ft));
        };
        if field.value.len() != positional.len {
            return Err(FieldError::WrongLength {
                field_type: ft,
                expected: positional.len,
                got: field.value.len(),
            });
        }
        buf[offset..offset + positional.len].copy_from_slice(&field.value);
    }

    // publish the computed offsets
    for (idx, start) in starts {
        if let Some(field) = fields.field_at_mut(idx) {
            field.start = Some(start);
        }
    }
    for positional in def.front.iter().chain(def.back.iter()) {
        if let (Some(offset), Some(field)) = (
            def.offset_of(positional.field_type),
            fields.get_first_mut(positional.field_type),
        ) {
            field.start = Some(offset as u16);
        }
    }

    let raw: Box<[u8]> = buf;
    raw.try_into()
        .map_err(|_| FieldError::Oversized { capacity })
}

/// Encode one TLV field, header and body, into `out`
pub fn encode_field(out: &mut Vec<u8>, field: &Field) -> Result<(), FieldError> {
    let code = field
        .field_type
        .wire_code()
        .ok_or(FieldError::UnexpectedField(field.field_type))?;
    match field.field_type.length() {
        FieldLength::Marker => {
            out.push(code);
        }
        FieldLength::Fixed(expected) => {
            if field.value.len() != expected {
                return Err(FieldError::WrongLength {
                    field_type: field.field_type,
                    expected,
                    got: field.value.len(),
                });
            }
            out.push(code);
            out.extend_from_slice(&field.value);
        }
        FieldLength::Variable => {
            let len = field.value.len();
            out.push(code);
            if len == 0 {
                out.push(TLV_LENGTH_EMPTY);
            } else if len <= TLV_LENGTH_MAX_SHORT {
                out.push(len as u8);
            } else if len <= u16::MAX as usize {
                out.push(TLV_LENGTH_U16);
                out.extend_from_slice(&(len as u16).to_be_bytes());
            } else {
                return Err(FieldError::ValueTooLong { len });
            }
            out.extend_from_slice(&field.value);
        }
    }
    Ok(())
}

/// Encode a bare list of TLV fields into a stream without any positional
/// context (used by the encryption layer)
pub fn encode_stream(fields: &[Field]) -> Result<Vec<u8>, FieldError> {
    let mut out = Vec::new();
    for field in fields {
        field.check_length()?;
        encode_field(&mut out, field)?;
    }
    Ok(out)
}

/// Fill `slack` bytes behind the stop marker with a padding field
///
/// Slack of a single byte cannot hold a field header and is written as a
/// bare filler byte, surfacing as part of the remainder on reparse.
fn write_padding(payload: &mut Vec<u8>, slack: usize) {
    if slack == 0 {
        return;
    }
    if slack == 1 {
        let filler = padding_body(payload, 1);
        payload.extend(filler);
        return;
    }
    let code = match FieldType::Padding.wire_code() {
        Some(c) => c,
        None => return,
    };
    payload.push(code);
    if slack - 2 == 0 {
        payload.push(TLV_LENGTH_EMPTY);
    } else if slack - 2 <= TLV_LENGTH_MAX_SHORT {
        payload.push((slack - 2) as u8);
        let body = padding_body(payload, slack - 2);
        payload.extend(body);
    } else {
        // the 1-byte and u16 length forms cannot hit every total exactly;
        // the u16 escape covers the rest
        payload.push(TLV_LENGTH_U16);
        payload.extend_from_slice(&((slack - 4) as u16).to_be_bytes());
        let body = padding_body(payload, slack - 4);
        payload.extend(body);
    }
}

/// Pseudorandom padding bytes derived from the payload written so far
///
/// Compilation must stay a pure function of its logical inputs, so the
/// filler is a BLAKE2b keystream over the preceding payload bytes rather
/// than host randomness.
fn padding_body(seed: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter: u64 = 0;
    while out.len() < len {
        let mut hasher = Blake2b32::new();
        hasher.update(seed);
        hasher.update(counter.to_be_bytes());
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}
