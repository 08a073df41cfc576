//! Parsing of network-encoded cube buffers into field lists
//!
//! The parser walks the front positional run, the TLV stream of the
//! payload region and the back positional run. Parsing of the TLV stream
//! halts at the stop marker; everything between it and the back
//! positionals surfaces as a single synthetic remainder field and is
//! never interpreted as TLV. Forwarding-only peers disable TLV parsing
//! and receive the payload region as one opaque raw-content field.

use log::warn;

use crate::definitions::fields::{Field, FieldSet};
use crate::definitions::params::{
    CubeType, FieldLength, FieldType, TLV_LENGTH_EMPTY, TLV_LENGTH_U16,
};
use crate::definitions::CUBE_SIZE;
use crate::errors::{CubeError, FieldError};

/// Interpretation of the payload region
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum TlvMode {
    /// Parse the payload region as a TLV stream
    #[default]
    Cci,
    /// Surface the payload region as one opaque RAWCONTENT field
    RawContent,
}

/// Read the cube type tag from a buffer
pub fn cube_type_of(buf: &[u8]) -> Result<CubeType, CubeError> {
    let first = *buf.first().ok_or(CubeError::BinaryLength {
        expected: CUBE_SIZE,
        got: 0,
    })?;
    CubeType::try_from(first).map_err(|_| CubeError::TypeNotImplemented(first))
}

/// Parse a 1024-byte buffer into a field set
///
/// The buffer must be exactly [CUBE_SIZE] bytes; anything else fails
/// before any field access.
pub fn decompile(buf: &[u8], mode: TlvMode) -> Result<FieldSet, CubeError> {
    if buf.len() != CUBE_SIZE {
        return Err(CubeError::BinaryLength {
            expected: CUBE_SIZE,
            got: buf.len(),
        });
    }
    let cube_type = cube_type_of(buf)?;
    let def = crate::definitions::layout::FieldDefinition::for_type(cube_type);
    let mut fields = FieldSet::new(cube_type);

    // front positional run
    let mut cursor = 0usize;
    for positional in def.front {
        let mut field = Field::new(positional.field_type, buf[cursor..cursor + positional.len].to_vec());
        field.start = Some(cursor as u16);
        fields.append_field(field);
        cursor += positional.len;
    }

    // payload region
    let region_end = CUBE_SIZE - def.back_len();
    match mode {
        TlvMode::RawContent => {
            let mut field = Field::new(FieldType::RawContent, buf[cursor..region_end].to_vec());
            field.start = Some(cursor as u16);
            fields.append_field(field);
        }
        TlvMode::Cci => {
            while cursor < region_end {
                let code = buf[cursor];
                if code == 0x00 {
                    let mut stop = Field::new(FieldType::CciEnd, vec![]);
                    stop.start = Some(cursor as u16);
                    fields.append_field(stop);
                    cursor += 1;
                    if cursor < region_end {
                        let mut rest = Field::new(
                            FieldType::Remainder,
                            buf[cursor..region_end].to_vec(),
                        );
                        rest.start = Some(cursor as u16);
                        fields.append_field(rest);
                    }
                    break;
                }
                let (field, consumed) = decode_field(&buf[cursor..region_end], cursor)?;
                cursor += consumed;
                fields.append_field(field);
            }
        }
    }

    // back positional run
    let mut cursor = region_end;
    for positional in def.back {
        let mut field = Field::new(positional.field_type, buf[cursor..cursor + positional.len].to_vec());
        field.start = Some(cursor as u16);
        fields.append_field(field);
        cursor += positional.len;
    }

    Ok(fields)
}

/// Decode one TLV field from the start of `buf`
///
/// `base` is the absolute offset of `buf` inside the cube, used for the
/// field's `start` annotation and error reporting. Returns the field and
/// the number of bytes consumed.
fn decode_field(buf: &[u8], base: usize) -> Result<(Field, usize), FieldError> {
    let code = buf[0];
    let field_type =
        FieldType::from_wire(code).map_err(|_| FieldError::UnknownType(code))?;
    match field_type.length() {
        FieldLength::Marker => {
            let mut field = Field::new(field_type, vec![]);
            field.start = Some(base as u16);
            Ok((field, 1))
        }
        FieldLength::Fixed(len) => {
            if buf.len() < 1 + len {
                return Err(FieldError::TlvOverflow { offset: base });
            }
            let mut field = Field::new(field_type, buf[1..1 + len].to_vec());
            field.start = Some((base + 1) as u16);
            Ok((field, 1 + len))
        }
        FieldLength::Variable => {
            let Some(&len_byte) = buf.get(1) else {
                return Err(FieldError::TlvOverflow { offset: base });
            };
            let (header, len) = match len_byte {
                TLV_LENGTH_EMPTY => (2usize, 0usize),
                TLV_LENGTH_U16 => {
                    let Some(raw) = buf.get(2..4) else {
                        return Err(FieldError::TlvOverflow { offset: base });
                    };
                    let mut wide = [0u8; 2];
                    wide.copy_from_slice(raw);
                    (4, u16::from_be_bytes(wide) as usize)
                }
                short => (2, short as usize),
            };
            if buf.len() < header + len {
                return Err(FieldError::TlvOverflow { offset: base });
            }
            if len == 0 && len_byte != TLV_LENGTH_EMPTY {
                warn!("Non-canonical zero length encoding at offset {base}");
            }
            let mut field = Field::new(field_type, buf[header..header + len].to_vec());
            field.start = Some((base + header) as u16);
            Ok((field, header + len))
        }
    }
}

/// Decode a bare TLV stream without positional context (used by the
/// encryption layer); the stream must not contain a stop marker
pub fn decode_stream(buf: &[u8]) -> Result<Vec<Field>, FieldError> {
    let mut fields = Vec::new();
    let mut cursor = 0usize;
    while cursor < buf.len() {
        if buf[cursor] == 0x00 {
            return Err(FieldError::UnexpectedField(FieldType::CciEnd));
        }
        let (field, consumed) = decode_field(&buf[cursor..], cursor)?;
        cursor += consumed;
        fields.push(field);
    }
    Ok(fields)
}
