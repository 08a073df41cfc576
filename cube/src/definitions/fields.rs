//! The field model: typed values and the ordered field container
//!
//! A [Field] is a typed byte value, optionally annotated with its offset
//! in the compiled buffer. A [FieldSet] is the insertion-ordered list of
//! fields belonging to one cube, tied to the positional layout of its
//! cube type. Positional slots are enforced by the compiler, not by the
//! container.

use zerocopy::AsBytes;

use super::layout::{self, FieldDefinition};
use super::params::{CubeType, FieldLength, FieldType};
use super::{DATE_SIZE, SIGNATURE_SIZE};
use crate::errors::FieldError;
use crate::keys::CubeKey;

/// A typed field value
///
/// Equality compares type and value; the buffer offset is ignored unless
/// compared explicitly through [Field::equals].
#[derive(Debug, Clone)]
pub struct Field {
    /// Type of the field
    pub field_type: FieldType,
    /// Raw value bytes, excluding any TLV header
    pub value: Vec<u8>,
    /// Offset of the value in the compiled buffer, populated by the
    /// parser during decompilation and by the compiler after layout
    pub start: Option<u16>,
}

impl Field {
    /// Create a field from a type and raw value bytes
    pub fn new(field_type: FieldType, value: impl Into<Vec<u8>>) -> Self {
        Self {
            field_type,
            value: value.into(),
            start: None,
        }
    }

    /// An application payload field
    pub fn payload(value: impl Into<Vec<u8>>) -> Self {
        Self::new(FieldType::Payload, value)
    }

    /// A content name field
    pub fn content_name(value: impl Into<Vec<u8>>) -> Self {
        Self::new(FieldType::ContentName, value)
    }

    /// A description field
    pub fn description(value: impl Into<Vec<u8>>) -> Self {
        Self::new(FieldType::Description, value)
    }

    /// A username field
    pub fn username(value: impl Into<Vec<u8>>) -> Self {
        Self::new(FieldType::Username, value)
    }

    /// A media type tag
    pub fn media_type(tag: u8) -> Self {
        Self::new(FieldType::MediaType, vec![tag])
    }

    /// An application identifier field
    pub fn application(value: impl Into<Vec<u8>>) -> Self {
        Self::new(FieldType::Application, value)
    }

    /// An application-private custom field; the code must lie in the
    /// private region 0x30-0x3f
    pub fn custom(code: u8, value: impl Into<Vec<u8>>) -> Result<Self, FieldError> {
        match FieldType::from_wire(code) {
            Ok(ft @ FieldType::Custom(_)) => Ok(Self::new(ft, value)),
            _ => Err(FieldError::UnknownType(code)),
        }
    }

    /// The cube type positional
    pub fn cube_type(cube_type: CubeType) -> Self {
        Self::new(FieldType::Type, vec![cube_type as u8])
    }

    /// The nonce positional
    pub fn nonce(nonce: u32) -> Self {
        Self::new(FieldType::Nonce, nonce.to_be_bytes().to_vec())
    }

    /// The date positional from UNIX seconds
    pub fn date(secs: u64) -> Self {
        Self::new(FieldType::Date, layout::encode_timestamp(secs).to_vec())
    }

    /// An all-zero signature positional, overwritten during compile
    pub fn signature_placeholder() -> Self {
        Self::new(FieldType::Signature, vec![0u8; SIGNATURE_SIZE])
    }

    /// The public key positional
    pub fn public_key(key: [u8; 32]) -> Self {
        Self::new(FieldType::PublicKey, key.to_vec())
    }

    /// The update counter positional of the PMUC family
    pub fn update_count(count: u32) -> Self {
        Self::new(FieldType::PmucUpdateCount, count.to_be_bytes().to_vec())
    }

    /// The notification recipient positional
    pub fn notify(recipient: CubeKey) -> Self {
        Self::new(FieldType::Notify, recipient.as_bytes().to_vec())
    }

    /// A relationship to another cube
    pub fn relates_to(rel: &crate::relationship::Relationship) -> Self {
        Self::new(FieldType::RelatesTo, rel.wire().as_bytes().to_vec())
    }

    /// Encoded size of this field inside the payload region, TLV header
    /// included
    pub fn encoded_len(&self) -> usize {
        self.field_type.header_len(self.value.len()) + self.value.len()
    }

    /// Compare against another field, optionally including the buffer
    /// offsets
    pub fn equals(&self, other: &Field, compare_location: bool) -> bool {
        self.field_type == other.field_type
            && self.value == other.value
            && (!compare_location || self.start == other.start)
    }

    /// Interpret the value as a UNIX seconds timestamp
    pub fn as_timestamp(&self) -> Option<u64> {
        (self.value.len() == DATE_SIZE).then(|| layout::decode_timestamp(&self.value))
    }

    /// Interpret the value as a big-endian u32
    pub fn as_u32(&self) -> Option<u32> {
        let raw: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(raw))
    }

    /// Check the value length against the length table
    pub(crate) fn check_length(&self) -> Result<(), FieldError> {
        match self.field_type.length() {
            FieldLength::Marker => {
                if self.value.is_empty() {
                    Ok(())
                } else {
                    Err(FieldError::WrongLength {
                        field_type: self.field_type,
                        expected: 0,
                        got: self.value.len(),
                    })
                }
            }
            FieldLength::Fixed(expected) => {
                if self.value.len() == expected {
                    Ok(())
                } else {
                    Err(FieldError::WrongLength {
                        field_type: self.field_type,
                        expected,
                        got: self.value.len(),
                    })
                }
            }
            FieldLength::Variable => {
                if self.value.len() <= u16::MAX as usize {
                    Ok(())
                } else {
                    Err(FieldError::ValueTooLong {
                        len: self.value.len(),
                    })
                }
            }
        }
    }
}

impl PartialEq for Field {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other, false)
    }
}

impl Eq for Field {}

/// The insertion-ordered field list of one cube
///
/// The set owns a reference to the positional layout of its cube type.
/// Synthetic and padding fields ([FieldType::CciEnd],
/// [FieldType::Padding], [FieldType::Remainder]) are carried in the list
/// but ignored by equality, which compares the fields an application
/// authored.
#[derive(Debug, Clone)]
pub struct FieldSet {
    cube_type: CubeType,
    definition: &'static FieldDefinition,
    fields: Vec<Field>,
}

impl FieldSet {
    /// Create an empty set for the given cube type
    pub fn new(cube_type: CubeType) -> Self {
        Self {
            cube_type,
            definition: FieldDefinition::for_type(cube_type),
            fields: Vec::new(),
        }
    }

    /// Create a set from a list of fields
    pub fn with_fields(cube_type: CubeType, fields: impl IntoIterator<Item = Field>) -> Self {
        let mut set = Self::new(cube_type);
        set.fields.extend(fields);
        set
    }

    /// The cube type this set belongs to
    pub fn cube_type(&self) -> CubeType {
        self.cube_type
    }

    /// The positional layout of this set's cube type
    pub fn definition(&self) -> &'static FieldDefinition {
        self.definition
    }

    /// Re-target the set at another cube type, keeping the fields
    pub(crate) fn retype(&mut self, cube_type: CubeType) {
        self.cube_type = cube_type;
        self.definition = FieldDefinition::for_type(cube_type);
    }

    /// Number of fields in the set
    pub fn count(&self) -> usize {
        self.fields.len()
    }

    /// Whether the set holds no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Append a field at the end
    pub fn append_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Insert a field at the very front
    pub fn insert_field_in_front(&mut self, field: Field) {
        self.fields.insert(0, field);
    }

    /// Insert a field directly after the leading run of front positionals
    pub fn insert_field_after_front_positionals(&mut self, field: Field) {
        let idx = self
            .fields
            .iter()
            .take_while(|f| self.definition.front.iter().any(|p| p.field_type == f.field_type))
            .count();
        self.fields.insert(idx, field);
    }

    /// Insert a field directly before the trailing run of back positionals
    pub fn insert_field_before_back_positionals(&mut self, field: Field) {
        self.fields.insert(self.back_positionals_start(), field);
    }

    /// Insert a field before the first field of the given type, or append
    /// if the type is absent
    pub fn insert_field_before(&mut self, field_type: FieldType, field: Field) {
        match self.fields.iter().position(|f| f.field_type == field_type) {
            Some(idx) => self.fields.insert(idx, field),
            None => self.fields.push(field),
        }
    }

    /// Insert `field` at the front unless a field of its type is already
    /// present. Returns whether the set changed. Idempotent.
    pub fn ensure_field_in_front(&mut self, field: Field) -> bool {
        if self.get_first(field.field_type).is_some() {
            return false;
        }
        self.insert_field_in_front(field);
        true
    }

    /// Append `field` to the back unless a field of its type is already
    /// present. Returns whether the set changed. Idempotent.
    pub fn ensure_field_in_back(&mut self, field: Field) -> bool {
        if self.get_first(field.field_type).is_some() {
            return false;
        }
        self.append_field(field);
        true
    }

    /// Remove the field at the given index
    pub fn remove_field_at(&mut self, index: usize) -> Option<Field> {
        (index < self.fields.len()).then(|| self.fields.remove(index))
    }

    /// Remove the first field equal to the given one; returns whether a
    /// field was removed
    pub fn remove_field(&mut self, field: &Field) -> bool {
        match self.fields.iter().position(|f| f == field) {
            Some(idx) => {
                self.fields.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove every field of the given type
    pub fn remove_all(&mut self, field_type: FieldType) {
        self.fields.retain(|f| f.field_type != field_type);
    }

    /// All fields of the given type, in order
    pub fn get(&self, field_type: FieldType) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(move |f| f.field_type == field_type)
    }

    /// The first field of the given type
    pub fn get_first(&self, field_type: FieldType) -> Option<&Field> {
        self.fields.iter().find(|f| f.field_type == field_type)
    }

    /// Mutable access to the first field of the given type
    pub fn get_first_mut(&mut self, field_type: FieldType) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.field_type == field_type)
    }

    /// Mutable access to the field at the given index
    pub fn field_at_mut(&mut self, index: usize) -> Option<&mut Field> {
        self.fields.get_mut(index)
    }

    /// All fields in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    /// The fields an application authored: everything except positionals,
    /// stop markers, padding and parser-synthesized fields
    pub fn content_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| {
            !f.field_type.is_positional()
                && !matches!(
                    f.field_type,
                    FieldType::CciEnd | FieldType::Padding | FieldType::Remainder
                )
        })
    }

    /// Total encoded size of the set in bytes, TLV headers included and
    /// positional fields counted at their slot width
    pub fn byte_length(&self) -> usize {
        self.fields
            .iter()
            .map(|f| {
                if f.field_type.is_positional() || f.field_type.is_synthetic() {
                    f.value.len()
                } else {
                    f.encoded_len()
                }
            })
            .sum()
    }

    /// Compare against another set field by field, skipping stop markers,
    /// padding and remainders on both sides
    pub fn equals(&self, other: &FieldSet, compare_location: bool) -> bool {
        let skip = |f: &&Field| {
            !matches!(
                f.field_type,
                FieldType::CciEnd | FieldType::Padding | FieldType::Remainder
            )
        };
        let mine: Vec<&Field> = self.fields.iter().filter(skip).collect();
        let theirs: Vec<&Field> = other.fields.iter().filter(skip).collect();
        mine.len() == theirs.len()
            && mine
                .iter()
                .zip(theirs.iter())
                .all(|(a, b)| a.equals(b, compare_location))
    }

    /// Index of the first field of the trailing back-positional run
    pub(crate) fn back_positionals_start(&self) -> usize {
        let mut idx = self.fields.len();
        while idx > 0 {
            let ft = self.fields[idx - 1].field_type;
            if self.definition.back.iter().any(|p| p.field_type == ft) {
                idx -= 1;
            } else {
                break;
            }
        }
        idx
    }

    /// Auto-insert the mandatory positionals this cube type requires
    ///
    /// The cube type tag goes in front; nonce, date and (per layout)
    /// signature, public-key and update-count defaults go in back in
    /// layout order. Existing fields are left untouched except for the
    /// type tag, which is rewritten to match the set's cube type.
    pub(crate) fn ensure_defaults(&mut self, timestamp: u64, public_key: Option<[u8; 32]>) {
        let cube_type = self.cube_type;
        match self.get_first_mut(FieldType::Type) {
            Some(f) => f.value = vec![cube_type as u8],
            None => {
                self.insert_field_in_front(Field::cube_type(cube_type));
            }
        }
        for positional in self.definition.back {
            let default = match positional.field_type {
                FieldType::Nonce => Field::nonce(0),
                FieldType::Date => Field::date(timestamp),
                FieldType::Signature => Field::signature_placeholder(),
                FieldType::PmucUpdateCount => Field::update_count(0),
                FieldType::PublicKey => match public_key {
                    Some(pk) => Field::public_key(pk),
                    None => continue,
                },
                // a notify recipient cannot be fabricated
                _ => continue,
            };
            self.ensure_field_in_back(default);
        }
    }
}

impl PartialEq for FieldSet {
    fn eq(&self, other: &Self) -> bool {
        self.cube_type == other.cube_type && self.equals(other, false)
    }
}

impl Eq for FieldSet {}

impl<'a> IntoIterator for &'a FieldSet {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}
