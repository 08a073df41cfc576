//! Typed references between cubes
//!
//! A relationship is carried inside a RELATES_TO field as a 1-byte type
//! code followed by the 32-byte key of the referenced cube.

use zerocopy::{AsBytes, FromBytes};

use crate::definitions::fields::{Field, FieldSet};
use crate::definitions::layout::RelationshipWire;
use crate::definitions::params::{FieldType, RelationshipType};
use crate::definitions::RELATIONSHIP_SIZE;
use crate::errors::FieldError;
use crate::keys::CubeKey;

/// A typed 32-byte reference from one cube to another
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// What the referenced cube means to the referring one
    pub rel_type: RelationshipType,
    /// Key of the referenced cube
    pub remote_key: CubeKey,
}

impl Relationship {
    /// Create a relationship of the given type
    pub fn new(rel_type: RelationshipType, remote_key: CubeKey) -> Self {
        Self {
            rel_type,
            remote_key,
        }
    }

    /// A continuation link to the next chunk of a multi-cube veritum
    pub fn continued_in(remote_key: CubeKey) -> Self {
        Self::new(RelationshipType::ContinuedIn, remote_key)
    }

    /// The wire body of this relationship
    pub fn wire(&self) -> RelationshipWire {
        RelationshipWire {
            rel_type: self.rel_type.code(),
            remote_key: *self.remote_key.as_bytes(),
        }
    }

    /// Build the RELATES_TO field carrying this relationship
    pub fn to_field(&self) -> Field {
        Field::new(FieldType::RelatesTo, self.wire().as_bytes().to_vec())
    }

    /// Parse a relationship back out of a RELATES_TO field
    pub fn from_field(field: &Field) -> Result<Self, FieldError> {
        if field.field_type != FieldType::RelatesTo {
            return Err(FieldError::UnexpectedField(field.field_type));
        }
        let wire = RelationshipWire::read_from(field.value.as_slice()).ok_or(
            FieldError::WrongLength {
                field_type: FieldType::RelatesTo,
                expected: RELATIONSHIP_SIZE,
                got: field.value.len(),
            },
        )?;
        let rel_type = RelationshipType::try_from(wire.rel_type)
            .map_err(|_| FieldError::UnknownType(wire.rel_type))?;
        Ok(Self {
            rel_type,
            remote_key: CubeKey::from_bytes(wire.remote_key),
        })
    }
}

/// Collect the relationships of a field set, optionally restricted to one
/// type; fields with unparsable bodies are skipped
pub fn relationships_in(fields: &FieldSet, filter: Option<RelationshipType>) -> Vec<Relationship> {
    fields
        .get(FieldType::RelatesTo)
        .filter_map(|f| Relationship::from_field(f).ok())
        .filter(|r| filter.map_or(true, |t| r.rel_type == t))
        .collect()
}
