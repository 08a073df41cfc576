//! Positional layouts of the cube families
//!
//! Every cube type prescribes a run of fixed-length positional fields at
//! the front and at the back of the 1024-byte buffer. The payload region
//! between them carries the TLV stream. All offsets are derived from the
//! tables in this module; byte ranges sum to exactly [CUBE_SIZE] for
//! every type.

use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

use super::params::{CubeType, FieldType};
use super::{
    CUBE_SIZE, DATE_SIZE, NONCE_SIZE, NOTIFY_SIZE, PUBLIC_KEY_SIZE, SIGNATURE_SIZE,
    UPDATE_COUNT_SIZE,
};

/// One slot in a positional run
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Positional {
    /// Type of the field occupying the slot
    pub field_type: FieldType,
    /// Exact length of the slot in bytes
    pub len: usize,
}

const fn slot(field_type: FieldType, len: usize) -> Positional {
    Positional { field_type, len }
}

/// Positional layout of one cube type
///
/// Front slots start at offset 0 in declaration order; back slots end at
/// [CUBE_SIZE] in declaration order. Compilers and parsers read this
/// table instead of hard-coding offsets.
#[derive(Debug, PartialEq, Eq)]
pub struct FieldDefinition {
    /// Slots at the front of the buffer
    pub front: &'static [Positional],
    /// Slots at the back of the buffer
    pub back: &'static [Positional],
}

const FRONT: &[Positional] = &[slot(FieldType::Type, 1)];

const BACK_FROZEN: &[Positional] = &[
    slot(FieldType::Nonce, NONCE_SIZE),
    slot(FieldType::Date, DATE_SIZE),
];

const BACK_FROZEN_NOTIFY: &[Positional] = &[
    slot(FieldType::Nonce, NONCE_SIZE),
    slot(FieldType::Date, DATE_SIZE),
    slot(FieldType::Notify, NOTIFY_SIZE),
];

const BACK_MUC: &[Positional] = &[
    slot(FieldType::Nonce, NONCE_SIZE),
    slot(FieldType::Signature, SIGNATURE_SIZE),
    slot(FieldType::Date, DATE_SIZE),
    slot(FieldType::PublicKey, PUBLIC_KEY_SIZE),
];

const BACK_MUC_NOTIFY: &[Positional] = &[
    slot(FieldType::Nonce, NONCE_SIZE),
    slot(FieldType::Signature, SIGNATURE_SIZE),
    slot(FieldType::Date, DATE_SIZE),
    slot(FieldType::PublicKey, PUBLIC_KEY_SIZE),
    slot(FieldType::Notify, NOTIFY_SIZE),
];

const BACK_PMUC: &[Positional] = &[
    slot(FieldType::Nonce, NONCE_SIZE),
    slot(FieldType::Signature, SIGNATURE_SIZE),
    slot(FieldType::Date, DATE_SIZE),
    slot(FieldType::PublicKey, PUBLIC_KEY_SIZE),
    slot(FieldType::PmucUpdateCount, UPDATE_COUNT_SIZE),
];

const BACK_PMUC_NOTIFY: &[Positional] = &[
    slot(FieldType::Nonce, NONCE_SIZE),
    slot(FieldType::Signature, SIGNATURE_SIZE),
    slot(FieldType::Date, DATE_SIZE),
    slot(FieldType::PublicKey, PUBLIC_KEY_SIZE),
    slot(FieldType::PmucUpdateCount, UPDATE_COUNT_SIZE),
    slot(FieldType::Notify, NOTIFY_SIZE),
];

static DEF_FROZEN: FieldDefinition = FieldDefinition {
    front: FRONT,
    back: BACK_FROZEN,
};
static DEF_FROZEN_NOTIFY: FieldDefinition = FieldDefinition {
    front: FRONT,
    back: BACK_FROZEN_NOTIFY,
};
static DEF_MUC: FieldDefinition = FieldDefinition {
    front: FRONT,
    back: BACK_MUC,
};
static DEF_MUC_NOTIFY: FieldDefinition = FieldDefinition {
    front: FRONT,
    back: BACK_MUC_NOTIFY,
};
static DEF_PMUC: FieldDefinition = FieldDefinition {
    front: FRONT,
    back: BACK_PMUC,
};
static DEF_PMUC_NOTIFY: FieldDefinition = FieldDefinition {
    front: FRONT,
    back: BACK_PMUC_NOTIFY,
};

impl FieldDefinition {
    /// The layout of the given cube type
    pub const fn for_type(cube_type: CubeType) -> &'static FieldDefinition {
        match cube_type {
            CubeType::Frozen | CubeType::Pic => &DEF_FROZEN,
            CubeType::FrozenNotify | CubeType::PicNotify => &DEF_FROZEN_NOTIFY,
            CubeType::Muc => &DEF_MUC,
            CubeType::MucNotify => &DEF_MUC_NOTIFY,
            CubeType::Pmuc => &DEF_PMUC,
            CubeType::PmucNotify => &DEF_PMUC_NOTIFY,
        }
    }

    /// Total length of the front positional run
    pub fn front_len(&self) -> usize {
        self.front.iter().map(|p| p.len).sum()
    }

    /// Total length of the back positional run
    pub fn back_len(&self) -> usize {
        self.back.iter().map(|p| p.len).sum()
    }

    /// Capacity of the payload region between the positional runs
    pub fn payload_capacity(&self) -> usize {
        CUBE_SIZE - self.front_len() - self.back_len()
    }

    /// Payload capacity when the cube is truncated to `cube_size` bytes
    /// (used by tests exercising the splitter at small sizes)
    pub fn payload_capacity_at(&self, cube_size: usize) -> usize {
        cube_size.saturating_sub(self.front_len() + self.back_len())
    }

    /// Absolute offset of a positional slot inside the buffer, if the
    /// layout contains it
    pub fn offset_of(&self, field_type: FieldType) -> Option<usize> {
        let mut offset = 0;
        for p in self.front {
            if p.field_type == field_type {
                return Some(offset);
            }
            offset += p.len;
        }
        let mut offset = CUBE_SIZE - self.back_len();
        for p in self.back {
            if p.field_type == field_type {
                return Some(offset);
            }
            offset += p.len;
        }
        None
    }

    /// The slot describing `field_type`, if the layout contains it
    pub fn positional(&self, field_type: FieldType) -> Option<&'static Positional> {
        self.front
            .iter()
            .chain(self.back.iter())
            .find(|p| p.field_type == field_type)
    }

    /// Whether `field_type` occupies a slot in this layout
    pub fn has_positional(&self, field_type: FieldType) -> bool {
        self.positional(field_type).is_some()
    }
}

/// Wire body of a RELATES_TO field
///
///      0                   1
///      0 1 2 3 4 5 6 7 8 9 0 ...
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+
///     |  Type |      Remote Key (32 octets)
///     +-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Debug, FromBytes, FromZeroes, AsBytes, Unaligned, Copy, Clone)]
#[repr(C, packed)]
pub struct RelationshipWire {
    /// Relationship type code
    pub rel_type: u8,
    /// Key of the referenced cube
    pub remote_key: [u8; 32],
}

/// Encode a UNIX seconds timestamp into the 5-byte date positional
pub fn encode_timestamp(secs: u64) -> [u8; DATE_SIZE] {
    let raw = secs.to_be_bytes();
    let mut out = [0u8; DATE_SIZE];
    out.copy_from_slice(&raw[8 - DATE_SIZE..]);
    out
}

/// Decode the 5-byte date positional into UNIX seconds
pub fn decode_timestamp(raw: &[u8]) -> u64 {
    let mut out = [0u8; 8];
    out[8 - DATE_SIZE..].copy_from_slice(&raw[..DATE_SIZE]);
    u64::from_be_bytes(out)
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn ranges_sum_to_cube_size() {
        for cube_type in CubeType::iter() {
            let def = FieldDefinition::for_type(cube_type);
            assert_eq!(
                def.front_len() + def.payload_capacity() + def.back_len(),
                CUBE_SIZE,
                "{cube_type:?}"
            );
        }
    }

    #[test]
    fn back_offsets() {
        let def = FieldDefinition::for_type(CubeType::Frozen);
        assert_eq!(def.offset_of(FieldType::Type), Some(0));
        assert_eq!(def.offset_of(FieldType::Nonce), Some(1015));
        assert_eq!(def.offset_of(FieldType::Date), Some(1019));
        assert_eq!(def.offset_of(FieldType::Signature), None);

        let def = FieldDefinition::for_type(CubeType::PmucNotify);
        assert_eq!(def.offset_of(FieldType::Nonce), Some(CUBE_SIZE - 141));
        assert_eq!(def.offset_of(FieldType::Notify), Some(CUBE_SIZE - 32));
        assert_eq!(def.payload_capacity(), 882);
    }

    #[test]
    fn signed_layouts_hold_the_keys() {
        for cube_type in CubeType::iter().filter(CubeType::is_signed) {
            let def = FieldDefinition::for_type(cube_type);
            assert!(def.has_positional(FieldType::Signature));
            assert!(def.has_positional(FieldType::PublicKey));
        }
    }

    #[test]
    fn timestamp_round_trip() {
        for secs in [0u64, 1, 0x1337, 0xFF_FFFF_FFFF] {
            assert_eq!(decode_timestamp(&encode_timestamp(secs)), secs);
        }
    }
}
