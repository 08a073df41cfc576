//! Cube type, field type and relationship type parameters and their
//! wire-code conversions

use serde::{Deserialize, Serialize};
use strum::EnumIter;

use super::UnknownParameter;

/// The four cube families
///
/// A family fixes mutability, addressing and the positional layout of the
/// back of the buffer; the notify bit on top of it selects between the
/// plain and the notification variant of a type.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, EnumIter, Serialize, Deserialize)]
pub enum CubeFamily {
    /// Immutable, hash-addressed
    Frozen,
    /// Immutable, hash-addressed, but the key excludes the date and nonce
    /// so it survives re-sculpting with a fresh date
    Pic,
    /// Mutable, signed, public-key-addressed
    Muc,
    /// Mutable, signed, public-key-addressed, with a monotonic update
    /// counter
    Pmuc,
}

/// Type tag of a cube, stored in its first byte
///
/// The code encodes `(version << 4) | (family << 2) | notify` with the
/// current wire version being 1. Codes with bit 1 set are reserved.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, EnumIter, Serialize, Deserialize)]
#[repr(u8)]
pub enum CubeType {
    /// Immutable cube, key is the hash of all 1024 bytes
    Frozen = 0x10,
    /// [CubeType::Frozen] with a notification recipient
    FrozenNotify = 0x11,
    /// Immutable cube whose key excludes date and nonce
    Pic = 0x14,
    /// [CubeType::Pic] with a notification recipient
    PicNotify = 0x15,
    /// Mutable signed cube, key is the signing public key
    Muc = 0x18,
    /// [CubeType::Muc] with a notification recipient
    MucNotify = 0x19,
    /// Mutable signed cube with a strictly increasing update counter
    Pmuc = 0x1C,
    /// [CubeType::Pmuc] with a notification recipient
    PmucNotify = 0x1D,
}

impl TryFrom<u8> for CubeType {
    type Error = UnknownParameter;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x10 => Ok(CubeType::Frozen),
            0x11 => Ok(CubeType::FrozenNotify),
            0x14 => Ok(CubeType::Pic),
            0x15 => Ok(CubeType::PicNotify),
            0x18 => Ok(CubeType::Muc),
            0x19 => Ok(CubeType::MucNotify),
            0x1C => Ok(CubeType::Pmuc),
            0x1D => Ok(CubeType::PmucNotify),
            0x10..=0x1F => Err(UnknownParameter::Reserved),
            _ => Err(UnknownParameter::Unassigned),
        }
    }
}

impl CubeType {
    /// The family of this type
    pub fn family(&self) -> CubeFamily {
        match self {
            CubeType::Frozen | CubeType::FrozenNotify => CubeFamily::Frozen,
            CubeType::Pic | CubeType::PicNotify => CubeFamily::Pic,
            CubeType::Muc | CubeType::MucNotify => CubeFamily::Muc,
            CubeType::Pmuc | CubeType::PmucNotify => CubeFamily::Pmuc,
        }
    }

    /// Whether this type carries a notification recipient positional
    pub fn has_notify(&self) -> bool {
        (*self as u8) & 0b1 == 0b1
    }

    /// Whether this type is signed and addressed by its public key
    pub fn is_signed(&self) -> bool {
        matches!(self.family(), CubeFamily::Muc | CubeFamily::Pmuc)
    }

    /// Whether cubes of this type may be re-sculpted under the same key
    pub fn is_mutable(&self) -> bool {
        self.is_signed()
    }

    /// The notification variant of this type's family
    pub fn notify_variant(&self) -> CubeType {
        match self.family() {
            CubeFamily::Frozen => CubeType::FrozenNotify,
            CubeFamily::Pic => CubeType::PicNotify,
            CubeFamily::Muc => CubeType::MucNotify,
            CubeFamily::Pmuc => CubeType::PmucNotify,
        }
    }

    /// The plain variant of this type's family
    pub fn plain_variant(&self) -> CubeType {
        match self.family() {
            CubeFamily::Frozen => CubeType::Frozen,
            CubeFamily::Pic => CubeType::Pic,
            CubeFamily::Muc => CubeType::Muc,
            CubeFamily::Pmuc => CubeType::Pmuc,
        }
    }
}

/// Type of a field inside a cube
///
/// Three kinds of types share this enum: TLV types written to the payload
/// region with a 1-byte wire code, positional types written to fixed
/// offsets without any header, and synthetic types produced by the parser
/// ([FieldType::RawContent], [FieldType::Remainder]) that never carry a
/// wire code of their own.
///
/// The TLV code space is partitioned: 0x00 is the stop marker, 0x01-0x0f
/// are standard fields, 0x10-0x1f application-facing standard fields,
/// 0x20-0x2f reserved, 0x30-0x3f application-private custom fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldType {
    /// Stop marker terminating the TLV stream
    CciEnd,
    /// Application identifier
    Application,
    /// Seed for deriving sub-keys
    SubkeySeed,
    /// Authenticated ciphertext of an encrypted field stream
    Encrypted,
    /// 24-byte nonce of the encryption layer
    CryptoNonce,
    /// Sender public key of the encryption layer
    CryptoPubkey,
    /// Application payload
    Payload,
    /// Human-readable content name
    ContentName,
    /// Human-readable description
    Description,
    /// A typed reference to another cube
    RelatesTo,
    /// Author username
    Username,
    /// Media type tag of the payload
    MediaType,
    /// Avatar image data
    Avatar,
    /// Padding up to the payload region capacity
    Padding,
    /// Application-private custom field, codes 0x30-0x3f
    Custom(u8),

    /// Positional: the cube type tag, byte 0
    Type,
    /// Positional: the proof-of-work nonce
    Nonce,
    /// Positional: big-endian 5-byte UNIX seconds
    Date,
    /// Positional: Ed25519 signature of the signed cube families
    Signature,
    /// Positional: signing public key of the signed cube families
    PublicKey,
    /// Positional: update counter of the PMUC family
    PmucUpdateCount,
    /// Positional: notification recipient key
    Notify,

    /// Synthetic: the whole payload region of a cube parsed without TLV
    /// interpretation
    RawContent,
    /// Synthetic: bytes between the stop marker and the back positionals
    Remainder,
}

/// Length class of a field type, driving its TLV header encoding
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FieldLength {
    /// A bare marker byte without value
    Marker,
    /// Fixed body size; the header is the type code alone
    Fixed(usize),
    /// Variable body size; the header carries a length
    Variable,
}

/// Largest body length encodable in the 1-byte length form
pub const TLV_LENGTH_MAX_SHORT: usize = 253;
/// Length escape introducing a big-endian u16 body length
pub const TLV_LENGTH_U16: u8 = 0xFE;
/// Length escape denoting a body-less field
pub const TLV_LENGTH_EMPTY: u8 = 0xFF;

impl FieldType {
    /// The wire code of this type inside the payload region, if it has one
    pub fn wire_code(&self) -> Option<u8> {
        Some(match self {
            FieldType::CciEnd => 0x00,
            FieldType::Application => 0x01,
            FieldType::SubkeySeed => 0x02,
            FieldType::Encrypted => 0x03,
            FieldType::CryptoNonce => 0x04,
            FieldType::CryptoPubkey => 0x05,
            FieldType::Payload => 0x10,
            FieldType::ContentName => 0x11,
            FieldType::Description => 0x12,
            FieldType::RelatesTo => 0x13,
            FieldType::Username => 0x14,
            FieldType::MediaType => 0x15,
            FieldType::Avatar => 0x16,
            FieldType::Padding => 0x17,
            FieldType::Custom(code) => *code,
            _ => return None,
        })
    }

    /// Resolve a TLV wire code found in the payload region
    pub fn from_wire(code: u8) -> Result<Self, UnknownParameter> {
        match code {
            0x00 => Ok(FieldType::CciEnd),
            0x01 => Ok(FieldType::Application),
            0x02 => Ok(FieldType::SubkeySeed),
            0x03 => Ok(FieldType::Encrypted),
            0x04 => Ok(FieldType::CryptoNonce),
            0x05 => Ok(FieldType::CryptoPubkey),
            0x10 => Ok(FieldType::Payload),
            0x11 => Ok(FieldType::ContentName),
            0x12 => Ok(FieldType::Description),
            0x13 => Ok(FieldType::RelatesTo),
            0x14 => Ok(FieldType::Username),
            0x15 => Ok(FieldType::MediaType),
            0x16 => Ok(FieldType::Avatar),
            0x17 => Ok(FieldType::Padding),
            0x30..=0x3F => Ok(FieldType::Custom(code)),
            0x20..=0x2F => Err(UnknownParameter::Reserved),
            _ => Err(UnknownParameter::Unassigned),
        }
    }

    /// The length class of this type
    pub fn length(&self) -> FieldLength {
        match self {
            FieldType::CciEnd => FieldLength::Marker,
            FieldType::RelatesTo => FieldLength::Fixed(super::RELATIONSHIP_SIZE),
            FieldType::MediaType => FieldLength::Fixed(1),
            FieldType::CryptoNonce => FieldLength::Fixed(24),
            FieldType::CryptoPubkey => FieldLength::Fixed(32),
            FieldType::Type => FieldLength::Fixed(1),
            FieldType::Nonce => FieldLength::Fixed(super::NONCE_SIZE),
            FieldType::Date => FieldLength::Fixed(super::DATE_SIZE),
            FieldType::Signature => FieldLength::Fixed(super::SIGNATURE_SIZE),
            FieldType::PublicKey => FieldLength::Fixed(super::PUBLIC_KEY_SIZE),
            FieldType::PmucUpdateCount => FieldLength::Fixed(super::UPDATE_COUNT_SIZE),
            FieldType::Notify => FieldLength::Fixed(super::NOTIFY_SIZE),
            _ => FieldLength::Variable,
        }
    }

    /// Whether this type occupies a fixed offset instead of the TLV stream
    pub fn is_positional(&self) -> bool {
        matches!(
            self,
            FieldType::Type
                | FieldType::Nonce
                | FieldType::Date
                | FieldType::Signature
                | FieldType::PublicKey
                | FieldType::PmucUpdateCount
                | FieldType::Notify
        )
    }

    /// Whether this type is produced by the parser rather than written by
    /// an application
    pub fn is_synthetic(&self) -> bool {
        matches!(self, FieldType::RawContent | FieldType::Remainder)
    }

    /// Size of the TLV header for a body of `body_len` bytes
    ///
    /// Positional and synthetic types carry no header at all. The header
    /// size is derived from the length table; callers must never inline
    /// it.
    pub fn header_len(&self, body_len: usize) -> usize {
        if self.is_positional() || self.is_synthetic() {
            return 0;
        }
        match self.length() {
            FieldLength::Marker => 1,
            FieldLength::Fixed(_) => 1,
            FieldLength::Variable => {
                if body_len == 0 || body_len <= TLV_LENGTH_MAX_SHORT {
                    2
                } else {
                    4
                }
            }
        }
    }
}

/// Type of a relationship between two cubes
///
/// Codes 128 and above are reserved for private use by applications.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, EnumIter, Serialize, Deserialize)]
pub enum RelationshipType {
    /// The referenced cube continues this one's field stream
    ContinuedIn,
    /// The referenced cube is being replied to
    ReplyTo,
    /// The referenced cube is quoted
    Quotation,
    /// The referenced cube is a post of the referring identity
    MyPost,
    /// The referenced identity is mentioned
    Mention,
    /// A hint at the author of this cube
    AuthorHint,
    /// The referenced cube supersedes this one
    ReplacedBy,
    /// This cube supersedes the referenced one
    Replaces,
    /// Application-private relationship, codes 128-255
    Private(u8),
}

impl RelationshipType {
    /// The wire code of this relationship type
    pub fn code(&self) -> u8 {
        match self {
            RelationshipType::ContinuedIn => 1,
            RelationshipType::ReplyTo => 3,
            RelationshipType::Quotation => 4,
            RelationshipType::MyPost => 5,
            RelationshipType::Mention => 6,
            RelationshipType::AuthorHint => 7,
            RelationshipType::ReplacedBy => 11,
            RelationshipType::Replaces => 12,
            RelationshipType::Private(code) => *code,
        }
    }

    /// How many relationships of this type a single cube may carry, if
    /// the vocabulary bounds it
    ///
    /// Enforcement is left to applications; the core only exposes the
    /// lookup.
    pub fn limit(&self) -> Option<usize> {
        match self {
            RelationshipType::ContinuedIn => Some(1),
            RelationshipType::ReplyTo => Some(1),
            RelationshipType::AuthorHint => Some(1),
            RelationshipType::ReplacedBy => Some(1),
            _ => None,
        }
    }
}

impl TryFrom<u8> for RelationshipType {
    type Error = UnknownParameter;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(RelationshipType::ContinuedIn),
            3 => Ok(RelationshipType::ReplyTo),
            4 => Ok(RelationshipType::Quotation),
            5 => Ok(RelationshipType::MyPost),
            6 => Ok(RelationshipType::Mention),
            7 => Ok(RelationshipType::AuthorHint),
            11 => Ok(RelationshipType::ReplacedBy),
            12 => Ok(RelationshipType::Replaces),
            128..=255 => Ok(RelationshipType::Private(value)),
            _ => Err(UnknownParameter::Unassigned),
        }
    }
}
